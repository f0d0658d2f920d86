//! Stitch graph builder
//!
//! Places stitches row by row. A stitch without an address attaches one
//! step on from the previous attachment; the step follows the direction of
//! the row it is working into, which flips with every `turn` worked since.
//! References to labels spanning several stitches are recorded and left for
//! the label resolver.

use std::collections::BTreeMap;

use stitch_core::{owner_of, NodeRef, Registry, RowSummary, StitchInstance};

use crate::arith;
use crate::ast::{Attachment, LabelDef, LabelModifiers, LabelRef, RowToken, Rows, TokenKind};
use crate::error::{CompileError, ErrorKind, Result};
use crate::options::CompileOptions;
use crate::span::Span;

/// A label and the top ids it names, in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct LabelInfo {
    pub key: String,
    pub ids: Vec<u64>,
    pub modifiers: LabelModifiers,
    /// First definition
    pub span: Span,
    /// Set once anything has attached to the label
    pub referenced: bool,
}

/// A stitch whose bottoms are mapped onto a label by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct LabelUse {
    /// Index into [`Fabric::instances`]
    pub instance: usize,
    pub key: String,
    pub group: i64,
    pub reversed: bool,
    /// Definition modifiers merged with the reference's
    pub modifiers: LabelModifiers,
    pub span: Span,
}

/// Everything placed so far
#[derive(Debug, Clone, Default)]
pub struct Fabric {
    pub instances: Vec<StitchInstance>,
    /// `turns[r]` is set when row `r` ends with a turn
    pub turns: Vec<bool>,
    pub labels: BTreeMap<String, LabelInfo>,
    pub uses: Vec<LabelUse>,
    pub first_id: u64,
    pub next_id: u64,
}

fn parity(turns: &[bool]) -> i64 {
    if turns.iter().filter(|t| **t).count() % 2 == 1 {
        -1
    } else {
        1
    }
}

impl Fabric {
    /// Addressing direction of `row`: -1 after an odd number of turns
    pub fn direction(&self, row: usize) -> i64 {
        parity(self.turns.get(row..).unwrap_or_default())
    }

    /// True if an odd number of turns lies between rows `a` and `b`
    pub fn turned_between(&self, a: usize, b: usize) -> bool {
        let (lo, hi) = (a.min(b), a.max(b).min(self.turns.len()));
        parity(self.turns.get(lo..hi).unwrap_or_default()) < 0
    }

    pub fn owner(&self, id: u64) -> Option<&StitchInstance> {
        owner_of(&self.instances, id).map(|i| &self.instances[i])
    }

    /// Top ids of `row` in emission order
    pub fn row_ids(&self, row: usize) -> impl Iterator<Item = u64> + '_ {
        self.instances
            .iter()
            .filter(move |s| s.row == row)
            .flat_map(|s| s.top_ids.iter().copied())
    }

    /// Whether `id` names a top produced before instance `before`
    pub fn produced_before(&self, id: u64, before: usize) -> bool {
        owner_of(&self.instances[..before.min(self.instances.len())], id).is_some()
    }

    /// Walk `depth - 1` stitches down from `node` through each stitch's
    /// top-to-bottom attachment
    pub fn descend(&self, node: &NodeRef, depth: u32) -> Option<NodeRef> {
        let mut current = node.clone();
        for _ in 1..depth {
            let id = current.concrete()?;
            let below = self.owner(id)?;
            let top = &below.template.tops[below.top_index(id)?];
            let bottom = below.template.bottom_index(top.attach.as_deref()?)?;
            current = below.bottoms.get(bottom)?.clone();
        }
        Some(current)
    }

    /// Stitch counts per row
    pub fn row_summaries(&self) -> Vec<RowSummary> {
        let mut rows: Vec<RowSummary> = (0..self.turns.len())
            .map(|row| RowSummary {
                row,
                counts: BTreeMap::new(),
            })
            .collect();
        for stitch in &self.instances {
            if let Some(summary) = rows.get_mut(stitch.row) {
                *summary.counts.entry(stitch.stitch.clone()).or_default() += 1;
            }
        }
        rows
    }

    /// Id of the `pos`-th top in `row`
    ///
    /// With a `tag`, only tops of that sub-type count. With a `relative` id,
    /// positions count from the first top at or past it in `direction`. A
    /// negative position counts back from the end of the row.
    pub fn find_by_position(
        &self,
        row: usize,
        pos: i64,
        relative: Option<u64>,
        direction: i64,
        tag: Option<&str>,
    ) -> Result<u64> {
        let place = match tag {
            Some(tag) => format!("[row {}, position {}, type {}]", row, pos, tag),
            None => format!("[row {}, position {}]", row, pos),
        };
        let not_found = || CompileError::new(ErrorKind::AddressNotFound, format!("no stitch at {}", place));

        let mut ids: Vec<u64> = self
            .instances
            .iter()
            .filter(|s| s.row == row)
            .flat_map(|s| {
                s.top_ids
                    .iter()
                    .zip(&s.template.tops)
                    .filter(|(_, top)| tag.map_or(true, |t| top.tag == t))
                    .map(|(id, _)| *id)
            })
            .collect();
        if ids.is_empty() {
            return Err(not_found());
        }

        let mut pos = pos;
        if let (Some(relative), Some(tag)) = (relative, tag) {
            let here = self.owner(relative).and_then(|s| s.top_tag(relative));
            // @[sc:@] and @[sc:@+1] both mean the next sc when the cursor is on something else
            if here != Some(tag) && pos > 0 {
                pos -= 1;
            }
        }
        if direction < 0 {
            ids.reverse();
        }
        if let Some(relative) = relative {
            let start = ids
                .iter()
                .position(|&id| if direction < 0 { id <= relative } else { id >= relative })
                .map_or(-1, |i| i as i64);
            pos += start;
            if tag.is_some() && pos < 0 {
                pos = 0;
            }
        }

        let index = if pos < 0 { ids.len() as i64 + pos } else { pos };
        usize::try_from(index)
            .ok()
            .and_then(|i| ids.get(i))
            .copied()
            .ok_or_else(not_found)
    }
}

/// Where the next implicit attachment steps from
#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Last attachment id; may sit one past either end of a row
    position: i64,
    /// Row whose direction the next step follows
    row: Option<usize>,
}

/// A label reference waiting for the resolver
struct Pending {
    key: String,
    group: i64,
    reversed: bool,
    modifiers: LabelModifiers,
}

/// First bottom id of an item, before label resolution
struct Target {
    first: i64,
    pending: Option<Pending>,
}

impl Target {
    fn at(first: i64) -> Self {
        Target {
            first,
            pending: None,
        }
    }
}

/// Builds a [`Fabric`] from parsed rows
pub struct GraphBuilder<'a> {
    registry: &'a mut Registry,
    fabric: Fabric,
    cursor: Cursor,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a mut Registry, options: &CompileOptions) -> Self {
        GraphBuilder {
            registry,
            fabric: Fabric {
                first_id: options.first_id,
                next_id: options.first_id,
                ..Fabric::default()
            },
            cursor: Cursor {
                position: options.first_id as i64 - 1,
                row: None,
            },
        }
    }

    pub fn build(mut self, rows: &Rows) -> Result<Fabric> {
        for (r, row) in rows.rows.iter().enumerate() {
            if r > 0 {
                self.start_row(r);
            }
            for token in row {
                match &token.kind {
                    TokenKind::Turn => {}
                    TokenKind::Seek => {
                        let label_post = match &token.attach.target {
                            Attachment::Label(label) => label.modifiers.post.is_some(),
                            _ => false,
                        };
                        if token.attach.post.is_some() || label_post {
                            return Err(CompileError::syntax("'^' needs a stitch to work around the post", token.span));
                        }
                        let target = self.locate(token)?;
                        self.cursor.position = target.first;
                    }
                    TokenKind::Stitch(name) => self.place(name, token)?,
                }
            }
            self.fabric
                .turns
                .push(row.last().map_or(false, |t| t.kind == TokenKind::Turn));
        }

        log::debug!(
            "placed {} stitch(es), {} top node(s), {} deferred label use(s)",
            self.fabric.instances.len(),
            self.fabric.next_id - self.fabric.first_id,
            self.fabric.uses.len()
        );
        Ok(self.fabric)
    }

    /// A new row works back over the previous one: from its first stitch,
    /// or from its last when the work was turned
    fn start_row(&mut self, row: usize) {
        let previous = row - 1;
        let first = self.fabric.row_ids(previous).next();
        let last = self.fabric.row_ids(previous).last();
        if let (Some(first), Some(last)) = (first, last) {
            self.cursor.position = if self.fabric.turns[previous] {
                last as i64 + 1
            } else {
                first as i64 - 1
            };
        }
        self.cursor.row = Some(previous);
    }

    fn step(&self) -> i64 {
        self.cursor.row.map_or(1, |row| self.fabric.direction(row))
    }

    fn place(&mut self, name: &str, token: &RowToken) -> Result<()> {
        let template = self
            .registry
            .resolve(name)
            .map_err(|e| CompileError::from(e).at(token.span))?;
        let target = self.locate(token)?;

        let sign = match u64::try_from(target.first).ok().and_then(|id| self.fabric.owner(id)) {
            Some(below) => self.fabric.direction(below.row),
            None => parity(&self.fabric.turns),
        };
        let raw: Vec<i64> = (0..template.bottoms.len() as i64)
            .map(|k| target.first + k * sign)
            .collect();
        let pending = target.pending.filter(|_| !raw.is_empty());

        let mut bottoms = Vec::with_capacity(raw.len());
        for &id in &raw {
            match u64::try_from(id) {
                Ok(id) if id >= self.fabric.first_id && id < self.fabric.next_id => bottoms.push(NodeRef::Concrete(id)),
                // Overwritten once the label is resolved
                _ if pending.is_some() => bottoms.push(NodeRef::Concrete(self.fabric.first_id)),
                _ => {
                    return Err(CompileError::address_not_found(
                        format!("'{}' would be worked into stitch {}, which does not exist", name, id),
                        token.span,
                    ));
                }
            }
        }

        if let (Some(which), Some(&first)) = (token.attach.post, raw.first()) {
            let id = first as u64;
            let (post, _) = self
                .fabric
                .owner(id)
                .and_then(|below| below.post_target(id, which.unwrap_or(-1)))
                .ok_or_else(|| {
                    CompileError::address_not_found(
                        format!("stitch {} has no post connection {}", id, which.unwrap_or(-1)),
                        token.span,
                    )
                })?;
            bottoms[0] = post;
        }

        let uid = self.fabric.instances.len();
        let top_ids: Vec<u64> = (0..template.tops.len() as u64).map(|k| self.fabric.next_id + k).collect();
        self.fabric.next_id += top_ids.len() as u64;

        for def in &token.labels {
            self.define_label(def, &top_ids)?;
        }

        match raw.last() {
            Some(&last) => self.cursor.position = last,
            None if token.attach.target != Attachment::Advance => self.cursor.position = target.first,
            None => {}
        }

        if let Some(pending) = pending {
            self.fabric.uses.push(LabelUse {
                instance: uid,
                key: pending.key,
                group: pending.group,
                reversed: pending.reversed,
                modifiers: pending.modifiers,
                span: token.span,
            });
        }

        log::trace!("placed {} #{} tops {:?} bottoms {:?}", name, uid, top_ids, bottoms);
        self.fabric.instances.push(StitchInstance {
            uid,
            stitch: name.to_string(),
            template,
            top_ids,
            bottoms,
            row: token.row,
            color: token.color.clone(),
            labels: token.labels.iter().map(|l| l.key.clone()).collect(),
            attachment: token.raw_attachment.clone(),
            source: token.span.to_range(),
        });
        Ok(())
    }

    fn define_label(&mut self, def: &LabelDef, ids: &[u64]) -> Result<()> {
        match self.fabric.labels.get_mut(&def.key) {
            Some(info) => {
                if info.modifiers != def.modifiers {
                    return Err(CompileError::new(
                        ErrorKind::AmbiguousLabelDefinition,
                        format!(
                            "label '{}' is defined as '{}{}' here but as '{}{}' before",
                            def.key, def.key, def.modifiers, info.key, info.modifiers
                        ),
                    )
                    .at(def.span));
                }
                if info.referenced && !ids.is_empty() {
                    return Err(CompileError::new(
                        ErrorKind::AmbiguousLabelDefinition,
                        format!("label '{}' gains stitches after something was worked into it", def.key),
                    )
                    .at(def.span));
                }
                info.ids.extend_from_slice(ids);
            }
            None => {
                self.fabric.labels.insert(
                    def.key.clone(),
                    LabelInfo {
                        key: def.key.clone(),
                        ids: ids.to_vec(),
                        modifiers: def.modifiers,
                        span: def.span,
                        referenced: false,
                    },
                );
            }
        }
        Ok(())
    }

    fn locate(&mut self, token: &RowToken) -> Result<Target> {
        let span = token.span;
        match &token.attach.target {
            Attachment::Advance => Ok(Target::at(self.cursor.position + self.step())),
            Attachment::Label(reference) => self.locate_label(reference, span),
            Attachment::Absolute { row, pos, stitch_type } => {
                let current = token.row as i64;
                let count = self.fabric.row_ids(token.row).count();
                let mut x = eval_index(&row.replace('%', &current.to_string()), span)?;
                let y = eval_index(&pos.replace('%', &count.to_string()), span)?;
                if x < 0 {
                    x += current;
                }
                let x = usize::try_from(x)
                    .map_err(|_| CompileError::address_not_found(format!("row {} does not exist", x), span))?;
                self.cursor.row = Some(x);
                let direction = if stitch_type.is_some() { self.fabric.direction(x) } else { 1 };
                self.fabric
                    .find_by_position(x, y, None, direction, stitch_type.as_deref())
                    .map(|id| Target::at(id as i64))
                    .map_err(|e| e.or_at(span))
            }
            Attachment::Relative { stitch_type, offset } => {
                let relative = u64::try_from(self.cursor.position).ok();
                let row = relative
                    .and_then(|id| self.fabric.owner(id))
                    .map(|s| s.row)
                    .ok_or_else(|| {
                        CompileError::address_not_found(
                            format!("the attachment cursor ({}) is not on a stitch", self.cursor.position),
                            span,
                        )
                    })?;
                self.cursor.row = Some(row);
                self.fabric
                    .find_by_position(row, *offset, relative, self.fabric.direction(row), stitch_type.as_deref())
                    .map(|id| Target::at(id as i64))
                    .map_err(|e| e.or_at(span))
            }
        }
    }

    fn locate_label(&mut self, reference: &LabelRef, span: Span) -> Result<Target> {
        let (key, index) = self.label_key(reference).ok_or_else(|| {
            CompileError::new(ErrorKind::LabelNotFound, format!("label '{}' is not defined", reference.key)).at(span)
        })?;
        let Some(info) = self.fabric.labels.get_mut(&key) else {
            return Err(CompileError::internal(format!("label '{}' vanished", key)).at(span));
        };
        info.referenced = true;
        let (ids, modifiers) = (info.ids.clone(), info.modifiers.merge(&reference.modifiers));

        let (Some(&last), n) = (ids.last(), ids.len() as i64) else {
            return Err(CompileError::new(
                ErrorKind::LabelNotFound,
                format!("label '{}' is only on stitches without tops", key),
            )
            .at(span));
        };
        let row = self
            .fabric
            .owner(last)
            .map(|s| s.row)
            .ok_or_else(|| CompileError::internal(format!("label '{}' names unknown stitch {}", key, last)).at(span))?;
        self.cursor.row = Some(row);
        let forward = self.fabric.direction(row) > 0;
        let last = last as i64;

        if let Some(i) = index {
            return Ok(Target::at(if forward { last + i - n + 1 } else { last - i }));
        }
        let spread = n > 1 || modifiers.extend.is_some() || modifiers.post.is_some();
        Ok(Target {
            first: if forward { last } else { last - n + 1 },
            pending: spread.then(|| Pending {
                key,
                group: reference.group,
                reversed: reference.reversed,
                modifiers,
            }),
        })
    }

    /// Label key a reference names, falling back from `A[3]` to the third
    /// stitch of `A` when `A[3]` was never defined
    fn label_key(&self, reference: &LabelRef) -> Option<(String, Option<i64>)> {
        if self.fabric.labels.contains_key(&reference.key) {
            return Some((reference.key.clone(), reference.index));
        }
        if reference.index.is_some() {
            return None;
        }
        let (name, selector) = reference.key.strip_suffix(']')?.split_once('[')?;
        let index = selector.trim().parse::<i64>().ok()?;
        self.fabric
            .labels
            .contains_key(name)
            .then(|| (name.to_string(), Some(index)))
    }
}

fn eval_index(expr: &str, span: Span) -> Result<i64> {
    arith::eval_integer(expr)
        .map_err(|e| CompileError::syntax(format!("bad address '{}': {}", expr, e), span))?
        .ok_or_else(|| CompileError::syntax(format!("address '{}' is not a whole number", expr), span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expander::expand_repeats;
    use crate::indices::evaluate_indices;
    use crate::options::DEFAULT_COLOR;
    use crate::parser::parse_rows;
    use crate::span::MappedText;

    fn build(input: &str) -> Result<Fabric> {
        let mut registry = Registry::builtin().unwrap();
        let text = expand_repeats(&MappedText::from_source(input))?;
        let text = evaluate_indices(&text, &registry)?;
        let rows = parse_rows(&text, &BTreeMap::new(), DEFAULT_COLOR)?;
        GraphBuilder::new(&mut registry, &CompileOptions::default()).build(&rows)
    }

    fn bottoms(fabric: &Fabric) -> Vec<Vec<NodeRef>> {
        fabric.instances.iter().map(|s| s.bottoms.clone()).collect()
    }

    fn ids(list: &[u64]) -> Vec<NodeRef> {
        list.iter().map(|id| NodeRef::Concrete(*id)).collect()
    }

    #[test]
    fn test_chain_row() {
        let fabric = build("9ch").unwrap();
        assert_eq!(fabric.instances.len(), 9);
        let tops: Vec<u64> = fabric.instances.iter().flat_map(|s| s.top_ids.clone()).collect();
        assert_eq!(tops, (1..=9).collect::<Vec<_>>());
        assert!(fabric.instances.iter().all(|s| s.bottoms.is_empty() && s.row == 0));
    }

    #[test]
    fn test_turned_row_works_backwards() {
        let fabric = build("3ch,turn\nsk,2sc").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[3], ids(&[3]));
        assert_eq!(b[4], ids(&[2]));
        assert_eq!(b[5], ids(&[1]));
        assert!(fabric.instances[3].top_ids.is_empty());
        assert_eq!(fabric.instances[4].top_ids, vec![4]);
        assert_eq!(fabric.direction(0), -1);
        assert_eq!(fabric.direction(1), 1);
    }

    #[test]
    fn test_unturned_row_works_forwards() {
        let fabric = build("3ch\n3sc").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[3..].to_vec(), vec![ids(&[1]), ids(&[2]), ids(&[3])]);
    }

    #[test]
    fn test_absolute_addresses() {
        let fabric = build("5ch,turn\nsc@[0,1],sc").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[5], ids(&[2]));
        assert_eq!(b[6], ids(&[1]));

        let fabric = build("5ch\nsc@[-1,-1]").unwrap();
        assert_eq!(fabric.instances[5].bottoms, ids(&[5]));

        let fabric = build("4ch,sc@[%,%-1]").unwrap();
        assert_eq!(fabric.instances[4].bottoms, ids(&[4]));
    }

    #[test]
    fn test_typed_addresses() {
        let fabric = build("3ch,turn\nsc,dc,sc,turn\nsc@[dc:1,0],sc@[sc:1,1]").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[6], ids(&[5]));
        assert_eq!(b[7], ids(&[4]));
    }

    #[test]
    fn test_relative_address() {
        let fabric = build("4ch,turn\nsc,sc@[@+1]").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[4], ids(&[4]));
        assert_eq!(b[5], ids(&[3]));
    }

    #[test]
    fn test_seek_moves_cursor() {
        let fabric = build("5ch\n@[0,3],sc").unwrap();
        assert_eq!(fabric.instances[5].bottoms, ids(&[5]));
    }

    #[test]
    fn test_seek_around_post_is_rejected() {
        assert_eq!(build("ch,@[0,0]^").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(build("ch.A,ch
@A^,sc").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_single_stitch_label() {
        let fabric = build("ch,ch.A,ch\nsc@A,sc").unwrap();
        let b = bottoms(&fabric);
        assert_eq!(b[3], ids(&[2]));
        assert_eq!(b[4], ids(&[3]));
        assert!(fabric.uses.is_empty());
        assert!(fabric.labels["A"].referenced);
    }

    #[test]
    fn test_multi_stitch_label_is_deferred() {
        let fabric = build("3ch.A\n3sc@A").unwrap();
        assert_eq!(fabric.labels["A"].ids, vec![1, 2, 3]);
        assert_eq!(fabric.uses.len(), 3);
        assert!(fabric.uses.iter().all(|u| u.key == "A" && u.group == 0));
        assert_eq!(fabric.uses[1].instance, 4);
    }

    #[test]
    fn test_label_offsets() {
        let fabric = build("4ch.A\nsc@A[][2]").unwrap();
        assert_eq!(fabric.instances[4].bottoms, ids(&[3]));
        let fabric = build("4ch.A\nsc@A[1]").unwrap();
        assert_eq!(fabric.instances[4].bottoms, ids(&[2]));
        assert!(fabric.uses.is_empty());
    }

    #[test]
    fn test_post_addressing() {
        let fabric = build("3ch\n3sc\nsc@[1,1]^").unwrap();
        assert_eq!(fabric.instances[6].bottoms, ids(&[2]));

        let fabric = build("3ch\ndc3bobble\nsc@[1,0]^0").unwrap();
        assert_eq!(fabric.instances[4].bottoms, vec![NodeRef::PostAnchor(4, "D".into())]);
    }

    #[test]
    fn test_descend_follows_attachments() {
        let fabric = build("3ch\n3sc\nsc").unwrap();
        assert_eq!(fabric.descend(&NodeRef::Concrete(5), 2), Some(NodeRef::Concrete(2)));
        assert_eq!(fabric.descend(&NodeRef::Concrete(5), 1), Some(NodeRef::Concrete(5)));
        assert_eq!(fabric.descend(&NodeRef::Concrete(2), 2), None);
    }

    #[test]
    fn test_row_summaries() {
        let fabric = build("3ch,turn\nsc,sk,sc").unwrap();
        let rows = fabric.row_summaries();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].counts["ch"], 3);
        assert_eq!(rows[1].counts["sc"], 2);
        assert_eq!(rows[1].counts["sk"], 1);
    }

    #[test]
    fn test_errors() {
        assert_eq!(build("ch\nsc@B").unwrap_err().kind(), ErrorKind::LabelNotFound);

        let err = build("3ch\nzz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStitchType);
        assert_eq!(err.span(), Some(Span::new(4, 6)));

        let err = build("ch\nsc@[0,5]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AddressNotFound);
        assert!(err.message.contains("row 0, position 5"));

        assert_eq!(build("sc").unwrap_err().kind(), ErrorKind::AddressNotFound);
        assert_eq!(build("ch\nsc@[0,0]^3").unwrap_err().kind(), ErrorKind::AddressNotFound);
    }

    #[test]
    fn test_ambiguous_labels() {
        let err = build("ch.A!,ch.A").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousLabelDefinition);
        let err = build("ch.A,sc@A,ch.A").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousLabelDefinition);
        assert!(build("[ch.A]*3,ch.B").is_ok());
    }
}

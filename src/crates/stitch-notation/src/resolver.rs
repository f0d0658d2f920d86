//! Label resolver
//!
//! Stitches worked into a label that spans several stitches are mapped onto
//! the label's tops as a whole. References sharing a label and a `;g` group
//! form one pass; within a pass, references alternating between `@A` and
//! `@A~` form runs, and `~` runs are taken in reverse.
//!
//! A pass with as many bottoms as the label has tops maps one to one. Any
//! other count spreads the bottoms evenly over the label; a bottom landing
//! between two tops becomes an interpolation whose two pulls add up to the
//! length joining those tops.

use stitch_core::{Endpoint, NodeRef};

use crate::ast::{Extend, LabelModifiers, Skip};
use crate::builder::Fabric;
use crate::error::{CompileError, ErrorKind, Result};
use crate::span::Span;

/// Fix every deferred label use, then check that all bottoms point at
/// earlier stitches
pub fn resolve_labels(fabric: &mut Fabric) -> Result<()> {
    let passes = collect_passes(fabric)?;
    for pass in &passes {
        let assignments = map_pass(fabric, pass)?;
        for (instance, bottom, node) in assignments {
            fabric.instances[instance].bottoms[bottom] = node;
        }
    }
    log::debug!("resolved {} label pass(es)", passes.len());
    check_bottoms(fabric)
}

#[derive(Debug)]
struct Pass {
    key: String,
    group: i64,
    modifiers: LabelModifiers,
    /// Runs of instances, flagged when taken in reverse
    runs: Vec<(bool, Vec<usize>)>,
    span: Span,
}

impl Pass {
    fn instances(&self) -> Vec<usize> {
        self.runs
            .iter()
            .flat_map(|(reversed, run)| {
                let mut run = run.clone();
                if *reversed {
                    run.reverse();
                }
                run
            })
            .collect()
    }
}

fn collect_passes(fabric: &Fabric) -> Result<Vec<Pass>> {
    let mut passes: Vec<Pass> = Vec::new();
    for label_use in &fabric.uses {
        let index = match passes
            .iter()
            .position(|p| p.key == label_use.key && p.group == label_use.group)
        {
            Some(index) => index,
            None => {
                passes.push(Pass {
                    key: label_use.key.clone(),
                    group: label_use.group,
                    modifiers: label_use.modifiers,
                    runs: Vec::new(),
                    span: label_use.span,
                });
                passes.len() - 1
            }
        };
        let pass = &mut passes[index];
        if pass.modifiers != label_use.modifiers {
            return Err(CompileError::new(
                ErrorKind::AmbiguousLabelDefinition,
                format!(
                    "stitches worked into '{}' disagree on its modifiers ('{}' and '{}')",
                    pass.key, pass.modifiers, label_use.modifiers
                ),
            )
            .at(label_use.span));
        }
        match pass.runs.last_mut() {
            Some((reversed, run)) if *reversed == label_use.reversed => run.push(label_use.instance),
            _ => pass.runs.push((label_use.reversed, vec![label_use.instance])),
        }
    }
    passes.sort_by_key(|p| (fabric.labels.get(&p.key).and_then(|l| l.ids.first().copied()), p.group));
    Ok(passes)
}

fn ambiguous(message: String, span: Span) -> CompileError {
    CompileError::new(ErrorKind::AmbiguousLabelDefinition, message).at(span)
}

/// New bottoms for every stitch of one pass
fn map_pass(fabric: &Fabric, pass: &Pass) -> Result<Vec<(usize, usize, NodeRef)>> {
    let span = pass.span;
    let label = fabric
        .labels
        .get(&pass.key)
        .ok_or_else(|| CompileError::internal(format!("label '{}' has no definition", pass.key)).at(span))?;
    let (Some(&first), Some(&last)) = (label.ids.first(), label.ids.last()) else {
        return Err(CompileError::new(ErrorKind::LabelNotFound, format!("label '{}' is empty", pass.key)).at(span));
    };
    let modifiers = pass.modifiers;
    let instances = pass.instances();

    let earliest = instances.iter().copied().min().unwrap_or(0);
    let boundary = |id: Option<u64>| -> Result<NodeRef> {
        let id = id.filter(|id| fabric.owner(*id).is_some()).ok_or_else(|| {
            CompileError::address_not_found(
                format!("'+' on label '{}' reaches past the ends of the fabric", pass.key),
                span,
            )
        })?;
        if !fabric.produced_before(id, earliest) {
            return Err(CompileError::address_not_found(
                format!("'+' on label '{}' reaches {}, which is not an earlier stitch", pass.key, id),
                span,
            ));
        }
        Ok(NodeRef::Concrete(id))
    };
    let mut anchors: Vec<NodeRef> = label.ids.iter().map(|id| NodeRef::Concrete(*id)).collect();
    if let Some(Extend::Both | Extend::Left) = modifiers.extend {
        anchors.insert(0, boundary(first.checked_sub(1))?);
    }
    if let Some(Extend::Both | Extend::Right) = modifiers.extend {
        anchors.push(boundary(Some(last + 1))?);
    }

    // Fixed length to interpolate over, for posts around hidden nodes
    let mut post_length = None;
    if let Some(which) = modifiers.post {
        if modifiers.extend.is_some() {
            return Err(CompileError::syntax(
                format!("'^' and '+' cannot be combined on label '{}'", pass.key),
                span,
            ));
        }
        if anchors.len() != 1 {
            return Err(CompileError::syntax(
                format!("'^' needs a label on a single stitch, '{}' has {}", pass.key, anchors.len()),
                span,
            ));
        }
        let which = which.unwrap_or(-1);
        let (target, length) = fabric
            .owner(first)
            .and_then(|s| s.post_target(first, which))
            .ok_or_else(|| {
                CompileError::address_not_found(format!("stitch {} has no post connection {}", first, which), span)
            })?;
        if target.concrete().is_none() {
            post_length = length.value();
        }
        anchors.insert(0, target);
    }

    let bottoms: usize = instances.iter().map(|&i| fabric.instances[i].bottoms.len()).sum();
    let (skipped, mut offset, partial) = match modifiers.skip {
        None => (0, 0, false),
        Some(Skip::Both) => (2, 1, false),
        Some(Skip::First) => (1, 1, true),
        Some(Skip::Last) => (1, 0, true),
    };
    let total = bottoms + skipped;

    let defined_row = fabric.owner(first).map_or(0, |s| s.row);
    let using_row = instances.first().map_or(defined_row, |&i| fabric.instances[i].row);
    if fabric.turned_between(defined_row, using_row) {
        anchors.reverse();
        if partial {
            offset = 1 - offset;
        }
    }

    let n = anchors.len();
    let anchor = |k: usize| {
        anchors
            .get(k)
            .cloned()
            .ok_or_else(|| CompileError::internal(format!("label '{}' has no slot {}", pass.key, k)).at(span))
    };

    let mut assignments = Vec::with_capacity(bottoms);
    let mut slot = 0;
    for &instance in &instances {
        for bottom in 0..fabric.instances[instance].bottoms.len() {
            let node = if n == total {
                anchor(slot + offset)?
            } else {
                let (num, den) = if total > 1 {
                    ((slot + offset) * (n - 1), total - 1)
                } else {
                    (n - 1, 2)
                };
                let (i0, rem) = (num / den, num % den);
                if rem == 0 {
                    anchor(i0)?
                } else {
                    let (a, b) = (anchor(i0)?, anchor(i0 + 1)?);
                    let length = match post_length {
                        Some(length) => length,
                        None => distance(fabric, &a, &b, &pass.key, span)?,
                    };
                    let wa = length * rem as f64 / den as f64;
                    NodeRef::between(a, b, wa, length - wa)
                }
            };
            assignments.push((instance, bottom, node));
            slot += 1;
        }
    }

    log::trace!(
        "label '{}' group {}: {} bottom(s) over {} slot(s)",
        pass.key,
        pass.group,
        bottoms,
        n
    );
    Ok(assignments)
}

/// Length of the yarn joining two neighbouring tops of a label
fn distance(fabric: &Fabric, a: &NodeRef, b: &NodeRef, key: &str, span: Span) -> Result<f64> {
    let (Some(a), Some(b)) = (a.concrete(), b.concrete()) else {
        return Err(ambiguous(format!("cannot measure between {} and {} in label '{}'", a, b, key), span));
    };
    let (low, high) = (a.min(b), a.max(b));
    let above = fabric
        .owner(high)
        .ok_or_else(|| CompileError::internal(format!("stitch {} has no owner", high)).at(span))?;
    let node = |id: u64| above.top_name(id).map(|name| Endpoint::Node(name.to_string()));
    let top = node(high).ok_or_else(|| CompileError::internal(format!("stitch {} has no top", high)).at(span))?;

    let length = if above.owns(low) {
        node(low).and_then(|low| above.template.length_between(&low, &top))
    } else if let Some(index) = above.bottoms.iter().position(|r| *r == NodeRef::Concrete(low)) {
        let bottom = &above.template.bottoms[index];
        if bottom.depth != 1 {
            return Err(ambiguous(
                format!("stitches sharing label '{}' are more than one row apart", key),
                span,
            ));
        }
        above
            .template
            .top_above(&bottom.name)
            .and_then(|t| {
                above
                    .template
                    .length_between(&Endpoint::Node(bottom.name.clone()), &Endpoint::Node(t.name.clone()))
            })
    } else if high - low == 1 {
        above.template.length_between(&Endpoint::Previous, &top)
    } else {
        return Err(ambiguous(
            format!(
                "label '{}' joins stitches {} and {}, which are not adjacent; use separate labels",
                key, low, high
            ),
            span,
        ));
    };

    length.ok_or_else(|| ambiguous(format!("no connection joins stitches {} and {} in label '{}'", low, high, key), span))
}

fn check_bottoms(fabric: &Fabric) -> Result<()> {
    for (index, stitch) in fabric.instances.iter().enumerate() {
        for (bottom, node) in stitch.template.bottoms.iter().zip(&stitch.bottoms) {
            let span = Span::from(stitch.source.clone());
            if !node.ids().iter().all(|id| fabric.produced_before(*id, index)) {
                return Err(CompileError::address_not_found(
                    format!("'{}' is worked into {}, which is not an earlier stitch", stitch.stitch, node),
                    span,
                ));
            }
            if fabric.descend(node, bottom.depth).is_none() {
                return Err(CompileError::address_not_found(
                    format!("'{}' cannot reach {} rows down from {}", stitch.stitch, bottom.depth, node),
                    span,
                ));
            }
        }
    }
    Ok(())
}

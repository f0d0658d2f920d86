//! Concrete placements of stitch templates

use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;

use crate::node_ref::NodeRef;
use crate::template::{Connection, Endpoint, Length, StitchTemplate};

/// One stitch worked into the fabric
#[derive(Debug, Clone, Serialize)]
pub struct StitchInstance {
    /// Position in the instance sequence
    pub uid: usize,
    pub stitch: String,
    #[serde(skip)]
    pub template: Arc<StitchTemplate>,
    /// One id per template top node, contiguous and increasing
    pub top_ids: Vec<u64>,
    /// One reference per template bottom node
    pub bottoms: Vec<NodeRef>,
    pub row: usize,
    pub color: String,
    /// Label keys defined on this stitch
    pub labels: Vec<String>,
    /// Raw attachment text, empty for the implicit cursor advance
    pub attachment: String,
    /// Byte range of the stitch in the pattern source
    pub source: Range<usize>,
}

impl StitchInstance {
    pub fn first_top(&self) -> Option<u64> {
        self.top_ids.first().copied()
    }

    pub fn last_top(&self) -> Option<u64> {
        self.top_ids.last().copied()
    }

    pub fn owns(&self, id: u64) -> bool {
        self.top_index(id).is_some()
    }

    pub fn top_index(&self, id: u64) -> Option<usize> {
        match (self.first_top(), self.last_top()) {
            (Some(first), Some(last)) if (first..=last).contains(&id) => Some((id - first) as usize),
            _ => None,
        }
    }

    /// Template node name of top `id`
    pub fn top_name(&self, id: u64) -> Option<&str> {
        self.top_index(id).map(|i| self.template.tops[i].name.as_str())
    }

    /// Sub-type tag of top `id`
    pub fn top_tag(&self, id: u64) -> Option<&str> {
        self.top_index(id).map(|i| self.template.tops[i].tag.as_str())
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.iter().any(|l| l == key)
    }

    /// Node reached by working around the post of top `id`
    ///
    /// Picks the `which`-th connection (in key order, negative counts from
    /// the end) that runs into that top from a bottom or hidden node and
    /// carries a length. A bottom end resolves to whatever that bottom is
    /// worked into; a hidden end becomes a post anchor. The connection's
    /// length comes along.
    pub fn post_target(&self, id: u64, which: i64) -> Option<(NodeRef, Length)> {
        let top = Endpoint::Node(self.top_name(id)?.to_string());
        let mut incoming: Vec<&Connection> = self
            .template
            .connections
            .iter()
            .filter(|c| c.to == top && !self.template.is_top(&c.from) && c.length.value().is_some())
            .collect();
        incoming.sort_by_key(|c| c.sort_key());

        let index = if which < 0 {
            incoming.len().checked_sub(which.unsigned_abs() as usize)?
        } else {
            which as usize
        };
        let connection = incoming.get(index)?;
        let name = connection.from.name()?;
        let target = match self.template.bottom_index(name) {
            Some(b) => self.bottoms.get(b).cloned()?,
            None => NodeRef::PostAnchor(id, name.to_string()),
        };
        Some((target, connection.length))
    }
}

/// Index of the instance owning top `id`, searching from the newest
pub fn owner_of(instances: &[StitchInstance], id: u64) -> Option<usize> {
    instances.iter().rposition(|s| s.owns(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(uid: usize, stitch: &str, raw: &str, top_ids: Vec<u64>) -> StitchInstance {
        StitchInstance {
            uid,
            stitch: stitch.to_string(),
            template: Arc::new(StitchTemplate::parse(stitch, raw).unwrap()),
            top_ids,
            bottoms: Vec::new(),
            row: 0,
            color: String::new(),
            labels: Vec::new(),
            attachment: String::new(),
            source: 0..0,
        }
    }

    #[test]
    fn test_owner_of_skips_topless_instances() {
        let ch = "&ch^A(ch):~::!-1-A";
        let sk = "&sk^:A~::";
        let picot = "&picot^A(ch);B(ch);C(ch);D(ss):~::!-1-A;A-1-B;B-1-C;C-1-D;!-0.4-D";
        let instances = vec![
            instance(0, "ch", ch, vec![1]),
            instance(1, "sk", sk, vec![]),
            instance(2, "picot3", picot, vec![2, 3, 4, 5]),
            instance(3, "sk", sk, vec![]),
            instance(4, "ch", ch, vec![6]),
        ];
        assert_eq!(owner_of(&instances, 1), Some(0));
        assert_eq!(owner_of(&instances, 4), Some(2));
        assert_eq!(owner_of(&instances, 6), Some(4));
        assert_eq!(owner_of(&instances, 7), None);
        assert_eq!(owner_of(&instances, 0), None);
        assert_eq!(instances[2].top_name(4), Some("C"));
        assert_eq!(instances[2].top_tag(5), Some("ss"));
    }

    #[test]
    fn test_post_target() {
        let sc = "&sc^A(sc):B~A-B::!-1-A;B-1-A";
        let bobble = "&bobble^A(dc):B~A-B:C;D:!-1-A;B-1-C;C-1-A;B-1-D;D-1-A";
        let mut base = instance(0, "sc", sc, vec![3]);
        base.bottoms = vec![NodeRef::Concrete(1)];
        assert_eq!(base.post_target(3, -1), Some((NodeRef::Concrete(1), Length::Value(1.0))));

        let puff = instance(1, "bobble", bobble, vec![4]);
        assert_eq!(puff.post_target(4, 0).map(|t| t.0), Some(NodeRef::PostAnchor(4, "C".into())));
        assert_eq!(puff.post_target(4, -1).map(|t| t.0), Some(NodeRef::PostAnchor(4, "D".into())));
        assert_eq!(puff.post_target(4, 5), None);
        assert_eq!(puff.post_target(9, 0), None);
    }
}

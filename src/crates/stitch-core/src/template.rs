//! Stitch templates and the raw template-spec syntax
//!
//! A raw spec looks like
//! `&description^Tops:Bottoms~Attachments:Hidden:Connections`, for example
//! `&sc^A(sc):B~A-B::!-1-A;B-1-A`:
//!
//! - tops are `Name(tag)` separated by `;`
//! - bottoms are `[depth]Name[front|back[weight]]`
//! - attachments are `Top-Bottom` pairs
//! - hidden nodes are `Name` or `Name(display type)`
//! - connections are `from-length-to`, where `!` names the previously
//!   produced top node, a leading `*` marks a soft connection and a length
//!   of `skip` emits no edge

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, TemplateError};

/// First character of every raw template spec
pub const SPEC_SENTINEL: char = '&';

/// Display type given to hidden nodes declared without one
pub const DEFAULT_HIDDEN_TYPE: &str = "hidden";

/// Which loop of the stitch below a bottom node goes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopSide {
    Front,
    Back,
}

/// Loop-side flag on a bottom node, with an optional explicit weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopFlag {
    pub side: LoopSide,
    pub weight: Option<f64>,
}

impl LoopFlag {
    /// Signed jacobian weight: negative for the front loop, positive for the back
    pub fn jacobian(&self, default_weight: f64) -> f64 {
        let weight = self.weight.unwrap_or(default_weight);
        match self.side {
            LoopSide::Front => -weight,
            LoopSide::Back => weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNode {
    pub name: String,
    /// Sub-type tag, used by typed addressing (`@[sc:@+1]`)
    pub tag: String,
    /// Bottom node this top sits above, if any
    pub attach: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottomNode {
    pub name: String,
    pub depth: u32,
    pub loop_flag: Option<LoopFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenNode {
    pub name: String,
    pub display_type: String,
}

/// One end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    /// `!`: the last top node produced before this stitch
    Previous,
    Node(String),
}

impl Endpoint {
    pub fn name(&self) -> Option<&str> {
        match self {
            Endpoint::Previous => None,
            Endpoint::Node(name) => Some(name),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Previous => write!(f, "!"),
            Endpoint::Node(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Length {
    /// Topological link only, no edge is emitted
    Skip,
    Value(f64),
}

impl Length {
    pub fn value(&self) -> Option<f64> {
        match self {
            Length::Skip => None,
            Length::Value(v) => Some(*v),
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Skip => write!(f, "skip"),
            Length::Value(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: Endpoint,
    pub to: Endpoint,
    pub length: Length,
    /// Soft constraint (`*`); exported as a non-visible internal edge
    pub soft: bool,
}

impl Connection {
    /// Key used to order connections, `*from--to`
    pub fn sort_key(&self) -> String {
        format!("{}{}--{}", if self.soft { "*" } else { "" }, self.from, self.to)
    }

    pub fn joins(&self, a: &Endpoint, b: &Endpoint) -> bool {
        (&self.from == a && &self.to == b) || (&self.from == b && &self.to == a)
    }
}

/// Height/width ratios recorded by rescaled copies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub height: f64,
    pub width: f64,
}

impl Default for Scale {
    fn default() -> Self {
        Scale {
            height: 1.0,
            width: 1.0,
        }
    }
}

/// Role a node name plays inside a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Top,
    Bottom,
    Hidden,
}

/// Immutable stitch definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchTemplate {
    pub name: String,
    pub description: String,
    pub tops: Vec<TopNode>,
    pub bottoms: Vec<BottomNode>,
    pub hidden: Vec<HiddenNode>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub scale: Scale,
}

impl StitchTemplate {
    /// Parse a raw `&...` spec registered under `name`
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        let malformed = |reason: String| TemplateError::Malformed {
            name: name.to_string(),
            reason,
        };

        let body = raw
            .trim()
            .strip_prefix(SPEC_SENTINEL)
            .ok_or_else(|| malformed(format!("spec must start with '{}'", SPEC_SENTINEL)))?;
        let (description, rest) = body
            .split_once('^')
            .ok_or_else(|| malformed("missing '^' after the description".to_string()))?;

        let fields: Vec<&str> = rest.split(':').collect();
        if fields.len() != 4 {
            return Err(malformed(format!(
                "expected 4 ':'-separated sections after '^', found {}",
                fields.len()
            )));
        }
        let (bottom_field, attach_field) = fields[1].split_once('~').unwrap_or((fields[1], ""));

        let mut tops = Vec::new();
        for item in list(fields[0]) {
            let (node, tag) = split_type(item);
            let tag = tag.ok_or_else(|| malformed(format!("top node '{}' needs a type, e.g. A(sc)", item)))?;
            tops.push(TopNode {
                name: node.to_string(),
                tag: tag.to_string(),
                attach: None,
            });
        }

        let bottoms = list(bottom_field)
            .map(|item| parse_bottom(item).map_err(&malformed))
            .collect::<Result<Vec<_>>>()?;

        let hidden = list(fields[2])
            .map(|item| {
                let (node, display) = split_type(item);
                HiddenNode {
                    name: node.to_string(),
                    display_type: display.unwrap_or(DEFAULT_HIDDEN_TYPE).to_string(),
                }
            })
            .collect();

        let mut template = StitchTemplate {
            name: name.to_string(),
            description: description.trim().to_string(),
            tops,
            bottoms,
            hidden,
            connections: Vec::new(),
            scale: Scale::default(),
        };

        for pair in list(attach_field) {
            let (top, bottom) = pair
                .split_once('-')
                .ok_or_else(|| malformed(format!("attachment '{}' must look like Top-Bottom", pair)))?;
            if template.role(bottom) != Some(NodeRole::Bottom) {
                return Err(malformed(format!("attachment '{}' names unknown bottom '{}'", pair, bottom)));
            }
            let node = template
                .tops
                .iter_mut()
                .find(|t| t.name == top)
                .ok_or_else(|| malformed(format!("attachment '{}' names unknown top '{}'", pair, top)))?;
            node.attach = Some(bottom.to_string());
        }

        for item in list(fields[3]) {
            let connection = parse_connection(item).map_err(&malformed)?;
            for end in [&connection.from, &connection.to] {
                if let Endpoint::Node(node) = end {
                    if template.role(node).is_none() {
                        return Err(malformed(format!("connection '{}' names unknown node '{}'", item, node)));
                    }
                }
            }
            template.connections.push(connection);
        }

        Ok(template)
    }

    pub fn role(&self, node: &str) -> Option<NodeRole> {
        if self.tops.iter().any(|t| t.name == node) {
            Some(NodeRole::Top)
        } else if self.bottoms.iter().any(|b| b.name == node) {
            Some(NodeRole::Bottom)
        } else if self.hidden.iter().any(|h| h.name == node) {
            Some(NodeRole::Hidden)
        } else {
            None
        }
    }

    /// `!` counts as a top node: it is the previous stitch's top
    pub fn is_top(&self, end: &Endpoint) -> bool {
        match end {
            Endpoint::Previous => true,
            Endpoint::Node(node) => self.role(node) == Some(NodeRole::Top),
        }
    }

    pub fn is_bottom(&self, end: &Endpoint) -> bool {
        matches!(end, Endpoint::Node(node) if self.role(node) == Some(NodeRole::Bottom))
    }

    pub fn top_index(&self, node: &str) -> Option<usize> {
        self.tops.iter().position(|t| t.name == node)
    }

    pub fn bottom_index(&self, node: &str) -> Option<usize> {
        self.bottoms.iter().position(|b| b.name == node)
    }

    /// Length of the connection joining `a` and `b`, in either orientation
    pub fn length_between(&self, a: &Endpoint, b: &Endpoint) -> Option<f64> {
        self.connections
            .iter()
            .find(|c| c.joins(a, b))
            .and_then(|c| c.length.value())
    }

    /// Top node sitting above `bottom`, or the first top when none claims it
    pub fn top_above(&self, bottom: &str) -> Option<&TopNode> {
        self.tops
            .iter()
            .find(|t| t.attach.as_deref() == Some(bottom))
            .or_else(|| self.tops.first())
    }

    /// Render the template back to raw spec syntax
    pub fn to_spec(&self) -> String {
        let tops: Vec<String> = self.tops.iter().map(|t| format!("{}({})", t.name, t.tag)).collect();
        let bottoms: Vec<String> = self
            .bottoms
            .iter()
            .map(|b| {
                let depth = if b.depth > 1 { b.depth.to_string() } else { String::new() };
                let flag = match &b.loop_flag {
                    None => String::new(),
                    Some(flag) => {
                        let side = match flag.side {
                            LoopSide::Front => "front",
                            LoopSide::Back => "back",
                        };
                        let weight = flag.weight.map(|w| w.to_string()).unwrap_or_default();
                        format!("[{}{}]", side, weight)
                    }
                };
                format!("{}{}{}", depth, b.name, flag)
            })
            .collect();
        let attachments: Vec<String> = self
            .tops
            .iter()
            .filter_map(|t| t.attach.as_ref().map(|b| format!("{}-{}", t.name, b)))
            .collect();
        let hidden: Vec<String> = self
            .hidden
            .iter()
            .map(|h| {
                if h.display_type == DEFAULT_HIDDEN_TYPE {
                    h.name.clone()
                } else {
                    format!("{}({})", h.name, h.display_type)
                }
            })
            .collect();
        let connections: Vec<String> = self
            .connections
            .iter()
            .map(|c| format!("{}{}-{}-{}", if c.soft { "*" } else { "" }, c.from, c.length, c.to))
            .collect();

        format!(
            "{}{}^{}:{}~{}:{}:{}",
            SPEC_SENTINEL,
            self.description,
            tops.join(";"),
            bottoms.join(";"),
            attachments.join(";"),
            hidden.join(";"),
            connections.join(";")
        )
    }
}

fn list(field: &str) -> impl Iterator<Item = &str> {
    field.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// `A(sc)` -> (`A`, Some(`sc`))
fn split_type(item: &str) -> (&str, Option<&str>) {
    match item.split_once('(') {
        Some((node, rest)) => (node.trim(), Some(rest.trim_end_matches(')').trim())),
        None => (item, None),
    }
}

fn parse_bottom(item: &str) -> std::result::Result<BottomNode, String> {
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    let depth = if digits == 0 {
        1
    } else {
        item[..digits]
            .parse::<u32>()
            .map_err(|e| format!("bad depth in bottom node '{}': {}", item, e))?
    };
    if depth == 0 {
        return Err(format!("bottom node '{}' has depth 0", item));
    }
    let rest = &item[digits..];

    let (node, loop_flag) = match rest.split_once('[') {
        None => (rest, None),
        Some((node, flag)) => {
            let flag = flag
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated loop flag in '{}'", item))?;
            let (side, weight) = if let Some(w) = flag.strip_prefix("front") {
                (LoopSide::Front, w)
            } else if let Some(w) = flag.strip_prefix("back") {
                (LoopSide::Back, w)
            } else {
                return Err(format!("loop flag in '{}' must be front or back", item));
            };
            let weight = if weight.is_empty() {
                None
            } else {
                Some(
                    weight
                        .parse::<f64>()
                        .map_err(|e| format!("bad loop weight in '{}': {}", item, e))?,
                )
            };
            (node, Some(LoopFlag { side, weight }))
        }
    };

    if node.is_empty() {
        return Err(format!("bottom node '{}' has no name", item));
    }

    Ok(BottomNode {
        name: node.to_string(),
        depth,
        loop_flag,
    })
}

fn parse_connection(item: &str) -> std::result::Result<Connection, String> {
    let (soft, body) = match item.strip_prefix('*') {
        Some(body) => (true, body),
        None => (false, item),
    };
    let parts: Vec<&str> = body.split('-').collect();
    if parts.len() != 3 {
        return Err(format!("connection '{}' must look like from-length-to", item));
    }
    let endpoint = |name: &str| {
        if name == "!" {
            Endpoint::Previous
        } else {
            Endpoint::Node(name.to_string())
        }
    };
    let length = if parts[1] == "skip" {
        Length::Skip
    } else {
        let value = parts[1]
            .parse::<f64>()
            .map_err(|e| format!("bad length in connection '{}': {}", item, e))?;
        if value < 0.0 || !value.is_finite() {
            return Err(format!("length in connection '{}' must be a non-negative number", item));
        }
        Length::Value(value)
    };
    Ok(Connection {
        from: endpoint(parts[0]),
        to: endpoint(parts[2]),
        length,
        soft,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_crochet() {
        let sc = StitchTemplate::parse("sc", "&sc^A(sc):B~A-B::!-1-A;B-1-A").unwrap();
        assert_eq!(sc.description, "sc");
        assert_eq!(sc.tops.len(), 1);
        assert_eq!(sc.tops[0].tag, "sc");
        assert_eq!(sc.tops[0].attach.as_deref(), Some("B"));
        assert_eq!(sc.bottoms[0].depth, 1);
        assert_eq!(sc.connections.len(), 2);
        assert_eq!(sc.connections[0].from, Endpoint::Previous);
        assert_eq!(sc.length_between(&Endpoint::Node("B".into()), &Endpoint::Node("A".into())), Some(1.0));
    }

    #[test]
    fn test_parse_skip_has_no_tops() {
        let sk = StitchTemplate::parse("sk", "&sk^:A~::").unwrap();
        assert!(sk.tops.is_empty());
        assert_eq!(sk.bottoms.len(), 1);
        assert!(sk.connections.is_empty());
    }

    #[test]
    fn test_parse_loop_flags_and_depth() {
        let t = StitchTemplate::parse("x", "&x^A(x):2B[front0.3];C[back]~A-B::B-1-A;C-1-A").unwrap();
        assert_eq!(t.bottoms[0].depth, 2);
        assert_eq!(t.bottoms[0].loop_flag.unwrap().jacobian(0.2), -0.3);
        assert_eq!(t.bottoms[1].loop_flag.unwrap().jacobian(0.2), 0.2);
    }

    #[test]
    fn test_parse_hidden_and_soft() {
        let t = StitchTemplate::parse("p", "&p^A(p):B~A-B:C;D(ch):!-1-A;*B-0.5-C;C-skip-D;D-1-A").unwrap();
        assert_eq!(t.hidden[0].display_type, DEFAULT_HIDDEN_TYPE);
        assert_eq!(t.hidden[1].display_type, "ch");
        assert!(t.connections[1].soft);
        assert_eq!(t.connections[2].length, Length::Skip);
        assert_eq!(t.role("C"), Some(NodeRole::Hidden));
    }

    #[test]
    fn test_parse_rejects_untyped_top() {
        let err = StitchTemplate::parse("bad", "&bad^A:B~A-B::B-1-A").unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_connection_node() {
        assert!(StitchTemplate::parse("bad", "&bad^A(x):B~A-B::Z-1-A").is_err());
        assert!(StitchTemplate::parse("bad", "sc^A(x):B~A-B::B-1-A").is_err());
    }

    #[test]
    fn test_to_spec_reparses() {
        let raw = "&a dc bobble^A(dc3bobble):B[back0.4]~A-B:C;D(ch):!-1-A;B-0.7-C;*C-0.8-D;D-skip-A";
        let t = StitchTemplate::parse("dc3bobble", raw).unwrap();
        let again = StitchTemplate::parse("dc3bobble", &t.to_spec()).unwrap();
        assert_eq!(t, again);
    }
}

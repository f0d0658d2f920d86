//! Generative stitch variants: N-together, N-increase and rescaled copies
//!
//! Variants are always derived from a base template, never hand-written.
//! `sc3tog` merges three bottom slots under one top, `sc3inc` works three
//! tops into one bottom, and `Copy(dc,3)` stretches every connection that
//! crosses from top to bottom.

use crate::template::{Connection, Endpoint, Length, Scale, StitchTemplate};
use crate::{Result, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Together,
    Increase,
}

/// Split a name such as `dc3bobble2tog` into (`dc3bobble`, 2, Together)
pub fn parse_variant_name(name: &str) -> Option<(&str, usize, VariantKind)> {
    let (stem, kind) = if let Some(stem) = name.strip_suffix("tog") {
        (stem, VariantKind::Together)
    } else if let Some(stem) = name.strip_suffix("inc") {
        (stem, VariantKind::Increase)
    } else {
        return None;
    };
    let base = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.is_empty() || base.len() == stem.len() {
        return None;
    }
    let count = stem[base.len()..].parse::<usize>().ok()?;
    Some((base, count, kind))
}

/// Build the variant described by `kind` from `base`
pub fn derive(base: &StitchTemplate, name: &str, count: usize, kind: VariantKind) -> Result<StitchTemplate> {
    if count == 0 {
        return Err(unsynthesizable(name, "the repeat count must be at least 1"));
    }
    match kind {
        VariantKind::Together => together(base, name, count),
        VariantKind::Increase => increase(base, name, count),
    }
}

/// N bottoms worked together into a single top
pub fn together(base: &StitchTemplate, name: &str, count: usize) -> Result<StitchTemplate> {
    if base.tops.len() > 1 {
        return Err(unsynthesizable(
            name,
            format!("'{}' has {} top nodes; only single-top stitches can be worked together", base.name, base.tops.len()),
        ));
    }
    let top_name = base.tops.first().map(|t| t.name.clone());

    let mut variant = StitchTemplate {
        name: name.to_string(),
        description: format!("{} {} together", base.description, count),
        tops: base.tops.clone(),
        bottoms: Vec::with_capacity(base.bottoms.len() * count),
        hidden: Vec::with_capacity(base.hidden.len() * count),
        connections: Vec::new(),
        scale: base.scale,
    };

    for copy in 0..count {
        for bottom in &base.bottoms {
            let mut bottom = bottom.clone();
            bottom.name = suffixed(&bottom.name, copy);
            variant.bottoms.push(bottom);
        }
        for hidden in &base.hidden {
            let mut hidden = hidden.clone();
            hidden.name = suffixed(&hidden.name, copy);
            variant.hidden.push(hidden);
        }
        for connection in &base.connections {
            let rename = |end: &Endpoint| match end {
                Endpoint::Node(node) if Some(node) != top_name.as_ref() => Endpoint::Node(suffixed(node, copy)),
                other => other.clone(),
            };
            push_unique(
                &mut variant.connections,
                Connection {
                    from: rename(&connection.from),
                    to: rename(&connection.to),
                    ..connection.clone()
                },
            );
        }
    }

    for top in &mut variant.tops {
        if let Some(bottom) = &top.attach {
            top.attach = Some(suffixed(bottom, count - 1));
        }
    }

    Ok(variant)
}

/// N tops worked into a single bottom
pub fn increase(base: &StitchTemplate, name: &str, count: usize) -> Result<StitchTemplate> {
    if base.bottoms.len() > 1 {
        return Err(unsynthesizable(
            name,
            format!(
                "'{}' has {} bottom nodes; only single-bottom stitches can be increased",
                base.name,
                base.bottoms.len()
            ),
        ));
    }
    let bottom_name = base.bottoms.first().map(|b| b.name.clone());
    let last_top = base.tops.last().map(|t| t.name.clone());

    let mut variant = StitchTemplate {
        name: name.to_string(),
        description: format!("{} {} in one", base.description, count),
        tops: Vec::with_capacity(base.tops.len() * count),
        bottoms: base.bottoms.clone(),
        hidden: Vec::with_capacity(base.hidden.len() * count),
        connections: Vec::new(),
        scale: base.scale,
    };

    for copy in 0..count {
        for top in &base.tops {
            let mut top = top.clone();
            top.name = suffixed(&top.name, copy);
            variant.tops.push(top);
        }
        for hidden in &base.hidden {
            let mut hidden = hidden.clone();
            hidden.name = suffixed(&hidden.name, copy);
            variant.hidden.push(hidden);
        }
        for connection in &base.connections {
            let rename = |end: &Endpoint| match end {
                Endpoint::Previous => match &last_top {
                    Some(last) if copy > 0 => Endpoint::Node(suffixed(last, copy - 1)),
                    _ => Endpoint::Previous,
                },
                Endpoint::Node(node) if Some(node) == bottom_name.as_ref() => end.clone(),
                Endpoint::Node(node) => Endpoint::Node(suffixed(node, copy)),
            };
            push_unique(
                &mut variant.connections,
                Connection {
                    from: rename(&connection.from),
                    to: rename(&connection.to),
                    ..connection.clone()
                },
            );
        }
    }

    Ok(variant)
}

/// Copy of `base` whose top-to-bottom lengths are multiplied by `height`
/// and top-to-top lengths by `width`; a negative factor keeps that axis
pub fn rescale(base: &StitchTemplate, name: &str, height: f64, width: f64) -> Result<StitchTemplate> {
    if !base.hidden.is_empty() {
        return Err(unsynthesizable(
            name,
            format!("'{}' has hidden nodes and cannot be rescaled", base.name),
        ));
    }

    let connections = base
        .connections
        .iter()
        .map(|c| {
            let (top0, top1) = (base.is_top(&c.from), base.is_top(&c.to));
            let (bottom0, bottom1) = (base.is_bottom(&c.from), base.is_bottom(&c.to));
            let factor = if (top0 && bottom1) || (top1 && bottom0) {
                height
            } else if top0 && top1 {
                width
            } else {
                -1.0
            };
            let length = match c.length {
                Length::Value(v) if factor >= 0.0 => Length::Value(v * factor),
                other => other,
            };
            Connection { length, ..c.clone() }
        })
        .collect();

    let mut tops = base.tops.clone();
    for top in &mut tops {
        if top.tag == base.name {
            top.tag = name.to_string();
        }
    }

    let ratio = |factor: f64| if factor < 0.0 { 1.0 } else { factor };
    Ok(StitchTemplate {
        name: name.to_string(),
        description: base.description.clone(),
        tops,
        bottoms: base.bottoms.clone(),
        hidden: Vec::new(),
        connections,
        scale: Scale {
            height: base.scale.height * ratio(height),
            width: base.scale.width * ratio(width),
        },
    })
}

fn suffixed(name: &str, copy: usize) -> String {
    format!("{}{}", name, copy)
}

fn push_unique(connections: &mut Vec<Connection>, connection: Connection) {
    if !connections
        .iter()
        .any(|c| c.from == connection.from && c.to == connection.to)
    {
        connections.push(connection);
    }
}

fn unsynthesizable(name: &str, reason: impl Into<String>) -> TemplateError {
    TemplateError::Unsynthesizable {
        name: name.to_string(),
        reason: reason.into(),
    }
}

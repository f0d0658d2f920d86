use serde::{Deserialize, Serialize};

/// Color given to stitches before any `COLOR:` directive
pub const DEFAULT_COLOR: &str = "#969696";

/// Tunables for a compile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Id of the first produced top node
    pub first_id: u64,
    pub default_color: String,
    /// Jacobian weight for `front`/`back` bottoms without an explicit weight
    pub default_loop_weight: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            first_id: 1,
            default_color: DEFAULT_COLOR.to_string(),
            default_loop_weight: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: CompileOptions = serde_json::from_str(r#"{"default_color":"red"}"#).unwrap();
        assert_eq!(options.default_color, "red");
        assert_eq!(options.first_id, 1);
        assert_eq!(options.default_loop_weight, 0.2);
    }
}

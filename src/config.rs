use serde::{Deserialize, Serialize};

/// Evaluation limits.
///
/// The frame cap bounds the evaluator's explicit work stack so runaway
/// recursion surfaces as a depth-error value instead of exhausting the host
/// stack; the token cap bounds lexer output for pathological cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_frames() -> usize {
    512
}

fn default_max_tokens() -> usize {
    65_536
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EvalConfig::default();
        assert_eq!(config.max_frames, 512);
        assert_eq!(config.max_tokens, 65_536);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EvalConfig = serde_json::from_str(r#"{"max_frames": 64}"#).unwrap();
        assert_eq!(config.max_frames, 64);
        assert_eq!(config.max_tokens, 65_536);
    }
}

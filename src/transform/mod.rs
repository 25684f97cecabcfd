use crate::config::types::{TransformOpConfig, TransformSeqConfig};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid regex in transform op: {0}")]
    InvalidRegex(#[from] regex::Error),
}

enum CompiledOp {
    Replace { pattern: Regex, template: String },
    MatchOrDefault { pattern: Regex, default: String },
}

/// A compiled, ordered sequence of transform operations for one capture
/// position, as declared under `transforms` in a log group.
pub struct Transform {
    ops: Vec<CompiledOp>,
    replace_only_one: bool,
    log_default_assign: bool,
}

/// The outcome of applying a transform: the rewritten value, plus whether a
/// `match_or_default` fired (so the caller can log it when requested).
pub struct Applied {
    pub value: String,
    pub default_fired: bool,
}

impl Transform {
    pub fn compile(config: &TransformSeqConfig) -> Result<Self, TransformError> {
        let mut ops = Vec::with_capacity(config.ops.len());
        for op in &config.ops {
            ops.push(match op {
                TransformOpConfig::Replace { pattern, template } => CompiledOp::Replace {
                    pattern: Regex::new(pattern)?,
                    template: template.clone(),
                },
                TransformOpConfig::MatchOrDefault { pattern, default } => {
                    CompiledOp::MatchOrDefault {
                        pattern: Regex::new(pattern)?,
                        default: default.clone(),
                    }
                }
            });
        }
        Ok(Self {
            ops,
            replace_only_one: config.replace_only_one,
            log_default_assign: config.log_default_assign,
        })
    }

    /// Apply every op in declared order to `raw`, returning the final value.
    pub fn apply(&self, raw: &str) -> Applied {
        let mut current = raw.to_string();
        let mut replaced_once = false;
        let mut default_fired = false;

        for op in &self.ops {
            match op {
                CompiledOp::Replace { pattern, template } => {
                    if self.replace_only_one && replaced_once {
                        continue;
                    }
                    if let Some(captures) = pattern.captures(&current) {
                        current = expand_placeholders(template, &captures);
                        replaced_once = true;
                    }
                }
                CompiledOp::MatchOrDefault { pattern, default } => {
                    if !pattern.is_match(&current) {
                        current = default.clone();
                        default_fired = true;
                        if self.log_default_assign {
                            tracing::warn!(
                                value = %raw,
                                default = %default,
                                "match_or_default fired, substituting default value"
                            );
                        }
                    }
                }
            }
        }

        Applied {
            value: current,
            default_fired,
        }
    }
}

/// Expand `{N}` placeholders in `template` against the numbered capture
/// groups of a single regex match. `{0}` is the whole match.
fn expand_placeholders(template: &str, captures: &regex::Captures) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(end) = template[i + 1..].find('}') {
                let digits = &template[i + 1..i + 1 + end];
                if let Ok(index) = digits.parse::<usize>() {
                    if let Some(m) = captures.get(index) {
                        out.push_str(m.as_str());
                    }
                    for _ in 0..=end {
                        chars.next();
                    }
                    continue;
                }
            }
            out.push(c);
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(ops: Vec<TransformOpConfig>, replace_only_one: bool, log_default_assign: bool) -> Transform {
        Transform::compile(&TransformSeqConfig {
            ops,
            replace_only_one,
            log_default_assign,
        })
        .unwrap()
    }

    #[test]
    fn test_replace_expands_placeholders() {
        let t = seq(
            vec![TransformOpConfig::Replace {
                pattern: r"^(\w+)-(\d+)$".to_string(),
                template: "{2}/{1}".to_string(),
            }],
            false,
            false,
        );
        let applied = t.apply("host-42");
        assert_eq!(applied.value, "42/host");
        assert!(!applied.default_fired);
    }

    #[test]
    fn test_replace_no_match_leaves_value_unchanged() {
        let t = seq(
            vec![TransformOpConfig::Replace {
                pattern: r"^\d+$".to_string(),
                template: "numeric".to_string(),
            }],
            false,
            false,
        );
        let applied = t.apply("not-numeric");
        assert_eq!(applied.value, "not-numeric");
    }

    #[test]
    fn test_match_or_default_fires() {
        let t = seq(
            vec![TransformOpConfig::MatchOrDefault {
                pattern: r"^\d+$".to_string(),
                default: "0".to_string(),
            }],
            false,
            false,
        );
        let applied = t.apply("abc");
        assert_eq!(applied.value, "0");
        assert!(applied.default_fired);
    }

    #[test]
    fn test_match_or_default_does_not_fire_on_match() {
        let t = seq(
            vec![TransformOpConfig::MatchOrDefault {
                pattern: r"^\d+$".to_string(),
                default: "0".to_string(),
            }],
            false,
            false,
        );
        let applied = t.apply("123");
        assert_eq!(applied.value, "123");
        assert!(!applied.default_fired);
    }

    #[test]
    fn test_replace_only_one_suppresses_later_replace() {
        let t = seq(
            vec![
                TransformOpConfig::Replace {
                    pattern: r"^a$".to_string(),
                    template: "first".to_string(),
                },
                TransformOpConfig::Replace {
                    pattern: r"^first$".to_string(),
                    template: "second".to_string(),
                },
            ],
            true,
            false,
        );
        let applied = t.apply("a");
        assert_eq!(applied.value, "first");
    }

    #[test]
    fn test_replace_only_one_does_not_suppress_match_or_default() {
        let t = seq(
            vec![
                TransformOpConfig::Replace {
                    pattern: r"^a$".to_string(),
                    template: "first".to_string(),
                },
                TransformOpConfig::MatchOrDefault {
                    pattern: r"^nope$".to_string(),
                    default: "fallback".to_string(),
                },
            ],
            true,
            false,
        );
        let applied = t.apply("a");
        assert_eq!(applied.value, "fallback");
        assert!(applied.default_fired);
    }
}

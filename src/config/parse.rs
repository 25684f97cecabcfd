use super::types::*;
use crate::config::expand_tilde;
use regex::Regex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("log group '{group}': invalid regex at pattern index {index}: {source}")]
    InvalidPattern {
        group: String,
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("log group '{group}': invalid filename_match_re: {source}")]
    InvalidFilenameRegex {
        group: String,
        #[source]
        source: regex::Error,
    },

    #[error("log group '{group}': capture index {index} referenced by '{field}' exceeds expected_matches ({expected})")]
    CaptureIndexOutOfRange {
        group: String,
        field: String,
        index: usize,
        expected: usize,
    },

    #[error("log group '{group}': binding '{tag}' has multiply=0, which is not allowed")]
    ZeroMultiply { group: String, tag: String },

    #[error("log group '{group}': binding '{tag}' has divide=0, which is not allowed")]
    ZeroDivide { group: String, tag: String },

    #[error("log group '{group}': goroutines must be >= 1")]
    ZeroShards { group: String },

    #[error("log group '{group}': no glob patterns declared")]
    NoGlobs { group: String },

    #[error("log group '{group}': no match patterns declared")]
    NoPatterns { group: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate a config file from disk.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = expand_tilde(path.as_ref());
    let file = File::open(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let config: Config = serde_yaml::from_reader(reader)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate a config document: every capture index referenced by tags,
/// metrics or the date position must be within `expected_matches`, patterns
/// must compile, and numeric invariants on metric bindings must hold.
pub fn validate_config(config: &Config) -> Result<()> {
    for (name, group) in &config.log_groups {
        if group.globs.is_empty() {
            return Err(ConfigError::NoGlobs { group: name.clone() });
        }
        if group.patterns.is_empty() {
            return Err(ConfigError::NoPatterns { group: name.clone() });
        }
        for (index, pattern) in group.patterns.iter().enumerate() {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                group: name.clone(),
                index,
                source,
            })?;
        }
        if let Some(pattern) = &group.filename_match_re {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidFilenameRegex {
                group: name.clone(),
                source,
            })?;
        }
        if group.goroutines == 0 {
            return Err(ConfigError::ZeroShards { group: name.clone() });
        }

        check_index(name, "date_position", group.date_position, group.expected_matches)?;

        for tag_value in group.tags.values() {
            if let TagValue::Capture(index) = tag_value {
                check_index(name, "tags", *index, group.expected_matches)?;
            }
        }

        for (position, bindings) in &group.metrics {
            check_index(name, "metrics", *position, group.expected_matches)?;
            for binding in bindings {
                if binding.multiply == 0 {
                    return Err(ConfigError::ZeroMultiply {
                        group: name.clone(),
                        tag: binding.tag.clone(),
                    });
                }
                if binding.divide == 0 {
                    return Err(ConfigError::ZeroDivide {
                        group: name.clone(),
                        tag: binding.tag.clone(),
                    });
                }
                for (_, op_index) in &binding.operations {
                    check_index(name, "operations", *op_index, group.expected_matches)?;
                }
            }
        }

        for position in group.transforms.keys() {
            check_index(name, "transforms", *position, group.expected_matches)?;
        }
    }
    Ok(())
}

fn check_index(group: &str, field: &str, index: usize, expected: usize) -> Result<()> {
    if index > expected {
        return Err(ConfigError::CaptureIndexOutOfRange {
            group: group.to_string(),
            field: field.to_string(),
            index,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_yaml() -> &'static str {
        r#"
settings:
  push_host: 127.0.0.1
  push_port: 4242
log_groups:
  hits:
    globs: ["/var/log/app.log"]
    patterns: ["^(\\d+) (\\d+)$"]
    expected_matches: 2
    date_position: 1
    date_format: "epoch"
    key_prefix: "my"
    metrics:
      0:
        - tag: hits
          metric_type: counter
          key_suffix: hits
"#
    }

    #[test]
    fn test_load_minimal_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_yaml()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.settings.push_port, 4242);
        assert!(config.log_groups.contains_key("hits"));
    }

    #[test]
    fn test_capture_index_out_of_range() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let group = config.log_groups.get_mut("hits").unwrap();
        group.date_position = 99;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::CaptureIndexOutOfRange { .. }));
    }

    #[test]
    fn test_zero_multiply_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let group = config.log_groups.get_mut("hits").unwrap();
        let bindings = group.metrics.get_mut(&0).unwrap();
        bindings[0].multiply = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMultiply { .. }));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let group = config.log_groups.get_mut("hits").unwrap();
        group.patterns[0] = "(unclosed".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let group = config.log_groups.get_mut("hits").unwrap();
        group.goroutines = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroShards { .. }));
    }

    #[test]
    fn test_empty_globs_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let group = config.log_groups.get_mut("hits").unwrap();
        group.globs = vec![];
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::NoGlobs { .. }));
    }
}

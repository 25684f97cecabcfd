use std::fs;
use std::io;
use std::path::PathBuf;

/// A minimal, valid starter config: one log group counting lines matching
/// `<unix-seconds> <status>` and tagging by status code. Meant to be edited,
/// not run as-is.
pub fn generate_starter_config() -> String {
    r#"settings:
  poll_interval: 5
  push_host: 127.0.0.1
  push_port: 4242
  push_proto: tcp
  push_type: tsd
  push_wait: 5
  push_number: 1
  stats_interval: 60

log_groups:
  requests:
    globs:
      - "/var/log/myapp/access.log"
    patterns:
      - '^(\d+) (\d+)$'
    expected_matches: 2
    date_position: 1
    date_format: unix
    key_prefix: myapp.requests
    tags:
      status: 2
    metrics:
      0:
        - tag: hits
          metric_type: counter
          key_suffix: hits
    interval_seconds: 60
    goroutines: 1
    stale_threshold_minutes: 15
    ewma_interval_seconds: 5
    parse_from_start: false
    fail_regex_warn: true
"#
    .to_string()
}

/// `logmetrics-collector config init [--stdout]`: print the starter config,
/// or write it to `~/.config/logmetrics-collector/config.yml` (falling back
/// to `/etc/logmetrics-collector/config.yml` if no home directory can be
/// resolved).
pub fn init(stdout: bool) -> io::Result<()> {
    let content = generate_starter_config();

    if stdout {
        print!("{content}");
        return Ok(());
    }

    let path = default_write_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    println!("Wrote starter config to {}", path.display());
    Ok(())
}

fn default_write_path() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join(".config/logmetrics-collector/config.yml");
    }
    PathBuf::from("/etc/logmetrics-collector/config.yml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::validate_config;

    #[test]
    fn test_starter_config_parses_and_validates() {
        let content = generate_starter_config();
        let config: crate::config::types::Config = serde_yaml::from_str(&content).unwrap();
        validate_config(&config).expect("starter config should be valid");
        assert!(config.log_groups.contains_key("requests"));
    }
}

pub mod shard;

use crate::config::types::{ArithOp, LogGroupConfig, MetricType, TagValue, ValueFormat};
use crate::transform::{Transform, TransformError};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to compile transform at position {position}: {source}")]
    Transform {
        position: usize,
        #[source]
        source: TransformError,
    },

    #[error("capture index {0} referenced but not present in the matched tuple")]
    MissingCapture(usize),

    #[error("could not parse '{value}' as timestamp with format '{format}'")]
    TimestampParse { value: String, format: String },

    #[error("could not parse '{value}' as a {format:?} metric value")]
    ValueParse { value: String, format: ValueFormat },
}

/// Deterministic stringification of `(prefix, suffix, tags, binding-tag)`.
/// Doubles as the map key for the DataPool shard's accumulator map and, via
/// [`AggregateKey::template`], as the format string handed to the
/// accumulator so it can fill its own `%s`/`%d` slots at render time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateKey(String);

impl AggregateKey {
    fn build(key_prefix: &str, key_suffix: &str, tag_assignments: &str, binding_tag: &str) -> Self {
        let mut s = String::with_capacity(
            key_prefix.len() + key_suffix.len() + tag_assignments.len() + binding_tag.len() + 16,
        );
        s.push_str(key_prefix);
        s.push('.');
        s.push_str(key_suffix);
        s.push_str(".%s %d %s ");
        s.push_str(tag_assignments);
        s.push(' ');
        s.push_str(binding_tag);
        AggregateKey(s)
    }

    pub fn template(&self) -> &str {
        &self.0
    }
}

/// One derived observation ready to be folded into an accumulator.
pub struct DataPoint {
    pub key: AggregateKey,
    pub value: i64,
    pub metric_type: MetricType,
    pub never_stale: bool,
    pub point_time: DateTime<Utc>,
}

/// Compiled, per-log-group key construction logic: transforms, tag
/// ordering, timestamp parsing, and the two-pass value-extraction /
/// key-materialization process described for the aggregation core.
pub struct KeyBuilder {
    key_prefix: String,
    expected_matches: usize,
    date_position: usize,
    date_format: String,
    date_format_year_hint: Option<i32>,
    tag_order: Vec<(String, TagValue)>,
    transforms: HashMap<usize, Transform>,
    metrics: HashMap<usize, Vec<crate::config::types::MetricBindingConfig>>,
    fail_operation_warn: bool,
}

impl KeyBuilder {
    pub fn compile(group: &LogGroupConfig) -> Result<Self, KeyError> {
        let mut transforms = HashMap::new();
        for (position, seq) in &group.transforms {
            let compiled = Transform::compile(seq).map_err(|source| KeyError::Transform {
                position: *position,
                source,
            })?;
            transforms.insert(*position, compiled);
        }

        let mut tag_order: Vec<(String, TagValue)> =
            group.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        tag_order.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            key_prefix: group.key_prefix.clone(),
            expected_matches: group.expected_matches,
            date_position: group.date_position,
            date_format: group.date_format.clone(),
            date_format_year_hint: group.date_format_year_hint,
            tag_order,
            transforms,
            metrics: group.metrics.clone(),
            fail_operation_warn: group.fail_operation_warn,
        })
    }

    /// Run the full key-construction pipeline over one matched
    /// capture tuple, returning the parsed log time and every DataPoint the
    /// line produces.
    pub fn build_points(&self, raw_captures: &[String]) -> Result<(DateTime<Utc>, Vec<DataPoint>), KeyError> {
        // Step 1: transforms.
        let mut captures = raw_captures.to_vec();
        for (position, transform) in &self.transforms {
            if let Some(c) = captures.get_mut(*position) {
                *c = transform.apply(c).value;
            }
        }

        // Step 2: tag rendering, alphabetical order precomputed at compile time.
        let mut tag_parts = Vec::with_capacity(self.tag_order.len());
        for (name, tag_value) in &self.tag_order {
            let value = match tag_value {
                TagValue::Literal(s) => s.clone(),
                TagValue::Capture(index) => captures.get(*index).cloned().unwrap_or_default(),
            };
            tag_parts.push(format!("{name}={value}"));
        }
        let tag_assignments = tag_parts.join(" ");

        // Step 3: timestamp.
        let date_str = captures
            .get(self.date_position)
            .ok_or(KeyError::MissingCapture(self.date_position))?;
        let point_time = parse_timestamp(date_str, &self.date_format, self.date_format_year_hint)
            .ok_or_else(|| KeyError::TimestampParse {
                value: date_str.clone(),
                format: self.date_format.clone(),
            })?;

        // Step 4: value extraction, pass 1. Position 0 always contributes
        // the constant 1. Each other position's canonical scaled value is
        // taken from the first binding declared at that position.
        let mut values = vec![0i64; self.expected_matches + 1];
        for (position, bindings) in &self.metrics {
            if *position == 0 {
                values[0] = 1;
                continue;
            }
            let Some(primary) = bindings.first() else {
                continue;
            };
            let raw_value = captures
                .get(*position)
                .ok_or(KeyError::MissingCapture(*position))?;
            values[*position] = parse_and_scale(raw_value, primary.format, primary.multiply, primary.divide)?;
        }

        // Step 5: key materialization, pass 2.
        let mut points = Vec::new();
        for (position, bindings) in &self.metrics {
            for binding in bindings {
                let base = values[*position];
                let mut val = base;
                for (op, op_position) in &binding.operations {
                    if *op_position == 0 {
                        continue;
                    }
                    let operand = values.get(*op_position).copied().unwrap_or(0);
                    val = match op {
                        ArithOp::Add => val + operand,
                        ArithOp::Sub => val - operand,
                    };
                }

                if val < 0 {
                    if self.fail_operation_warn {
                        tracing::warn!(
                            key_suffix = %binding.key_suffix,
                            value = val,
                            "operation produced a negative value, dropping line"
                        );
                    }
                    continue;
                }

                let key = AggregateKey::build(
                    &self.key_prefix,
                    &binding.key_suffix,
                    &tag_assignments,
                    &binding.tag,
                );
                points.push(DataPoint {
                    key,
                    value: val,
                    metric_type: binding.metric_type,
                    never_stale: binding.never_stale,
                    point_time,
                });
            }
        }

        Ok((point_time, points))
    }
}

fn parse_and_scale(raw: &str, format: ValueFormat, multiply: u64, divide: u64) -> Result<i64, KeyError> {
    match format {
        ValueFormat::Int => {
            let v: i64 = raw.trim().parse().map_err(|_| KeyError::ValueParse {
                value: raw.to_string(),
                format,
            })?;
            Ok((v * multiply as i64) / divide as i64)
        }
        ValueFormat::Float => {
            let v: f64 = raw.trim().parse().map_err(|_| KeyError::ValueParse {
                value: raw.to_string(),
                format,
            })?;
            Ok(((v * multiply as f64) / divide as f64) as i64)
        }
    }
}

/// Parse a captured date string. Recognizes `unix`/`epoch` and `iso8601` as
/// special formats; anything else is a strptime-style format string. If the
/// format has no year specifier (RFC3164 syslog dates), the current
/// wall-clock year is grafted on unless `year_hint` overrides it.
fn parse_timestamp(value: &str, format: &str, year_hint: Option<i32>) -> Option<DateTime<Utc>> {
    match format {
        "unix" | "epoch" => value.trim().parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        "iso8601" => DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc)),
        _ => {
            let has_year = format.contains("%Y") || format.contains("%y");
            if has_year {
                if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
                    DateTime::parse_from_str(value, format)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc))
                } else {
                    NaiveDateTime::parse_from_str(value, format)
                        .ok()
                        .map(|ndt| Utc.from_utc_datetime(&ndt))
                }
            } else {
                let year = year_hint.unwrap_or_else(|| Utc::now().year());
                let augmented_format = format!("{format} %Y");
                let augmented_value = format!("{value} {year}");
                NaiveDateTime::parse_from_str(&augmented_value, &augmented_format)
                    .ok()
                    .map(|ndt| Utc.from_utc_datetime(&ndt))
            }
        }
    }
}

pub(crate) use parse_timestamp as parse_log_timestamp;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_multiply() -> u64 {
    1
}

fn default_divide() -> u64 {
    1
}

fn default_poll_interval() -> u64 {
    5
}

fn default_push_wait() -> u64 {
    5
}

fn default_push_number() -> usize {
    1
}

fn default_stats_interval() -> u64 {
    60
}

fn default_goroutines() -> usize {
    1
}

fn default_expected_matches() -> usize {
    0
}

fn default_ewma_interval() -> u64 {
    5
}

fn default_stale_threshold_min() -> u64 {
    15
}

fn default_interval() -> u64 {
    60
}

fn default_histogram_size() -> usize {
    1028
}

fn default_histogram_alpha_decay() -> f64 {
    0.015
}

fn default_histogram_rescale_threshold_min() -> u64 {
    60
}

/// Top-level config document: a `settings` block plus one section per named
/// log group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub settings: Settings,
    pub log_groups: HashMap<String, LogGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    pub push_host: String,
    pub push_port: u16,
    #[serde(default = "default_push_proto")]
    pub push_proto: PushProto,
    #[serde(default = "default_push_type")]
    pub push_type: PushType,
    #[serde(default = "default_push_wait")]
    pub push_wait: u64,
    #[serde(default = "default_push_number")]
    pub push_number: usize,
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    #[serde(default)]
    pub log_facility: Option<String>,
}

fn default_push_proto() -> PushProto {
    PushProto::Tcp
}

fn default_push_type() -> PushType {
    PushType::Tsd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushProto {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushType {
    Tsd,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogGroupConfig {
    pub globs: Vec<String>,
    pub patterns: Vec<String>,
    #[serde(default = "default_expected_matches")]
    pub expected_matches: usize,
    pub date_position: usize,
    pub date_format: String,
    #[serde(default)]
    pub date_format_year_hint: Option<i32>,
    pub key_prefix: String,
    #[serde(default)]
    pub tags: HashMap<String, TagValue>,
    #[serde(default)]
    pub metrics: HashMap<usize, Vec<MetricBindingConfig>>,
    #[serde(default)]
    pub transforms: HashMap<usize, TransformSeqConfig>,

    #[serde(default = "default_histogram_size")]
    pub histogram_size: usize,
    #[serde(default = "default_histogram_alpha_decay")]
    pub histogram_alpha_decay: f64,
    #[serde(default = "default_histogram_rescale_threshold_min")]
    pub histogram_rescale_threshold_min: u64,

    #[serde(default = "default_ewma_interval")]
    pub ewma_interval_seconds: u64,
    #[serde(default = "default_stale_threshold_min")]
    pub stale_threshold_minutes: u64,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_goroutines")]
    pub goroutines: usize,

    #[serde(default)]
    pub stale_removal: bool,
    #[serde(default)]
    pub send_duplicates: bool,
    #[serde(default)]
    pub live_poll: bool,
    #[serde(default)]
    pub poll_file: bool,
    #[serde(default)]
    pub parse_from_start: bool,
    #[serde(default)]
    pub log_stale_metrics: bool,
    #[serde(default)]
    pub out_of_order_time_warn: bool,
    #[serde(default)]
    pub fail_regex_warn: bool,
    #[serde(default)]
    pub fail_operation_warn: bool,

    #[serde(default)]
    pub filename_match_re: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Capture(usize),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Meter,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBindingConfig {
    pub tag: String,
    pub metric_type: MetricType,
    pub key_suffix: String,
    #[serde(default = "default_value_format")]
    pub format: ValueFormat,
    #[serde(default = "default_multiply")]
    pub multiply: u64,
    #[serde(default = "default_divide")]
    pub divide: u64,
    #[serde(default)]
    pub never_stale: bool,
    #[serde(default)]
    pub operations: Vec<(ArithOp, usize)>,
}

fn default_value_format() -> ValueFormat {
    ValueFormat::Int
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSeqConfig {
    #[serde(default)]
    pub ops: Vec<TransformOpConfig>,
    #[serde(default)]
    pub replace_only_one: bool,
    #[serde(default)]
    pub log_default_assign: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOpConfig {
    Replace { pattern: String, template: String },
    MatchOrDefault { pattern: String, default: String },
}

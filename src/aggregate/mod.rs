pub mod counter;
pub mod histogram;
pub mod meter;

pub use counter::Counter;
pub use histogram::Histogram;
pub use meter::Meter;

use chrono::{DateTime, Utc};

/// The uniform interface the DataPool shard needs from any accumulator
/// family (counter, meter, histogram). Implementations are treated as a
/// tagged variant — the shard never switches on concrete type outside of
/// construction.
pub trait MetricAggregate: Send {
    fn update(&mut self, t: DateTime<Utc>, v: i64);
    fn stale(&self, now: DateTime<Utc>) -> bool;
    fn zero_out(&mut self);
    fn push_keys_time(&self, last_push: DateTime<Utc>) -> bool;
    fn get_max_time(&self) -> DateTime<Utc>;
    fn get_keys(&self, t: DateTime<Utc>, key_template: &str, duplicate: bool) -> Vec<String>;
    fn nb_keys(&self) -> usize;
}

/// Fill the AggregateKey template's two `%s`/`%d` slots, in order: stat
/// suffix, unix-seconds timestamp, value.
pub(crate) fn render_key(template: &str, stat: &str, t: DateTime<Utc>, value: &str) -> String {
    let stage1 = replace_first(template, "%s", stat);
    let stage2 = replace_first(&stage1, "%d", &t.timestamp().to_string());
    replace_first(&stage2, "%s", value)
}

fn replace_first(s: &str, pat: &str, replacement: &str) -> String {
    match s.find(pat) {
        Some(pos) => {
            let mut out = String::with_capacity(s.len());
            out.push_str(&s[..pos]);
            out.push_str(replacement);
            out.push_str(&s[pos + pat.len()..]);
            out
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_key_fills_slots_in_order() {
        let template = "my.hits.%s %d %s tag=x binding";
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let rendered = render_key(template, "count", t, "42");
        assert_eq!(rendered, "my.hits.count 1700000000 42 tag=x binding");
    }
}

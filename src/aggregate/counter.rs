use super::{render_key, MetricAggregate};
use chrono::{DateTime, Duration, Utc};

/// Monotonic accumulation keyed on `(t, v)`.
pub struct Counter {
    count: i64,
    last_update: DateTime<Utc>,
    max_time: DateTime<Utc>,
    stale_threshold: Duration,
}

impl Counter {
    pub fn new(t: DateTime<Utc>, stale_threshold: Duration) -> Self {
        Self {
            count: 0,
            last_update: t,
            max_time: t,
            stale_threshold,
        }
    }
}

impl MetricAggregate for Counter {
    fn update(&mut self, t: DateTime<Utc>, v: i64) {
        self.count += v;
        self.last_update = t;
        if t > self.max_time {
            self.max_time = t;
        }
    }

    fn stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_update >= self.stale_threshold
    }

    fn zero_out(&mut self) {
        self.count = 0;
    }

    fn push_keys_time(&self, last_push: DateTime<Utc>) -> bool {
        self.max_time > last_push
    }

    fn get_max_time(&self) -> DateTime<Utc> {
        self.max_time
    }

    fn get_keys(&self, t: DateTime<Utc>, key_template: &str, _duplicate: bool) -> Vec<String> {
        vec![render_key(key_template, "count", t, &self.count.to_string())]
    }

    fn nb_keys(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_counter_accumulates() {
        let mut c = Counter::new(t(0), Duration::minutes(15));
        c.update(t(0), 1);
        c.update(t(1), 1);
        assert_eq!(c.get_keys(t(1), "my.hits.%s %d %s", false), vec!["my.hits.count 1 2"]);
    }

    #[test]
    fn test_counter_stale_after_threshold() {
        let mut c = Counter::new(t(0), Duration::minutes(15));
        c.update(t(0), 1);
        assert!(!c.stale(t(60)));
        assert!(c.stale(t(15 * 60)));
    }

    #[test]
    fn test_counter_zero_out() {
        let mut c = Counter::new(t(0), Duration::minutes(15));
        c.update(t(0), 5);
        c.zero_out();
        assert_eq!(c.get_keys(t(0), "%s %d %s", false), vec!["count 0 0"]);
    }

    #[test]
    fn test_push_keys_time_tracks_max_observed_time() {
        let mut c = Counter::new(t(0), Duration::minutes(15));
        c.update(t(5), 1);
        assert!(c.push_keys_time(t(0)));
        assert!(!c.push_keys_time(t(10)));
    }

    #[test]
    fn test_nb_keys_is_one() {
        let c = Counter::new(t(0), Duration::minutes(15));
        assert_eq!(c.nb_keys(), 1);
    }
}

use super::{render_key, MetricAggregate};
use chrono::{DateTime, Duration, Utc};

const WINDOW_1_MIN_SECONDS: f64 = 60.0;
const WINDOW_5_MIN_SECONDS: f64 = 5.0 * 60.0;
const WINDOW_15_MIN_SECONDS: f64 = 15.0 * 60.0;

/// One exponentially-weighted moving average over a fixed window,
/// ticked at a fixed cadence (`ewma_interval` seconds of log time).
struct Ewma {
    alpha: f64,
    tick_interval_secs: f64,
    uncounted: i64,
    rate_per_second: Option<f64>,
}

impl Ewma {
    fn new(window_secs: f64, tick_interval_secs: f64) -> Self {
        Self {
            alpha: 1.0 - (-tick_interval_secs / window_secs).exp(),
            tick_interval_secs,
            uncounted: 0,
            rate_per_second: None,
        }
    }

    fn mark(&mut self, n: i64) {
        self.uncounted += n;
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted as f64 / self.tick_interval_secs;
        self.uncounted = 0;
        self.rate_per_second = Some(match self.rate_per_second {
            Some(rate) => rate + self.alpha * (instant_rate - rate),
            None => instant_rate,
        });
    }

    fn rate(&self) -> f64 {
        self.rate_per_second.unwrap_or(0.0)
    }

    fn reset(&mut self) {
        self.uncounted = 0;
        self.rate_per_second = None;
    }
}

/// Event-rate accumulator with 1/5/15-minute EWMAs, crunched every
/// `ewma_interval` seconds of log time.
pub struct Meter {
    count: i64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    tick_interval: Duration,
    last_tick: DateTime<Utc>,
    last_update: DateTime<Utc>,
    max_time: DateTime<Utc>,
    stale_threshold: Duration,
}

impl Meter {
    pub fn new(t: DateTime<Utc>, ewma_interval: Duration, stale_threshold: Duration) -> Self {
        let tick_secs = (ewma_interval.num_milliseconds().max(1) as f64) / 1000.0;
        Self {
            count: 0,
            m1: Ewma::new(WINDOW_1_MIN_SECONDS, tick_secs),
            m5: Ewma::new(WINDOW_5_MIN_SECONDS, tick_secs),
            m15: Ewma::new(WINDOW_15_MIN_SECONDS, tick_secs),
            tick_interval: ewma_interval,
            last_tick: t,
            last_update: t,
            max_time: t,
            stale_threshold,
        }
    }

    /// Advance the EWMAs by however many whole `ewma_interval` ticks have
    /// elapsed (in log time) since the last catch-up. Bounded so a huge
    /// time jump doesn't spin forever.
    fn catch_up(&mut self, now: DateTime<Utc>) {
        let tick_ms = self.tick_interval.num_milliseconds().max(1);
        let elapsed_ms = (now - self.last_tick).num_milliseconds();
        if elapsed_ms <= 0 {
            return;
        }
        let ticks = (elapsed_ms / tick_ms).min(100_000);
        for _ in 0..ticks {
            self.m1.tick();
            self.m5.tick();
            self.m15.tick();
            self.last_tick += Duration::milliseconds(tick_ms);
        }
    }
}

impl MetricAggregate for Meter {
    fn update(&mut self, t: DateTime<Utc>, v: i64) {
        self.catch_up(t);
        self.count += v;
        self.m1.mark(v);
        self.m5.mark(v);
        self.m15.mark(v);
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
        self.m1.reset();
        self.m5.reset();
        self.m15.reset();
    }

    fn push_keys_time(&self, last_push: DateTime<Utc>) -> bool {
        self.max_time > last_push
    }

    fn get_max_time(&self) -> DateTime<Utc> {
        self.max_time
    }

    fn get_keys(&self, t: DateTime<Utc>, key_template: &str, _duplicate: bool) -> Vec<String> {
        vec![
            render_key(key_template, "count", t, &self.count.to_string()),
            render_key(
                key_template,
                "rate._1min",
                t,
                &format!("{:.4}", self.m1.rate()),
            ),
            render_key(
                key_template,
                "rate._5min",
                t,
                &format!("{:.4}", self.m5.rate()),
            ),
            render_key(
                key_template,
                "rate._15min",
                t,
                &format!("{:.4}", self.m15.rate()),
            ),
        ]
    }

    fn nb_keys(&self) -> usize {
        4
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
    fn test_meter_counts_events() {
        let mut m = Meter::new(t(0), Duration::seconds(5), Duration::minutes(15));
        m.update(t(0), 1);
        m.update(t(1), 1);
        let lines = m.get_keys(t(1), "%s %d %s", false);
        assert_eq!(lines[0], "count 1 2");
    }

    #[test]
    fn test_meter_renders_four_lines() {
        let m = Meter::new(t(0), Duration::seconds(5), Duration::minutes(15));
        assert_eq!(m.nb_keys(), 4);
        assert_eq!(m.get_keys(t(0), "%s %d %s", false).len(), 4);
    }

    #[test]
    fn test_meter_rate_increases_after_sustained_marks() {
        let mut m = Meter::new(t(0), Duration::seconds(1), Duration::minutes(15));
        for i in 0..120 {
            m.update(t(i), 1);
        }
        // after catch-up ticks, the 1-minute EWMA should show a nonzero rate
        let lines = m.get_keys(t(120), "%s %d %s", false);
        assert!(lines[1].starts_with("rate._1min 120 "));
        let value: f64 = lines[1].rsplit(' ').next().unwrap().parse().unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn test_meter_stale() {
        let mut m = Meter::new(t(0), Duration::seconds(5), Duration::minutes(15));
        m.update(t(0), 1);
        assert!(!m.stale(t(60)));
        assert!(m.stale(t(900)));
    }
}

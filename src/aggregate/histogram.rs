use super::{render_key, MetricAggregate};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Exponentially-decaying reservoir sample: newer, higher-weighted
/// observations are more likely to survive eviction than older ones, so the
/// histogram tracks a recency-biased view of the distribution rather than
/// an unbounded all-time one. Periodically rescaled so priorities don't
/// grow unbounded across a long-running process.
pub struct Histogram {
    size: usize,
    alpha: f64,
    rescale_threshold: Duration,
    entries: Vec<(f64, i64)>,
    start_time: DateTime<Utc>,
    next_rescale: DateTime<Utc>,
    last_update: DateTime<Utc>,
    max_time: DateTime<Utc>,
    stale_threshold: Duration,
}

impl Histogram {
    pub fn new(
        t: DateTime<Utc>,
        size: usize,
        alpha: f64,
        rescale_threshold: Duration,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            size,
            alpha,
            rescale_threshold,
            entries: Vec::with_capacity(size),
            start_time: t,
            next_rescale: t + rescale_threshold,
            last_update: t,
            max_time: t,
            stale_threshold,
        }
    }

    fn weight(&self, elapsed_secs: f64) -> f64 {
        (self.alpha * elapsed_secs).exp()
    }

    fn maybe_rescale(&mut self, now: DateTime<Utc>) {
        if now < self.next_rescale {
            return;
        }
        let elapsed_secs = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        let factor = (-self.alpha * elapsed_secs).exp();
        for entry in &mut self.entries {
            entry.0 *= factor;
        }
        self.start_time = now;
        self.next_rescale = now + self.rescale_threshold;
    }

    fn insert(&mut self, t: DateTime<Utc>, v: i64) {
        let elapsed_secs = (t - self.start_time).num_milliseconds() as f64 / 1000.0;
        let exponential: f64 = {
            let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
            -u.ln()
        };
        let priority = self.weight(elapsed_secs) / exponential;

        if self.entries.len() < self.size {
            self.entries.push((priority, v));
            return;
        }

        if let Some((min_index, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap())
        {
            if priority > self.entries[min_index].0 {
                self.entries[min_index] = (priority, v);
            }
        }
    }

    fn sorted_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.entries.iter().map(|(_, v)| *v as f64).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = p * (sorted.len() as f64 + 1.0);
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= sorted.len() as f64 {
        return *sorted.last().unwrap();
    }
    let lower = sorted[(pos as usize) - 1];
    let upper = sorted[pos as usize];
    lower + (pos - pos.floor()) * (upper - lower)
}

impl MetricAggregate for Histogram {
    fn update(&mut self, t: DateTime<Utc>, v: i64) {
        self.maybe_rescale(t);
        self.insert(t, v);
        self.last_update = t;
        if t > self.max_time {
            self.max_time = t;
        }
    }

    fn stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_update >= self.stale_threshold
    }

    fn zero_out(&mut self) {
        self.entries.clear();
    }

    fn push_keys_time(&self, last_push: DateTime<Utc>) -> bool {
        self.max_time > last_push
    }

    fn get_max_time(&self) -> DateTime<Utc> {
        self.max_time
    }

    fn get_keys(&self, t: DateTime<Utc>, key_template: &str, _duplicate: bool) -> Vec<String> {
        let sorted = self.sorted_values();
        let sample_size = sorted.len();

        let (min, max, mean, std_dev) = if sorted.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let min = sorted[0];
            let max = *sorted.last().unwrap();
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            let variance = if sorted.len() > 1 {
                sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (sorted.len() - 1) as f64
            } else {
                0.0
            };
            (min, max, mean, variance.sqrt())
        };

        vec![
            render_key(key_template, "min", t, &format!("{min:.4}")),
            render_key(key_template, "max", t, &format!("{max:.4}")),
            render_key(key_template, "mean", t, &format!("{mean:.4}")),
            render_key(key_template, "std-dev", t, &format!("{std_dev:.4}")),
            render_key(
                key_template,
                "p50",
                t,
                &format!("{:.4}", percentile(&sorted, 0.5)),
            ),
            render_key(
                key_template,
                "p75",
                t,
                &format!("{:.4}", percentile(&sorted, 0.75)),
            ),
            render_key(
                key_template,
                "p95",
                t,
                &format!("{:.4}", percentile(&sorted, 0.95)),
            ),
            render_key(
                key_template,
                "p99",
                t,
                &format!("{:.4}", percentile(&sorted, 0.99)),
            ),
            render_key(
                key_template,
                "p999",
                t,
                &format!("{:.4}", percentile(&sorted, 0.999)),
            ),
            render_key(key_template, "sample_size", t, &sample_size.to_string()),
        ]
    }

    fn nb_keys(&self) -> usize {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hist() -> Histogram {
        Histogram::new(t(0), 4, 0.015, Duration::minutes(60), Duration::minutes(15))
    }

    #[test]
    fn test_histogram_basic_stats() {
        let mut h = hist();
        for v in [10, 20, 30, 40] {
            h.update(t(0), v);
        }
        let lines = h.get_keys(t(0), "%s %d %s", false);
        assert_eq!(lines.len(), 10);
        assert!(lines[0].starts_with("min 0 10.0000"));
        assert!(lines[1].starts_with("max 0 40.0000"));
        assert!(lines[2].starts_with("mean 0 25.0000"));
        assert!(lines[9].starts_with("sample_size 0 4"));
    }

    #[test]
    fn test_histogram_reservoir_caps_at_size() {
        let mut h = hist();
        for v in 0..100 {
            h.update(t(v), v);
        }
        let lines = h.get_keys(t(100), "%s %d %s", false);
        // sample_size never exceeds the configured reservoir size
        assert!(lines[9].ends_with(" 4"));
    }

    #[test]
    fn test_histogram_stale() {
        let mut h = hist();
        h.update(t(0), 1);
        assert!(!h.stale(t(60)));
        assert!(h.stale(t(900)));
    }

    #[test]
    fn test_histogram_zero_out_empties_reservoir() {
        let mut h = hist();
        h.update(t(0), 10);
        h.zero_out();
        let lines = h.get_keys(t(0), "%s %d %s", false);
        assert!(lines[9].ends_with(" 0"));
    }

    #[test]
    fn test_nb_keys_is_ten() {
        assert_eq!(hist().nb_keys(), 10);
    }
}

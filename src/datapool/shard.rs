use super::{AggregateKey, KeyBuilder};
use crate::aggregate::{Counter, Histogram, Meter, MetricAggregate};
use crate::config::types::{LogGroupConfig, MetricType};
use crate::stats::{DataPoolCounters, StatsHandle};
use crate::tail::LineResult;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Which condition drives a flush sweep across the accumulator map. All
/// three ultimately compare against log time, never wall-clock time;
/// `FileWatermark` is the one shape whose trigger differs from the other
/// two (it watches per-file high-water marks instead of a single pool-wide
/// one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    Aggressive,
    FileWatermark,
    LogTime,
}

fn flush_mode(live_poll: bool, stale_removal: bool) -> FlushMode {
    if live_poll {
        FlushMode::Aggressive
    } else if !stale_removal {
        FlushMode::FileWatermark
    } else {
        FlushMode::LogTime
    }
}

struct FileState {
    last_push: DateTime<Utc>,
}

struct AggregateEntry {
    accumulator: Box<dyn MetricAggregate>,
    last_push: DateTime<Utc>,
    dup_time: Option<DateTime<Utc>>,
    never_stale: bool,
}

/// One shard of a log group's DataPool: owns a slice of the accumulator map
/// (the whole map, if `goroutines == 1`) and the file-state table for the
/// files fed to it, and runs the flush sweep described for the aggregation
/// core. Grounded on the stateful fan-in/fold loop shape used for streaming
/// aggregation, generalized from a fixed record schema to the log group's
/// configured key/value pipeline.
pub struct DataPoolShard {
    log_group: Arc<str>,
    shard_index: usize,
    key_builder: KeyBuilder,
    input: mpsc::Receiver<LineResult>,
    pusher_tx: mpsc::Sender<Vec<String>>,
    stats: StatsHandle,
    stop: watch::Receiver<bool>,

    mode: FlushMode,
    stale_removal: bool,
    send_duplicates: bool,
    log_stale_metrics: bool,
    out_of_order_time_warn: bool,
    interval: Duration,
    ewma_interval: Duration,
    stale_threshold: Duration,
    histogram_size: usize,
    histogram_alpha: f64,
    histogram_rescale_threshold: Duration,

    entries: HashMap<AggregateKey, AggregateEntry>,
    files: HashMap<Arc<str>, FileState>,
    last_time_pushed: Option<DateTime<Utc>>,
    counters: DataPoolCounters,
    last_stats_emit: Option<DateTime<Utc>>,
    stats_interval: Duration,
}

impl DataPoolShard {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_group: Arc<str>,
        shard_index: usize,
        group: &LogGroupConfig,
        input: mpsc::Receiver<LineResult>,
        pusher_tx: mpsc::Sender<Vec<String>>,
        stats: StatsHandle,
        stop: watch::Receiver<bool>,
        stats_interval: Duration,
    ) -> Result<Self, super::KeyError> {
        let key_builder = KeyBuilder::compile(group)?;
        Ok(Self {
            log_group,
            shard_index,
            key_builder,
            input,
            pusher_tx,
            stats,
            stop,
            mode: flush_mode(group.live_poll, group.stale_removal),
            stale_removal: group.stale_removal,
            send_duplicates: group.send_duplicates,
            log_stale_metrics: group.log_stale_metrics,
            out_of_order_time_warn: group.out_of_order_time_warn,
            interval: Duration::seconds(group.interval_seconds as i64),
            ewma_interval: Duration::seconds(group.ewma_interval_seconds as i64),
            stale_threshold: Duration::minutes(group.stale_threshold_minutes as i64),
            histogram_size: group.histogram_size,
            histogram_alpha: group.histogram_alpha_decay,
            histogram_rescale_threshold: Duration::minutes(group.histogram_rescale_threshold_min as i64),
            entries: HashMap::new(),
            files: HashMap::new(),
            last_time_pushed: None,
            counters: DataPoolCounters::default(),
            last_stats_emit: None,
            stats_interval,
        })
    }

    fn make_accumulator(&self, metric_type: MetricType, t: DateTime<Utc>) -> Box<dyn MetricAggregate> {
        match metric_type {
            MetricType::Counter => Box::new(Counter::new(t, self.stale_threshold)),
            MetricType::Meter => Box::new(Meter::new(t, self.ewma_interval, self.stale_threshold)),
            MetricType::Histogram => Box::new(Histogram::new(
                t,
                self.histogram_size,
                self.histogram_alpha,
                self.histogram_rescale_threshold,
                self.stale_threshold,
            )),
        }
    }

    /// Run the shard until the stop signal fires or its input channel closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return;
                    }
                }
                maybe_line = self.input.recv() => {
                    match maybe_line {
                        Some(line) => self.handle_line(line).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// Block until the pusher channel has room, racing the shard's own stop
    /// signal so a shutdown in progress isn't held up by a full channel.
    async fn push_lines(&self, lines: Vec<String>) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = self.pusher_tx.send(lines) => {}
            _ = stop.changed() => {}
        }
    }

    async fn handle_line(&mut self, line: LineResult) {
        let (point_time, points) = match self.key_builder.build_points(&line.captures) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(filename = %line.filename, error = %err, "dropping line, key construction failed");
                return;
            }
        };

        self.files
            .entry(line.filename.clone())
            .or_insert_with(|| FileState { last_push: point_time });

        for point in points {
            if !self.entries.contains_key(&point.key) {
                let accumulator = self.make_accumulator(point.metric_type, point.point_time);
                self.entries.insert(
                    point.key.clone(),
                    AggregateEntry {
                        accumulator,
                        last_push: point.point_time,
                        dup_time: None,
                        never_stale: point.never_stale,
                    },
                );
                self.counters.key_tracked += 1;
            }
            let entry = self.entries.get_mut(&point.key).expect("just inserted above");

            if self.out_of_order_time_warn && point.point_time < entry.accumulator.get_max_time() {
                tracing::warn!(
                    log_group = %self.log_group,
                    filename = %line.filename,
                    "received out-of-order log time"
                );
            }

            entry.accumulator.update(point.point_time, point.value);
        }

        if self.flush_pending(point_time) {
            self.flush(point_time).await;
        }

        self.maybe_emit_stats(point_time).await;
    }

    fn flush_pending(&mut self, point_time: DateTime<Utc>) -> bool {
        match self.mode {
            FlushMode::Aggressive | FlushMode::LogTime => match self.last_time_pushed {
                Some(last) => point_time - last >= self.interval,
                None => {
                    self.last_time_pushed = Some(point_time);
                    false
                }
            },
            FlushMode::FileWatermark => self
                .files
                .values()
                .any(|fs| fs.last_push + self.interval <= point_time),
        }
    }

    /// Sweep the accumulator map, collecting every batch of rendered lines
    /// the sweep produces before sending any of them: `self.entries.iter_mut()`
    /// and `self.push_lines()` can't be held at once, since the latter needs
    /// `&self` while the former holds `&mut self.entries`.
    async fn flush(&mut self, point_time: DateTime<Utc>) {
        let mut to_remove = Vec::new();
        let mut batches: Vec<Vec<String>> = Vec::new();

        for (key, entry) in self.entries.iter_mut() {
            if self.stale_removal && !entry.never_stale && entry.accumulator.stale(point_time) {
                entry.accumulator.zero_out();
                batches.push(entry.accumulator.get_keys(point_time, key.template(), false));
                self.counters.key_staled += entry.accumulator.nb_keys() as u64;
                if self.log_stale_metrics {
                    tracing::info!(key = key.template(), "accumulator went stale, removing");
                }
                to_remove.push(key.clone());
                continue;
            }

            if entry.accumulator.push_keys_time(entry.last_push) {
                batches.push(entry.accumulator.get_keys(point_time, key.template(), false));
                entry.last_push = entry.accumulator.get_max_time();
                entry.dup_time = None;
            } else if self.send_duplicates {
                let next_dup = entry.dup_time.unwrap_or(entry.last_push) + self.interval;
                batches.push(entry.accumulator.get_keys(next_dup, key.template(), true));
                entry.dup_time = Some(next_dup);
            }
        }

        for key in to_remove {
            self.entries.remove(&key);
        }

        for file_state in self.files.values_mut() {
            if file_state.last_push + self.interval <= point_time {
                file_state.last_push = point_time;
            }
        }

        if matches!(self.mode, FlushMode::Aggressive | FlushMode::LogTime) {
            self.last_time_pushed = Some(point_time);
        }

        for lines in batches {
            self.push_lines(lines).await;
        }
    }

    /// `key_staled` is the pool's cumulative staled-key count for its whole
    /// lifetime, never reset on emit; only `key_tracked`, a live-keys gauge,
    /// is recomputed each time.
    async fn maybe_emit_stats(&mut self, point_time: DateTime<Utc>) {
        let due = match self.last_stats_emit {
            Some(last) => point_time - last >= self.stats_interval,
            None => true,
        };
        if !due {
            return;
        }
        self.counters.key_tracked = self.entries.len() as u64;
        self.stats
            .push_data_pool_counters(&self.log_group, self.shard_index, &self.counters)
            .await;
        self.last_stats_emit = Some(point_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{MetricBindingConfig, ValueFormat};
    use std::collections::HashMap as StdHashMap;

    fn group() -> LogGroupConfig {
        let mut metrics = StdHashMap::new();
        metrics.insert(
            0,
            vec![MetricBindingConfig {
                tag: "hits".to_string(),
                metric_type: MetricType::Counter,
                key_suffix: "hits".to_string(),
                format: ValueFormat::Int,
                multiply: 1,
                divide: 1,
                never_stale: false,
                operations: vec![],
            }],
        );

        LogGroupConfig {
            globs: vec!["*.log".to_string()],
            patterns: vec![r"^(\d+)$".to_string()],
            expected_matches: 1,
            date_position: 1,
            date_format: "unix".to_string(),
            date_format_year_hint: None,
            key_prefix: "my".to_string(),
            tags: StdHashMap::new(),
            metrics,
            transforms: StdHashMap::new(),
            histogram_size: 4,
            histogram_alpha_decay: 0.015,
            histogram_rescale_threshold_min: 60,
            ewma_interval_seconds: 5,
            stale_threshold_minutes: 15,
            interval_seconds: 10,
            goroutines: 1,
            stale_removal: false,
            send_duplicates: false,
            live_poll: true,
            poll_file: false,
            parse_from_start: false,
            log_stale_metrics: false,
            out_of_order_time_warn: false,
            fail_regex_warn: false,
            fail_operation_warn: false,
            filename_match_re: None,
        }
    }

    fn line(t: i64) -> LineResult {
        LineResult {
            filename: Arc::from("a.log"),
            captures: vec![t.to_string(), t.to_string()],
        }
    }

    #[tokio::test]
    async fn test_shard_flushes_on_interval_in_aggressive_mode() {
        let (in_tx, in_rx) = mpsc::channel(10);
        let (push_tx, mut push_rx) = mpsc::channel(10);
        let (stats_handle, _stats_rx) = StatsHandle::new_for_test();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let shard = DataPoolShard::new(
            Arc::from("hits"),
            0,
            &group(),
            in_rx,
            push_tx,
            stats_handle,
            stop_rx,
            Duration::seconds(60),
        )
        .unwrap();

        let handle = tokio::spawn(shard.run());

        in_tx.send(line(0)).await.unwrap();
        in_tx.send(line(20)).await.unwrap();

        let lines = tokio::time::timeout(std::time::Duration::from_secs(1), push_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lines, vec!["my.hits.count 20 2  hits"]);

        drop(in_tx);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_shard_stops_on_signal() {
        let (_in_tx, in_rx) = mpsc::channel::<LineResult>(10);
        let (push_tx, _push_rx) = mpsc::channel(10);
        let (stats_handle, _stats_rx) = StatsHandle::new_for_test();
        let (stop_tx, stop_rx) = watch::channel(false);

        let shard = DataPoolShard::new(
            Arc::from("hits"),
            0,
            &group(),
            in_rx,
            push_tx,
            stats_handle,
            stop_rx,
            Duration::seconds(60),
        )
        .unwrap();

        let handle = tokio::spawn(shard.run());
        stop_tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}

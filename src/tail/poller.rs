use crate::matcher::LineMatcher;
use crate::stats::StatsHandle;
use crate::tail::{FileTailer, LineResult};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Periodically scans the globs declared for one log group, spawning a
/// [`FileTailer`] for each newly discovered file and round-robining it
/// across that group's shard and pusher channels.
pub struct FilenamePoller {
    log_group: Arc<str>,
    globs: Vec<String>,
    matcher: Arc<LineMatcher>,
    shard_senders: Vec<mpsc::Sender<LineResult>>,
    pusher_stats: Vec<StatsHandle>,
    poll_interval: Duration,
    parse_from_start: bool,
    fail_regex_warn: bool,
    stats_interval: Duration,
    stop: watch::Receiver<bool>,

    shard_index: usize,
    pusher_index: usize,
    tailed: HashMap<PathBuf, JoinHandle<()>>,
}

impl FilenamePoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_group: Arc<str>,
        globs: Vec<String>,
        matcher: Arc<LineMatcher>,
        shard_senders: Vec<mpsc::Sender<LineResult>>,
        pusher_stats: Vec<StatsHandle>,
        poll_interval: Duration,
        parse_from_start: bool,
        fail_regex_warn: bool,
        stats_interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            log_group,
            globs,
            matcher,
            shard_senders,
            pusher_stats,
            poll_interval,
            parse_from_start,
            fail_regex_warn,
            stats_interval,
            stop,
            shard_index: 0,
            pusher_index: 0,
            tailed: HashMap::new(),
        }
    }

    fn discover(&self) -> Result<HashSet<PathBuf>, PollerError> {
        let mut found = HashSet::new();
        for pattern in &self.globs {
            let paths = glob::glob(pattern).map_err(|source| PollerError::InvalidGlob {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in paths.flatten() {
                found.insert(entry);
            }
        }
        Ok(found)
    }

    fn spawn_tailer(&mut self, path: PathBuf) {
        let shard_tx = self.shard_senders[self.shard_index].clone();
        let stats = self.pusher_stats[self.pusher_index].clone();
        self.shard_index = (self.shard_index + 1) % self.shard_senders.len();
        self.pusher_index = (self.pusher_index + 1) % self.pusher_stats.len();

        let tailer = FileTailer::new(
            path.clone(),
            self.log_group.clone(),
            self.matcher.clone(),
            shard_tx,
            self.stop.clone(),
            stats,
            self.parse_from_start,
            self.fail_regex_warn,
            self.stats_interval,
        );

        let log_group = self.log_group.clone();
        let display_path = path.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = tailer.run().await {
                tracing::warn!(log_group = %log_group, path = %display_path.display(), error = %err, "tailer exited");
            }
        });

        self.tailed.insert(path, handle);
    }

    /// Reconcile the tailed set against the current glob scan: spawn
    /// tailers for newly discovered files, and drop bookkeeping for tailers
    /// whose handle has already finished (file gone or tailer errored).
    fn reconcile(&mut self, discovered: &HashSet<PathBuf>) {
        self.tailed.retain(|_, handle| !handle.is_finished());

        for path in discovered {
            if !self.tailed.contains_key(path) {
                self.spawn_tailer(path.clone());
            }
        }
    }

    /// Run the poller until the stop signal fires, propagating stop to all
    /// live tailers (they share the same watch channel, so this is implicit).
    pub async fn run(mut self) -> Result<(), PollerError> {
        let mut ticker = interval(self.poll_interval);
        ticker.tick().await;

        loop {
            if *self.stop.borrow() {
                break;
            }

            match self.discover() {
                Ok(discovered) => self.reconcile(&discovered),
                Err(err) => tracing::warn!(log_group = %self.log_group, error = %err, "glob scan failed"),
            }

            tokio::select! {
                _ = self.stop.changed() => break,
                _ = ticker.tick() => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn matcher() -> Arc<LineMatcher> {
        Arc::new(LineMatcher::compile(&[r"^(\d+) (\d+)$".to_string()], 2, None).unwrap())
    }

    #[tokio::test]
    async fn test_poller_spawns_tailer_for_discovered_file() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("app.log");
        let mut file = std::fs::File::create(&file_path).unwrap();
        writeln!(file, "1 100").unwrap();
        file.flush().unwrap();

        let (shard_tx, mut shard_rx) = mpsc::channel(10);
        let (stats_handle, _stats_rx) = StatsHandle::new_for_test();
        let (stop_tx, stop_rx) = watch::channel(false);

        let glob_pattern = dir.path().join("*.log").to_string_lossy().to_string();
        let poller = FilenamePoller::new(
            Arc::from("hits"),
            vec![glob_pattern],
            matcher(),
            vec![shard_tx],
            vec![stats_handle],
            Duration::from_millis(20),
            true,
            false,
            Duration::from_secs(60),
            stop_rx,
        );

        let handle = tokio::spawn(poller.run());

        let line = tokio::time::timeout(Duration::from_secs(2), shard_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.captures, vec!["1 100", "1", "100"]);

        stop_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_round_robin_shard_assignment() {
        let dir = TempDir::new().unwrap();
        for i in 0..2 {
            let mut f = std::fs::File::create(dir.path().join(format!("{i}.log"))).unwrap();
            writeln!(f, "1 100").unwrap();
        }

        let (tx0, mut rx0) = mpsc::channel(10);
        let (tx1, mut rx1) = mpsc::channel(10);
        let (stats_handle, _stats_rx) = StatsHandle::new_for_test();
        let (stop_tx, stop_rx) = watch::channel(false);

        let glob_pattern = dir.path().join("*.log").to_string_lossy().to_string();
        let poller = FilenamePoller::new(
            Arc::from("hits"),
            vec![glob_pattern],
            matcher(),
            vec![tx0, tx1],
            vec![stats_handle],
            Duration::from_millis(20),
            true,
            false,
            Duration::from_secs(60),
            stop_rx,
        );

        let handle = tokio::spawn(poller.run());

        let a = tokio::time::timeout(Duration::from_secs(2), rx0.recv()).await;
        let b = tokio::time::timeout(Duration::from_secs(2), rx1.recv()).await;
        assert!(a.is_ok() && a.unwrap().is_some());
        assert!(b.is_ok() && b.unwrap().is_some());

        stop_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}

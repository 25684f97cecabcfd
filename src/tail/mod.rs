pub mod poller;

use crate::matcher::LineMatcher;
use crate::stats::{StatsHandle, TailCounters};
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One matched line plus the file it came from, as produced by a
/// [`FileTailer`] and consumed by a DataPool shard.
#[derive(Debug, Clone)]
pub struct LineResult {
    pub filename: Arc<str>,
    pub captures: Vec<String>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATS_LINE_BATCH: u64 = 100;

/// Follows one file indefinitely, emitting one [`LineResult`] per matched
/// line to its assigned shard channel. Reopens on rotation (inode change or
/// truncation); never tears down sibling tailers on failure.
pub struct FileTailer {
    path: PathBuf,
    filename: Arc<str>,
    log_group: Arc<str>,
    matcher: Arc<LineMatcher>,
    filename_captures: Vec<String>,
    shard_tx: mpsc::Sender<LineResult>,
    stop: watch::Receiver<bool>,
    stats: StatsHandle,
    parse_from_start: bool,
    fail_regex_warn: bool,
    stats_interval: Duration,

    file: Option<BufReader<File>>,
    inode: Option<u64>,
    counters: TailCounters,
    last_stats_flush: std::time::Instant,
}

impl FileTailer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: PathBuf,
        log_group: Arc<str>,
        matcher: Arc<LineMatcher>,
        shard_tx: mpsc::Sender<LineResult>,
        stop: watch::Receiver<bool>,
        stats: StatsHandle,
        parse_from_start: bool,
        fail_regex_warn: bool,
        stats_interval: Duration,
    ) -> Self {
        let filename: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
        let filename_captures = matcher.match_filename(&filename);
        Self {
            path,
            filename,
            log_group,
            matcher,
            filename_captures,
            shard_tx,
            stop,
            stats,
            parse_from_start,
            fail_regex_warn,
            stats_interval,
            file: None,
            inode: None,
            counters: TailCounters::default(),
            last_stats_flush: std::time::Instant::now(),
        }
    }

    fn open(&mut self) -> Result<(), TailError> {
        let file = File::open(&self.path).map_err(|source| TailError::Io {
            path: self.path.clone(),
            source,
        })?;
        let metadata = file.metadata().map_err(|source| TailError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.inode = Some(get_inode(&metadata));

        let mut reader = BufReader::new(file);
        if self.parse_from_start {
            reader.seek(SeekFrom::Start(0))
        } else {
            reader.seek(SeekFrom::End(0))
        }
        .map_err(|source| TailError::Io {
            path: self.path.clone(),
            source,
        })?;

        self.file = Some(reader);
        Ok(())
    }

    fn check_rotation(&self) -> bool {
        let Some(original) = self.inode else {
            return false;
        };
        match std::fs::metadata(&self.path) {
            Ok(metadata) => get_inode(&metadata) != original,
            Err(_) => false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, TailError> {
        if self.file.is_none() {
            self.open()?;
        }

        let mut buf = String::new();
        let bytes_read = {
            let reader = self.file.as_mut().expect("file opened above");
            reader.read_line(&mut buf).map_err(|source| TailError::Io {
                path: self.path.clone(),
                source,
            })?
        };

        if bytes_read == 0 {
            if self.check_rotation() {
                self.file = None;
            }
            return Ok(None);
        }

        self.counters.bytes_read += bytes_read as u64;
        self.counters.lines_read += 1;
        Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// Run the tailer to completion. Returns once the stop signal fires.
    pub async fn run(mut self) -> Result<(), TailError> {
        loop {
            if *self.stop.borrow() {
                return Ok(());
            }

            match self.read_line()? {
                Some(raw) => {
                    self.maybe_flush_stats().await;

                    if let Some(captures) = self.matcher.match_line(&raw) {
                        let mut captures = captures;
                        captures.extend(self.filename_captures.iter().cloned());
                        self.counters.lines_matched += 1;

                        let result = LineResult {
                            filename: self.filename.clone(),
                            captures,
                        };

                        tokio::select! {
                            _ = self.stop.changed() => return Ok(()),
                            send = self.shard_tx.send(result) => {
                                if send.is_err() {
                                    return Ok(());
                                }
                            }
                        }

                        if self.counters.lines_matched % STATS_LINE_BATCH == 0 {
                            self.flush_stats().await;
                        }
                    } else if self.fail_regex_warn {
                        tracing::warn!(filename = %self.filename, line = %raw, "line matched no declared pattern");
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.stop.changed() => return Ok(()),
                        _ = sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }

    async fn maybe_flush_stats(&mut self) {
        if self.last_stats_flush.elapsed() >= self.stats_interval {
            self.flush_stats().await;
        }
    }

    async fn flush_stats(&mut self) {
        self.stats
            .push_tail_counters(&self.filename, &self.log_group, &self.counters)
            .await;
        self.last_stats_flush = std::time::Instant::now();
    }
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    metadata.len().hash(&mut hasher);
    if let Ok(modified) = metadata.modified() {
        modified.hash(&mut hasher);
    }
    hasher.finish()
}

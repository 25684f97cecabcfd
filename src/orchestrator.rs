use crate::config::types::Config;
use crate::datapool::shard::DataPoolShard;
use crate::datapool::KeyError;
use crate::matcher::{LineMatcher, MatchError};
use crate::pusher::Pusher;
use crate::stats::StatsHandle;
use crate::tail::poller::FilenamePoller;
use chrono::Duration as LogDuration;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("log group '{group}': {source}")]
    Matcher {
        group: String,
        #[source]
        source: MatchError,
    },

    #[error("log group '{group}': {source}")]
    KeyBuilder {
        group: String,
        #[source]
        source: KeyError,
    },
}

/// Boot order, channel wiring, shard mapping, and staged shutdown: create
/// channels, start sinks first, then the stages that feed them, then the
/// sources that feed those. Shutdown is staged in the reverse order —
/// pollers (and, transitively, their spawned tailers, which share the same
/// watch channel) stop first, then DataPool shards drain and stop, then
/// Pushers — so nothing ever writes into a channel whose reader has
/// already exited.
pub async fn run(config: Config, do_not_send: bool) -> Result<(), OrchestratorError> {
    let host: Arc<str> = Arc::from(resolve_hostname());

    let (poller_stop_tx, poller_stop_rx) = watch::channel(false);
    let (datapool_stop_tx, datapool_stop_rx) = watch::channel(false);
    let (pusher_stop_tx, pusher_stop_rx) = watch::channel(false);

    // Pushers: one bounded channel (capacity 1000) and one task per shard.
    let mut pusher_senders = Vec::with_capacity(config.settings.push_number);
    let mut pusher_handles = Vec::with_capacity(config.settings.push_number);
    for number in 0..config.settings.push_number {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let self_stats = StatsHandle::new(host.clone(), tx.clone());
        let pusher = Pusher::new(
            number,
            &config.settings,
            do_not_send,
            rx,
            pusher_stop_rx.clone(),
            self_stats,
        );
        pusher_handles.push(tokio::spawn(pusher.run()));
        pusher_senders.push(tx);
    }

    // Per-log-group DataPool shards, then a FilenamePoller to feed them.
    let mut datapool_handles = Vec::new();
    let mut poller_handles = Vec::new();
    let mut pusher_rr = 0usize;

    for (name, group) in &config.log_groups {
        let log_group: Arc<str> = Arc::from(name.as_str());
        let matcher = Arc::new(
            LineMatcher::compile(
                &group.patterns,
                group.expected_matches,
                group.filename_match_re.as_deref(),
            )
            .map_err(|source| OrchestratorError::Matcher {
                group: name.clone(),
                source,
            })?,
        );

        let mut shard_senders = Vec::with_capacity(group.goroutines);
        let mut pusher_stats_for_tailers = Vec::with_capacity(group.goroutines);

        for shard_index in 0..group.goroutines {
            let (shard_tx, shard_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let pusher_tx = pusher_senders[pusher_rr % pusher_senders.len()].clone();
            pusher_rr += 1;
            let shard_stats = StatsHandle::new(host.clone(), pusher_tx.clone());

            let shard = DataPoolShard::new(
                log_group.clone(),
                shard_index,
                group,
                shard_rx,
                pusher_tx,
                shard_stats.clone(),
                datapool_stop_rx.clone(),
                LogDuration::seconds(group.interval_seconds as i64),
            )
            .map_err(|source| OrchestratorError::KeyBuilder {
                group: name.clone(),
                source,
            })?;

            datapool_handles.push(tokio::spawn(shard.run()));
            shard_senders.push(shard_tx);
            pusher_stats_for_tailers.push(shard_stats);
        }

        let poller = FilenamePoller::new(
            log_group.clone(),
            group.globs.clone(),
            matcher,
            shard_senders,
            pusher_stats_for_tailers,
            Duration::from_secs(config.settings.poll_interval),
            group.parse_from_start,
            group.fail_regex_warn,
            Duration::from_secs(group.interval_seconds),
            poller_stop_rx.clone(),
        );

        let group_name = name.clone();
        poller_handles.push(tokio::spawn(async move {
            if let Err(err) = poller.run().await {
                tracing::warn!(log_group = %group_name, error = %err, "filename poller exited");
            }
        }));
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping filename pollers");
    let _ = poller_stop_tx.send(true);
    for handle in poller_handles {
        let _ = handle.await;
    }

    tracing::info!("stopping data pool shards");
    let _ = datapool_stop_tx.send(true);
    for handle in datapool_handles {
        let _ = handle.await;
    }

    tracing::info!("stopping pushers");
    let _ = pusher_stop_tx.send(true);
    for handle in pusher_handles {
        let _ = handle.await;
    }

    Ok(())
}

fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
        _ = sighup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

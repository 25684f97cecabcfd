use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Self-metric counters accumulated by one [`crate::tail::FileTailer`]
/// between stats flushes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TailCounters {
    pub lines_read: u64,
    pub bytes_read: u64,
    pub lines_matched: u64,
}

/// Self-metric counters reported once per `interval` of log time by a
/// DataPool shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPoolCounters {
    pub key_tracked: u64,
    pub key_staled: u64,
}

/// Self-metric counters accumulated by a Pusher between stats flushes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PusherCounters {
    pub key_sent: u64,
    pub byte_sent: u64,
}

/// Formats and forwards the fixed self-metric lines described for the
/// collector (`logmetrics_collector.tail.*`, `.data_pool.*`, `.pusher.*`)
/// onto the same bounded pusher channel that carries ordinary metric lines,
/// per the design note that self-metrics share the main push channel.
#[derive(Clone)]
pub struct StatsHandle {
    host: Arc<str>,
    sender: mpsc::Sender<Vec<String>>,
}

impl StatsHandle {
    pub fn new(host: Arc<str>, sender: mpsc::Sender<Vec<String>>) -> Self {
        Self { host, sender }
    }

    /// A `StatsHandle` paired with the receiving end of its channel, for
    /// tests that want to inspect emitted self-metric lines directly.
    pub fn new_for_test() -> (Self, mpsc::Receiver<Vec<String>>) {
        let (tx, rx) = mpsc::channel(100);
        (Self::new(Arc::from("test-host"), tx), rx)
    }

    /// Blocks until the shared pusher channel has room. Self-metrics share
    /// the same backpressure contract as ordinary metric lines — a full
    /// channel must stall the emitter, never silently drop the batch.
    pub async fn push_tail_counters(&self, filename: &str, log_group: &str, counters: &TailCounters) {
        let now = Utc::now().timestamp();
        let tags = format!("host={} log_group={} filename={}", self.host, log_group, filename);
        let lines = vec![
            format!(
                "logmetrics_collector.tail.line_read {} {} {}",
                now, counters.lines_read, tags
            ),
            format!(
                "logmetrics_collector.tail.byte_read {} {} {}",
                now, counters.bytes_read, tags
            ),
            format!(
                "logmetrics_collector.tail.line_matched {} {} {}",
                now, counters.lines_matched, tags
            ),
        ];
        let _ = self.sender.send(lines).await;
    }

    pub async fn push_data_pool_counters(
        &self,
        log_group: &str,
        log_group_number: usize,
        counters: &DataPoolCounters,
    ) {
        let now = Utc::now().timestamp();
        let tags = format!(
            "host={} log_group={} log_group_number={}",
            self.host, log_group, log_group_number
        );
        let lines = vec![
            format!(
                "logmetrics_collector.data_pool.key_tracked {} {} {}",
                now, counters.key_tracked, tags
            ),
            format!(
                "logmetrics_collector.data_pool.key_staled {} {} {}",
                now, counters.key_staled, tags
            ),
        ];
        let _ = self.sender.send(lines).await;
    }

    pub async fn push_pusher_counters(&self, pusher_number: usize, counters: &PusherCounters) {
        let now = Utc::now().timestamp();
        let tags = format!("host={} pusher_number={}", self.host, pusher_number);
        let lines = vec![
            format!(
                "logmetrics_collector.pusher.key_sent {} {} {}",
                now, counters.key_sent, tags
            ),
            format!(
                "logmetrics_collector.pusher.byte_sent {} {} {}",
                now, counters.byte_sent, tags
            ),
        ];
        let _ = self.sender.send(lines).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tail_counters_render_expected_names_and_tags() {
        let (handle, mut rx) = StatsHandle::new_for_test();
        handle
            .push_tail_counters(
                "/var/log/app.log",
                "hits",
                &TailCounters {
                    lines_read: 10,
                    bytes_read: 200,
                    lines_matched: 9,
                },
            )
            .await;
        let lines = rx.recv().await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("logmetrics_collector.tail.line_read "));
        assert!(lines[0].contains("log_group=hits"));
        assert!(lines[0].contains("filename=/var/log/app.log"));
    }

    #[tokio::test]
    async fn test_data_pool_counters_render_expected_tags() {
        let (handle, mut rx) = StatsHandle::new_for_test();
        handle
            .push_data_pool_counters(
                "hits",
                2,
                &DataPoolCounters {
                    key_tracked: 5,
                    key_staled: 1,
                },
            )
            .await;
        let lines = rx.recv().await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("logmetrics_collector.data_pool.key_staled "));
        assert!(lines[1].contains("log_group_number=2"));
    }

    #[tokio::test]
    async fn test_pusher_counters_render_expected_tags() {
        let (handle, mut rx) = StatsHandle::new_for_test();
        handle
            .push_pusher_counters(
                0,
                &PusherCounters {
                    key_sent: 42,
                    byte_sent: 1024,
                },
            )
            .await;
        let lines = rx.recv().await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("logmetrics_collector.pusher.key_sent "));
        assert!(lines[0].contains("pusher_number=0"));
    }
}

use crate::config::types::{PushProto, PushType, Settings};
use crate::stats::{PusherCounters, StatsHandle};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};

const STATS_LINE_BATCH: u64 = 100;

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn connect(host: &str, port: u16, proto: PushProto) -> std::io::Result<Self> {
        match proto {
            PushProto::Tcp => TcpStream::connect((host, port)).await.map(Connection::Tcp),
            PushProto::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect((host, port)).await?;
                Ok(Connection::Udp(socket))
            }
        }
    }

    async fn write(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.write_all(line.as_bytes()).await,
            Connection::Udp(socket) => socket.send(line.as_bytes()).await.map(|_| ()),
        }
    }
}

enum Sink {
    Stdout,
    Network(Option<Connection>),
}

/// One long-lived output task owning a connection and a reconnect loop.
/// Reads bounded batches of already-rendered metric lines from a
/// shared many-writer/single-reader channel (DataPool shards and self-stats
/// emitters all write into the same pusher channel); frames and transports
/// each line, retrying forever on connect or write failure. A write blocks
/// until it succeeds, which is the backpressure signal that propagates
/// upstream through the bounded channels into the DataPool shards and, from
/// there, into the tailers' blocked reads.
pub struct Pusher {
    pusher_number: usize,
    host: String,
    port: u16,
    proto: PushProto,
    push_type: PushType,
    push_wait: Duration,
    stats_interval: Duration,

    input: mpsc::Receiver<Vec<String>>,
    stop: watch::Receiver<bool>,
    stats: StatsHandle,

    sink: Sink,
    counters: PusherCounters,
}

impl Pusher {
    pub fn new(
        pusher_number: usize,
        settings: &Settings,
        do_not_send: bool,
        input: mpsc::Receiver<Vec<String>>,
        stop: watch::Receiver<bool>,
        stats: StatsHandle,
    ) -> Self {
        Self {
            pusher_number,
            host: settings.push_host.clone(),
            port: settings.push_port,
            proto: settings.push_proto,
            push_type: settings.push_type,
            push_wait: Duration::from_secs(settings.push_wait),
            stats_interval: Duration::from_secs(settings.stats_interval),
            input,
            stop,
            stats,
            sink: if do_not_send {
                Sink::Stdout
            } else {
                Sink::Network(None)
            },
            counters: PusherCounters::default(),
        }
    }

    fn frame(&self, line: &str) -> String {
        match self.push_type {
            PushType::Tsd => format!("put {line}\n"),
            PushType::Plain => format!("{line}\n"),
        }
    }

    /// Run until the stop signal fires or the input channel closes (all
    /// writer handles dropped).
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.stats_interval);
        let mut last_flush = Instant::now();
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if last_flush.elapsed() >= self.stats_interval {
                        self.flush_stats().await;
                        last_flush = Instant::now();
                    }
                }
                maybe_batch = self.input.recv() => {
                    match maybe_batch {
                        Some(batch) => self.send_batch(batch).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn send_batch(&mut self, lines: Vec<String>) {
        for line in lines {
            if !self.send_line(&line).await {
                return;
            }
        }
    }

    /// Send one line, retrying forever until it succeeds or a stop signal
    /// arrives mid-retry. Returns `false` if stop fired before the line
    /// could be sent.
    async fn send_line(&mut self, line: &str) -> bool {
        let framed = self.frame(line);

        loop {
            if *self.stop.borrow() {
                return false;
            }

            match &mut self.sink {
                Sink::Stdout => {
                    print!("{framed}");
                    self.record_sent(framed.len()).await;
                    return true;
                }
                Sink::Network(slot) => {
                    if slot.is_none() {
                        match Connection::connect(&self.host, self.port, self.proto).await {
                            Ok(conn) => *slot = Some(conn),
                            Err(err) => {
                                tracing::warn!(
                                    host = %self.host,
                                    port = self.port,
                                    error = %err,
                                    "pusher connect failed, retrying"
                                );
                                if !self.wait_or_stop().await {
                                    return false;
                                }
                                continue;
                            }
                        }
                    }

                    let conn = slot.as_mut().expect("connected above");
                    match conn.write(&framed).await {
                        Ok(()) => {
                            self.record_sent(framed.len()).await;
                            return true;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "pusher write failed, reconnecting");
                            *slot = None;
                            if !self.wait_or_stop().await {
                                return false;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Sleep `push_wait`, racing the stop signal. Returns `false` if stop
    /// fired during the sleep.
    async fn wait_or_stop(&mut self) -> bool {
        tokio::select! {
            changed = self.stop.changed() => changed.is_err() || !*self.stop.borrow(),
            _ = tokio::time::sleep(self.push_wait) => true,
        }
    }

    async fn record_sent(&mut self, bytes: usize) {
        self.counters.key_sent += 1;
        self.counters.byte_sent += bytes as u64;
        if self.counters.key_sent % STATS_LINE_BATCH == 0 {
            self.flush_stats().await;
        }
    }

    async fn flush_stats(&self) {
        self.stats
            .push_pusher_counters(self.pusher_number, &self.counters)
            .await;
    }
}

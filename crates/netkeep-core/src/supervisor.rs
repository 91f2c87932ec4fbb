//! Keeps the control channel to the remote controller alive.
//!
//! One session at a time: connect, read commands until the link drops, wait
//! `retry_delay`, reconnect. A successful open resets the failure counter;
//! the supervisor gives up after `max_retries` consecutive failed sessions.

use crate::config::ControlConfig;
use crate::dispatch::Dispatcher;
use crate::error::SupervisorError;
use crate::pipeline::CommandPipeline;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Connected,
    /// Retries exhausted.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Retry(Duration),
    Stop,
}

/// Consecutive-failure bookkeeping for the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    consecutive_failures: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl ConnectionState {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            max_retries,
            retry_delay,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_connected(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Records a failed connect or a closed session.
    pub fn record_failure(&mut self) -> Backoff {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > self.max_retries {
            Backoff::Stop
        } else {
            Backoff::Retry(self.retry_delay)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub url: Url,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub workers: usize,
    pub queue_depth: usize,
}

impl SupervisorConfig {
    pub fn new(url: &str) -> Result<Self, SupervisorError> {
        Self::from_control(&ControlConfig {
            url: Some(url.to_string()),
            ..ControlConfig::default()
        })
    }

    pub fn from_control(control: &ControlConfig) -> Result<Self, SupervisorError> {
        let raw = control
            .url
            .as_deref()
            .ok_or_else(|| SupervisorError::InvalidUrl("control.url is not set".to_string()))?;
        let url = Url::parse(raw)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SupervisorError::InvalidUrl(format!(
                "expected ws:// or wss://, got {}",
                url
            )));
        }
        Ok(Self {
            url,
            max_retries: control.max_retries,
            retry_delay: Duration::from_secs(control.retry_delay_secs),
            connect_timeout: Duration::from_secs(control.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(control.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(control.keepalive_timeout_secs),
            workers: control.workers,
            queue_depth: control.queue_depth,
        })
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    state: ConnectionState,
    dispatcher: Arc<Dispatcher>,
    pipeline: CommandPipeline,
    phase: watch::Sender<LinkPhase>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let state = ConnectionState::new(config.max_retries, config.retry_delay);
        let (phase, _) = watch::channel(LinkPhase::Disconnected);
        let pipeline = CommandPipeline::new(Arc::clone(&dispatcher), config.workers);
        Self {
            config,
            state,
            dispatcher,
            pipeline,
            phase,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkPhase> {
        self.phase.subscribe()
    }

    /// Failure bookkeeping, as left by the last session or connect attempt.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Runs sessions until retries are exhausted. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        loop {
            self.phase.send_replace(LinkPhase::Connecting);
            info!(
                url = %self.config.url,
                failures = self.state.consecutive_failures(),
                "connecting to controller"
            );
            let reason = match self.connect().await {
                Ok(ws) => {
                    self.state.record_connected();
                    self.phase.send_replace(LinkPhase::Connected);
                    info!(url = %self.config.url, "control channel established");
                    self.serve(ws).await
                }
                Err(e) => e.to_string(),
            };
            self.phase.send_replace(LinkPhase::Disconnected);

            match self.state.record_failure() {
                Backoff::Retry(delay) => {
                    warn!(
                        reason = %reason,
                        failures = self.state.consecutive_failures(),
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "control channel down, reconnecting"
                    );
                    sleep(delay).await;
                }
                Backoff::Stop => {
                    let failures = self.state.consecutive_failures();
                    self.phase.send_replace(LinkPhase::Stopped);
                    error!(
                        reason = %reason,
                        failures,
                        url = %self.config.url,
                        "control channel retries exhausted"
                    );
                    return Err(SupervisorError::RetriesExhausted { failures });
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, SupervisorError> {
        let (ws, _response) = timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| {
                SupervisorError::ConnectionLost(format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                ))
            })?
            .map_err(|e| SupervisorError::ConnectionLost(e.to_string()))?;
        Ok(ws)
    }

    /// Serves one session; returns why it ended.
    async fn serve(&mut self, ws: WsStream) -> String {
        let (sink, mut stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let carried = self.pipeline.in_flight_users();
        if carried > 0 {
            debug!(users = carried, "commands from the previous session still running");
        }
        let mut replies = self.pipeline.open(self.config.queue_depth);

        let reply_sink = Arc::clone(&sink);
        let mut writer = tokio::spawn(async move {
            while let Some(frames) = replies.next().await {
                for frame in frames {
                    let text = frame.to_string();
                    debug!(op = %frame.op, username = %frame.username, code = frame.code(), "sending status");
                    reply_sink
                        .lock()
                        .await
                        .send(Message::Text(text))
                        .await
                        .map_err(|e| e.to_string())?;
                }
            }
            Ok::<(), String>(())
        });

        let mut keepalive = interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;
        let mut last_seen = Instant::now();

        let reason = loop {
            tokio::select! {
                next = stream.next() => {
                    let msg = match next {
                        None => break "stream ended".to_string(),
                        Some(Err(e)) => break format!("read error: {}", e),
                        Some(Ok(msg)) => msg,
                    };
                    last_seen = Instant::now();
                    match msg {
                        Message::Text(text) => {
                            if let Some(cmd) = self.dispatcher.parse(&text) {
                                debug!(kind = ?cmd.kind, username = %cmd.credential.username, "command received");
                                if self.pipeline.submit(cmd).await.is_err() {
                                    break "status writer stopped".to_string();
                                }
                                // A full reply queue blocks submit; that wait is not silence.
                                last_seen = Instant::now();
                            }
                        }
                        Message::Close(frame) => {
                            let why = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            break format!("closed by controller: {:?}", why);
                        }
                        Message::Binary(data) => {
                            warn!(len = data.len(), "ignoring binary control frame");
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
                _ = keepalive.tick() => {
                    if last_seen.elapsed() >= self.config.keepalive_timeout {
                        break format!("no traffic for {:?}", last_seen.elapsed());
                    }
                    if let Err(e) = sink.lock().await.send(Message::Ping(Vec::new())).await {
                        break format!("keepalive ping failed: {}", e);
                    }
                }
                res = &mut writer => {
                    break match res {
                        Ok(Ok(())) => "status writer finished".to_string(),
                        Ok(Err(e)) => format!("write error: {}", e),
                        Err(e) => format!("status writer failed: {}", e),
                    };
                }
            }
        };

        writer.abort();
        self.pipeline.close();
        let _ = sink.lock().await.close().await;
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_reset_on_connect() {
        let mut state = ConnectionState::new(2, Duration::from_secs(5));
        assert_eq!(state.record_failure(), Backoff::Retry(Duration::from_secs(5)));
        assert_eq!(state.record_failure(), Backoff::Retry(Duration::from_secs(5)));
        state.record_connected();
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.record_failure(), Backoff::Retry(Duration::from_secs(5)));
    }

    #[test]
    fn stops_after_max_retries_plus_one_failures() {
        let mut state = ConnectionState::new(3, Duration::from_millis(10));
        for _ in 0..3 {
            assert!(matches!(state.record_failure(), Backoff::Retry(_)));
        }
        assert_eq!(state.record_failure(), Backoff::Stop);
        assert_eq!(state.consecutive_failures(), 4);
    }

    #[test]
    fn zero_retries_stops_on_first_failure() {
        let mut state = ConnectionState::new(0, Duration::from_secs(1));
        assert_eq!(state.record_failure(), Backoff::Stop);
    }

    #[test]
    fn config_requires_websocket_url() {
        assert!(SupervisorConfig::new("ws://127.0.0.1:9000/ctl").is_ok());
        assert!(matches!(
            SupervisorConfig::new("http://127.0.0.1:9000/ctl"),
            Err(SupervisorError::InvalidUrl(_))
        ));
        assert!(matches!(
            SupervisorConfig::new("not a url"),
            Err(SupervisorError::InvalidUrl(_))
        ));
        assert!(matches!(
            SupervisorConfig::from_control(&ControlConfig::default()),
            Err(SupervisorError::InvalidUrl(_))
        ));
    }

    #[test]
    fn config_copies_control_settings() {
        let control = ControlConfig {
            url: Some("wss://controller.example/netkeep".to_string()),
            max_retries: 7,
            retry_delay_secs: 3,
            workers: 4,
            ..ControlConfig::default()
        };
        let cfg = SupervisorConfig::from_control(&control).expect("config");
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.retry_delay, Duration::from_secs(3));
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.keepalive_timeout, Duration::from_secs(60));
    }
}

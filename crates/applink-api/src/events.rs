//! Server-sent event stream with auto-reconnect.
//!
//! Connects to a device's `events` endpoint and streams parsed telemetry
//! through a [`tokio::sync::broadcast`] channel. Reconnects after a fixed
//! delay plus a per-accessory stagger offset, and recycles the channel on a
//! schedule to guard against connections the remote silently abandons.
//!
//! # Example
//!
//! ```rust,ignore
//! use applink_api::events::{StreamConfig, StreamConnection};
//!
//! let stream = StreamConnection::new(events_url, token, &transport, StreamConfig::default())?;
//! let mut rx = stream.subscribe();
//! stream.connect();
//!
//! while let Ok(status) = rx.recv().await {
//!     println!("status: {}", status.status.value_raw);
//! }
//!
//! stream.shutdown();
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::models::DeviceStatus;
use crate::token::TokenManager;
use crate::transport::TransportConfig;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── StreamConfig ─────────────────────────────────────────────────────

/// Reconnect tuning for one event channel.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Delay before a reconnection attempt after an error or remote close.
    /// Default: 60s.
    pub reconnect_delay: Duration,

    /// The channel is torn down and re-established on this interval even
    /// when healthy. Default: 60min.
    pub forced_reconnect_interval: Duration,

    /// Per-accessory offset added to startup and every reconnect delay,
    /// spreading simultaneous reconnect storms. Allocate via
    /// [`StaggerAllocator`].
    pub stagger: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(60),
            forced_reconnect_interval: Duration::from_secs(60 * 60),
            stagger: Duration::ZERO,
        }
    }
}

// ── StaggerAllocator ─────────────────────────────────────────────────

/// Hands out strictly increasing stagger offsets, one per constructed
/// accessory. The counter lives for the whole process and resets only at
/// restart.
#[derive(Debug)]
pub struct StaggerAllocator {
    step: Duration,
    issued: AtomicU32,
}

impl StaggerAllocator {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            issued: AtomicU32::new(0),
        }
    }

    /// The next offset: `0, step, 2*step, ...`
    pub fn next_offset(&self) -> Duration {
        self.step * self.issued.fetch_add(1, Ordering::Relaxed)
    }
}

// ── ChannelState ─────────────────────────────────────────────────────

/// Observable lifecycle of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

// ── StreamConnection ─────────────────────────────────────────────────

/// Live-update channel for a single device.
///
/// Cheaply cloneable. Exactly one channel is live at a time:
/// [`connect`](Self::connect) silences and discards any existing channel
/// before opening a new one.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    endpoint: Url,
    token: Arc<TokenManager>,
    http: reqwest::Client,
    config: StreamConfig,
    event_tx: broadcast::Sender<Arc<DeviceStatus>>,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
    channel: Mutex<Option<Channel>>,
}

struct Channel {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamConnection {
    /// Create a connection for one device's `events` endpoint. Does not
    /// connect -- call [`connect`](Self::connect).
    pub fn new(
        endpoint: Url,
        token: Arc<TokenManager>,
        transport: &TransportConfig,
        config: StreamConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_streaming_client()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);

        Ok(Self {
            inner: Arc::new(StreamInner {
                endpoint,
                token,
                http,
                config,
                event_tx,
                state_tx,
                cancel: CancellationToken::new(),
                channel: Mutex::new(None),
            }),
        })
    }

    /// Open the channel, replacing any existing one.
    ///
    /// Idempotent: the previous channel is cancelled and hard-stopped
    /// before the new one spawns, so a reconnect can never deliver
    /// duplicate telemetry.
    pub fn connect(&self) {
        let mut guard = self.inner.channel.lock().expect("channel lock poisoned");

        if let Some(old) = guard.take() {
            debug!("closing existing event channel before reconnect");
            old.cancel.cancel();
            old.task.abort();
        }

        let child = self.inner.cancel.child_token();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(channel_loop(inner, child.clone()));

        *guard = Some(Channel {
            cancel: child,
            task,
        });
    }

    /// Get a new receiver for parsed telemetry events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeviceStatus>> {
        self.inner.event_tx.subscribe()
    }

    /// Observe the channel lifecycle.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    /// Tear the channel down: cancels the pending reconnect timer and the
    /// live channel. No events are delivered afterward.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(channel) = self
            .inner
            .channel
            .lock()
            .expect("channel lock poisoned")
            .take()
        {
            channel.cancel.cancel();
            channel.task.abort();
        }
        let _ = self.inner.state_tx.send(ChannelState::Disconnected);
    }

    #[cfg(test)]
    fn current_channel_token(&self) -> Option<CancellationToken> {
        self.inner
            .channel
            .lock()
            .expect("channel lock poisoned")
            .as_ref()
            .map(|c| c.cancel.clone())
    }
}

// ── Background channel loop ──────────────────────────────────────────

/// Outcome of a single channel lifetime.
enum ChannelEnd {
    /// The remote closed the stream (or we were cancelled).
    Closed,
    /// Scheduled recycle fired; reconnect without delay.
    Recycle,
}

/// Main loop: stagger → connect → read → on error/close, delay → reconnect.
async fn channel_loop(inner: Arc<StreamInner>, cancel: CancellationToken) {
    // Staggered startup spreads the initial rush when many accessories
    // come up at the same moment.
    if !inner.config.stagger.is_zero() {
        debug!(
            stagger_ms = inner.config.stagger.as_millis() as u64,
            "staggering channel startup"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(inner.config.stagger) => {}
        }
    }

    loop {
        let _ = inner.state_tx.send(ChannelState::Connecting);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = run_channel(&inner, &cancel) => {
                match outcome {
                    Ok(ChannelEnd::Recycle) => {
                        info!("recycling event channel on schedule");
                        continue;
                    }
                    // A close without an error payload is the remote ending
                    // the stream cleanly; same reconnect path, lower severity.
                    Ok(ChannelEnd::Closed) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        info!("remote closed the event channel, reconnecting");
                    }
                    Err(e) => warn!(error = %e, "event channel failed, reconnecting"),
                }

                let _ = inner.state_tx.send(ChannelState::Backoff);
                let delay = inner.config.reconnect_delay + inner.config.stagger;
                debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let _ = inner.state_tx.send(ChannelState::Disconnected);
    debug!("event channel loop exiting");
}

/// Establish a single channel and read events until it ends.
async fn run_channel(
    inner: &StreamInner,
    cancel: &CancellationToken,
) -> Result<ChannelEnd, Error> {
    debug!(endpoint = %inner.endpoint, "connecting to event stream");

    let auth = inner.token.access_header();
    let response = inner
        .http
        .get(inner.endpoint.clone())
        .header(header::AUTHORIZATION, auth.as_str())
        .header(header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(Error::Transport)?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authorization {
            message: "bearer token rejected by event stream".into(),
        });
    }
    if !status.is_success() {
        return Err(Error::Api {
            message: "event stream refused".into(),
            status: status.as_u16(),
        });
    }

    info!("event channel connected");
    let _ = inner.state_tx.send(ChannelState::Connected);

    let mut frames = response.bytes_stream();
    let mut parser = SseParser::default();
    let recycle = tokio::time::sleep(inner.config.forced_reconnect_interval);
    tokio::pin!(recycle);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ChannelEnd::Closed),
            _ = &mut recycle => return Ok(ChannelEnd::Recycle),
            frame = frames.next() => match frame {
                Some(Ok(chunk)) => {
                    for event in parser.feed(&chunk) {
                        handle_event(&event, &inner.event_tx);
                    }
                }
                Some(Err(e)) => return Err(Error::Transport(e)),
                None => return Ok(ChannelEnd::Closed),
            }
        }
    }
}

/// Route one parsed stream event.
fn handle_event(event: &SseEvent, event_tx: &broadcast::Sender<Arc<DeviceStatus>>) {
    match event.name.as_str() {
        "device" => match serde_json::from_str::<DeviceStatus>(&event.data) {
            Ok(status) => {
                // Ignore send errors -- just means no active subscribers.
                let _ = event_tx.send(Arc::new(status));
            }
            Err(e) => debug!(error = %e, "could not parse device event payload"),
        },
        "ping" => trace!("event stream keepalive"),
        other => debug!(event = other, "ignoring unknown event kind"),
    }
}

// ── SSE frame parsing ────────────────────────────────────────────────

/// One complete server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SseEvent {
    name: String,
    data: String,
}

/// Incremental parser over transport chunks. Events end at a blank line;
/// chunk boundaries may fall anywhere, including inside a line.
#[derive(Debug, Default)]
struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feed a chunk, returning every event it completes.
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // Carriage returns are stripped up front so frame detection only
        // has to deal with `\n\n`.
        self.buffer
            .push_str(&String::from_utf8_lossy(chunk).replace('\r', ""));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut name = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            name = rest.trim_start().to_owned();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with(':') {
            // comment line, ignore
        }
        // id:/retry: fields are irrelevant for this API
    }

    if name.is_empty() && data_lines.is_empty() {
        return None;
    }
    if name.is_empty() {
        name = "message".into();
    }
    Some(SseEvent {
        name,
        data: data_lines.join("\n"),
    })
}

// ── Tests ────────────────────────────────────────────────────────────

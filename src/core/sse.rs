//! Server-Sent Events sessions.
//!
//! An SSE route's response is switched to a streaming body before its handler
//! runs. The handler receives an [`SseSession`] through the request context and
//! pushes frames into it; the frames are flushed to the client as the server
//! polls the body. Dropping or closing the session ends the stream and stops
//! the heartbeat task.
use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderValue, StatusCode, Version, header};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::core::response::HttpResponse;

pub const DEFAULT_PING_EVENT: &str = "ping";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SseError {
    #[error("SSE client disconnected")]
    Disconnected,
    #[error("Failed to serialize SSE payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-route SSE settings.
#[derive(Debug, Clone, Default)]
pub struct SseOptions {
    /// Reconnect delay advertised to the client with a `retry:` frame.
    pub retry: Option<Duration>,
    /// When set, a ping event is emitted on this interval.
    pub ping_interval: Option<Duration>,
    /// Event name for pings, `ping` when unset.
    pub ping_event: Option<String>,
}

impl SseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_ping(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn with_ping_event(mut self, event: impl Into<String>) -> Self {
        self.ping_event = Some(event.into());
        self
    }
}

/// Optional `event:` and `id:` lines for a data frame.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub event: Option<String>,
    pub id: Option<String>,
}

impl SendOptions {
    pub fn event(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

pub struct SseSession {
    tx: mpsc::UnboundedSender<Bytes>,
    last_event_id: Option<String>,
    cancel: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
    pings: Arc<AtomicU64>,
}

impl std::fmt::Debug for SseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseSession")
            .field("last_event_id", &self.last_event_id)
            .field("heartbeat_running", &self.heartbeat_running())
            .field("pings", &self.heartbeats_sent())
            .finish()
    }
}

impl SseSession {
    /// Opens a session and returns the streaming body that carries its frames.
    pub fn open(options: &SseOptions, last_event_id: Option<String>) -> (Self, Body) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = UnboundedReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
        let session = Self::start(tx, options, last_event_id);
        (session, Body::from_stream(stream))
    }

    /// Like [`SseSession::open`] but exposes the raw frame receiver.
    pub fn channel(
        options: &SseOptions,
        last_event_id: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::start(tx, options, last_event_id), rx)
    }

    fn start(
        tx: mpsc::UnboundedSender<Bytes>,
        options: &SseOptions,
        last_event_id: Option<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pings = Arc::new(AtomicU64::new(0));

        let mut session = Self {
            tx,
            last_event_id,
            cancel,
            heartbeat: None,
            pings,
        };

        if let Some(retry) = options.retry {
            let _ = session.set_retry(retry);
        }

        if let Some(interval) = options.ping_interval.filter(|i| !i.is_zero()) {
            let event = options
                .ping_event
                .clone()
                .unwrap_or_else(|| DEFAULT_PING_EVENT.to_string());
            session.heartbeat = Some(spawn_heartbeat(
                session.tx.clone(),
                session.cancel.clone(),
                interval,
                event,
                session.pings.clone(),
            ));
        }

        session
    }

    /// The `Last-Event-ID` header sent by a reconnecting client.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn set_retry(&self, delay: Duration) -> Result<(), SseError> {
        self.push(Bytes::from(format!("retry: {}\n\n", delay.as_millis())))
    }

    /// Sends one data frame. Strings and other scalars are written as-is,
    /// objects and arrays as JSON.
    pub fn send_data<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: &SendOptions,
    ) -> Result<(), SseError> {
        let payload = match serde_json::to_value(data)? {
            Value::String(text) => text,
            value @ (Value::Object(_) | Value::Array(_)) => serde_json::to_string(&value)?,
            scalar => scalar.to_string(),
        };
        self.push(encode_frame(
            options.event.as_deref(),
            options.id.as_deref(),
            &payload,
        ))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the client has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Ends the stream. The heartbeat task has stopped when this returns.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }
    }

    fn push(&self, frame: Bytes) -> Result<(), SseError> {
        self.tx.send(frame).map_err(|_| SseError::Disconnected)
    }
}

impl Drop for SseSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Switches `res` to an event stream and returns the session feeding it.
pub(crate) fn attach(
    res: &mut HttpResponse,
    options: &SseOptions,
    last_event_id: Option<String>,
    version: Version,
) -> SseSession {
    let (session, body) = SseSession::open(options, last_event_id);
    res.set_status(StatusCode::OK);
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    // Connection-specific headers are not allowed from HTTP/2 on
    if version < Version::HTTP_2 {
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    res.start_stream(body);
    session
}

fn spawn_heartbeat(
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    interval: Duration,
    event: String,
    pings: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    let seq = pings.fetch_add(1, Ordering::Relaxed) + 1;
                    if tx.send(encode_frame(Some(&event), None, &seq.to_string())).is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(pings = pings.load(Ordering::Relaxed), "SSE heartbeat stopped");
    })
}

/// `event` and `id` are single-line fields; line breaks in them are dropped
/// so a value cannot start a new field.
pub(crate) fn encode_frame(event: Option<&str>, id: Option<&str>, data: &str) -> Bytes {
    let mut frame = String::with_capacity(data.len() + 32);
    if let Some(event) = event {
        push_field(&mut frame, "event", event);
    }
    if let Some(id) = id {
        push_field(&mut frame, "id", id);
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.trim_end_matches('\r'));
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

fn push_field(frame: &mut String, name: &str, value: &str) {
    frame.push_str(name);
    frame.push_str(": ");
    frame.extend(value.chars().filter(|c| !matches!(c, '\r' | '\n')));
    frame.push('\n');
}

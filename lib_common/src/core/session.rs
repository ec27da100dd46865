//! # Stream Session
//!
//! Owns one live, keyword-filtered connection to the upstream stream and the
//! worker task that drains it. Every change to the filter retires the running
//! generation completely (cancel, join, confirm) before the next connection is
//! opened, so there is never more than one worker feeding the match callback.
//!
//! ```text
//! Idle --start--> Starting --connected--> Running --stop/restart--> Stopping --> Idle
//! ```

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::{SessionError, TransportError};

/// Lifecycle states of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No worker is alive.
    Idle,
    /// A connection was opened, the remote has not acknowledged it yet.
    Starting,
    /// The remote acknowledged the connection and items are flowing.
    Running,
    /// The worker has been told to disconnect and is being joined.
    Stopping,
}

/// One item received from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem {
    /// Upstream identifier of the item.
    pub id: String,
    /// The item text that gets relayed.
    pub text: String,
    /// Whether the item is a reshare of someone else's content.
    pub reshare: bool,
}

impl StreamItem {
    /// An original (non-reshared) item.
    pub fn original(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            reshare: false,
        }
    }

    /// A reshared item.
    pub fn reshared(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            reshare: true,
        }
    }
}

/// Events produced by an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The remote acknowledged the connection. May repeat after a reconnect.
    Connected,
    /// An item matching the filter.
    Item(StreamItem),
}

/// The event stream handed back by [`StreamTransport::open`]. Dropping it closes
/// the connection.
pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// The upstream streaming collaborator.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens a connection filtered on `keywords`.
    ///
    /// Authentication and network setup failures are returned here, not
    /// retried.
    async fn open(&self, keywords: &[String]) -> Result<EventStream, TransportError>;
}

/// Receives what the worker accepts from the stream.
#[async_trait]
pub trait StreamListener: Send + Sync {
    /// Called on the worker for every accepted (non-reshared) item.
    async fn on_item(&self, item: StreamItem);

    /// Called when the stream fails or ends while the session is live.
    async fn on_failure(&self, error: TransportError);
}

#[derive(Debug, Default)]
struct ConnectTimes {
    master: OnceLock<DateTime<Local>>,
    last: Mutex<Option<DateTime<Local>>>,
}

impl ConnectTimes {
    fn record(&self, at: DateTime<Local>) {
        let first = self.master.get_or_init(|| at);
        match self.last.lock() {
            Ok(mut last) => *last = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
        info!("Connected to stream at {} (up since {})", at.to_rfc3339(), first.to_rfc3339());
    }

    fn last(&self) -> Option<DateTime<Local>> {
        match self.last.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A restartable, keyword-filtered stream connection.
pub struct StreamSession {
    transport: Arc<dyn StreamTransport>,
    state: Arc<watch::Sender<SessionState>>,
    times: Arc<ConnectTimes>,
    filter: Vec<String>,
    worker: Option<Worker>,
    generation: u64,
    join_timeout: Duration,
}

impl StreamSession {
    /// Creates an idle session. `join_timeout` bounds how long `stop` waits for
    /// the worker before aborting it.
    pub fn new(transport: Arc<dyn StreamTransport>, join_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            state: Arc::new(state),
            times: Arc::new(ConnectTimes::default()),
            filter: Vec::new(),
            worker: None,
            generation: 0,
            join_timeout,
        }
    }

    /// Retires the current generation, if any, and opens a new one filtered on
    /// `keywords`.
    ///
    /// An empty filter is rejected before anything is touched.
    pub async fn start(
        &mut self,
        keywords: Vec<String>,
        listener: Arc<dyn StreamListener>,
    ) -> Result<(), SessionError> {
        if keywords.is_empty() {
            warn!("Ignoring stream start with an empty filter");
            return Err(SessionError::EmptyFilter);
        }

        self.stop().await;

        self.generation += 1;
        self.state.send_replace(SessionState::Starting);
        info!("Opening stream generation {} with filter {:?}", self.generation, keywords);

        let events = match self.transport.open(&keywords).await {
            Ok(events) => events,
            Err(e) => {
                error!("Stream generation {} failed to open: {}", self.generation, e);
                self.state.send_replace(SessionState::Idle);
                return Err(SessionError::Open(e));
            }
        };

        self.filter = keywords;
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            generation: self.generation,
            state: Arc::clone(&self.state),
            times: Arc::clone(&self.times),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(ctx.run(events, listener));
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Disconnects the worker and waits for it to finish. Calling this on an
    /// idle session does nothing.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        info!("Stopping stream generation {}", self.generation);
        self.state.send_replace(SessionState::Stopping);
        worker.cancel.cancel();

        let mut handle = worker.handle;
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(())) => debug!("Stream generation {} joined", self.generation),
            Ok(Err(e)) => warn!("Stream generation {} ended abnormally: {}", self.generation, e),
            Err(_) => {
                warn!(
                    "Stream generation {} did not stop within {:?}, aborting",
                    self.generation, self.join_timeout
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        self.filter.clear();
        self.state.send_replace(SessionState::Idle);
        info!("Stream closed");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The filter of the live generation, empty when idle.
    pub fn filter(&self) -> &[String] {
        &self.filter
    }

    /// Number of generations started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The generation the next `start` will run as.
    pub fn next_generation(&self) -> u64 {
        self.generation + 1
    }

    /// When the stream first connected. Never overwritten by reconnects.
    pub fn master_timestamp(&self) -> Option<DateTime<Local>> {
        self.times.master.get().copied()
    }

    /// When the stream most recently connected.
    pub fn last_connected(&self) -> Option<DateTime<Local>> {
        self.times.last()
    }
}

struct WorkerContext {
    generation: u64,
    state: Arc<watch::Sender<SessionState>>,
    times: Arc<ConnectTimes>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(self, mut events: EventStream, listener: Arc<dyn StreamListener>) {
        debug!("Stream worker for generation {} started", self.generation);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = events.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Connected)) => self.on_connect(),
                Some(Ok(StreamEvent::Item(item))) => {
                    if item.reshare {
                        trace!("Skipping reshared item {}", item.id);
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = listener.on_item(item) => {}
                    }
                }
                Some(Err(e)) => {
                    error!("Stream generation {} failed: {}", self.generation, e);
                    self.fail(listener.as_ref(), e).await;
                    break;
                }
                None => {
                    warn!("Stream generation {} closed by remote host", self.generation);
                    let e = TransportError::Disconnected("stream closed by remote host".to_string());
                    self.fail(listener.as_ref(), e).await;
                    break;
                }
            }
        }
        debug!("Stream worker for generation {} exiting", self.generation);
    }

    fn on_connect(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Starting {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        self.times.record(Local::now());
    }

    async fn fail(&self, listener: &dyn StreamListener, error: TransportError) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_if_modified(|state| {
            if matches!(*state, SessionState::Starting | SessionState::Running) {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        });
        listener.on_failure(error).await;
    }
}

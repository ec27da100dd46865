//! # Relay
//!
//! The single mutual-exclusion domain of the engine. One lock guards both the
//! subscription set and the stream session handle, so a restart triggered by a
//! command and a match count coming from the worker are always serialized, and
//! a new generation is only opened once the previous one has been joined.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::info;
use tokio::sync::{mpsc, watch, Mutex};

use crate::core::bridge::{ChatSink, FaultReceiver, FaultSender, RelayListener};
use crate::core::commands::{interpret, Command, CommandContext, Mutation, Reply, StreamAction};
use crate::core::error::{RelayFault, RelayResult, SessionError};
use crate::core::session::{SessionState, StreamSession, StreamTransport};
use crate::core::subscriptions::SubscriptionSet;

/// Settings the relay needs from the bootstrap layer.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Channel matched items are posted to.
    pub relay_channel: String,
    /// Upper bound on waiting for a stream worker to stop.
    pub join_timeout: Duration,
}

pub(crate) struct RelayCore {
    pub(crate) subscriptions: SubscriptionSet,
    session: StreamSession,
    started: bool,
    // Whether the last lifecycle action left a stream meant to be live.
    streaming: bool,
}

/// Cloneable handle on the relay engine.
#[derive(Clone)]
pub struct Relay {
    core: Arc<Mutex<RelayCore>>,
    sink: Arc<dyn ChatSink>,
    relay_channel: String,
    faults: FaultSender,
    started_at: DateTime<Local>,
}

impl Relay {
    /// Builds the relay and the fault channel the control loop listens on.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        sink: Arc<dyn ChatSink>,
        settings: RelaySettings,
    ) -> (Self, FaultReceiver) {
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let core = RelayCore {
            subscriptions: SubscriptionSet::new(),
            session: StreamSession::new(transport, settings.join_timeout),
            started: false,
            streaming: false,
        };
        let relay = Self {
            core: Arc::new(Mutex::new(core)),
            sink,
            relay_channel: settings.relay_channel,
            faults,
            started_at: Local::now(),
        };
        (relay, fault_rx)
    }

    /// Interprets and applies `command`, returning the reply to post.
    ///
    /// A stream that fails to open is returned as an error; the keywords stay
    /// tracked.
    pub async fn execute(&self, command: &Command) -> RelayResult<Reply> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;

        let now = Local::now();
        let ctx = CommandContext {
            subscriptions: &core.subscriptions,
            started: core.started,
            uptime: now - self.started_at,
            stream_since: core.session.master_timestamp(),
            stream_last: core.session.last_connected(),
            now,
        };
        let outcome = interpret(&ctx, command);
        info!("{:?} cmd was issued, applying {:?} / {:?}", command.verb, outcome.mutation, outcome.action);

        match outcome.mutation {
            Mutation::None => {}
            Mutation::Add(keywords) => {
                let added = core.subscriptions.add(&keywords);
                info!("Added subscriptions {:?}, now tracking {:?}", added, core.subscriptions.snapshot());
            }
            Mutation::Remove(keywords) => {
                let removed = core.subscriptions.remove(&keywords);
                info!("Removed subscriptions {:?}, now tracking {:?}", removed, core.subscriptions.snapshot());
            }
            Mutation::Clear => {
                core.subscriptions.clear();
                info!("All subscriptions removed");
            }
            Mutation::MarkStarted => {
                core.started = true;
                info!("Bot initialized in chat");
            }
        }

        match outcome.action {
            StreamAction::Keep => {}
            StreamAction::Stop => {
                core.streaming = false;
                core.session.stop().await;
            }
            StreamAction::Restart => self.restart(core).await?,
        }

        Ok(outcome.reply)
    }

    async fn restart(&self, core: &mut RelayCore) -> Result<(), SessionError> {
        let snapshot = core.subscriptions.snapshot();
        if snapshot.is_empty() {
            core.streaming = false;
            core.session.stop().await;
            return Ok(());
        }
        core.streaming = true;
        let listener = RelayListener::new(
            core.session.next_generation(),
            Arc::downgrade(&self.core),
            Arc::clone(&self.sink),
            self.relay_channel.clone(),
            self.faults.clone(),
        );
        core.session.start(snapshot, Arc::new(listener)).await
    }

    /// Stops the stream for a supervised restart, remembering whether it should
    /// come back.
    pub async fn suspend(&self) {
        self.core.lock().await.session.stop().await;
    }

    /// Restarts the stream after a supervised restart if it was live before.
    pub async fn resume(&self) -> RelayResult<()> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        if !core.streaming || core.session.state() != SessionState::Idle {
            return Ok(());
        }
        info!("Resuming stream with subscriptions {:?}", core.subscriptions.snapshot());
        self.restart(core).await?;
        Ok(())
    }

    /// Stops the stream for good.
    pub async fn shutdown(&self) {
        let mut core = self.core.lock().await;
        core.streaming = false;
        core.session.stop().await;
    }

    /// The tracked keywords in display order.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.core.lock().await.subscriptions.snapshot()
    }

    /// The match counters.
    pub async fn counts(&self) -> BTreeMap<String, u64> {
        self.core.lock().await.subscriptions.counts().clone()
    }

    /// The stream session state.
    pub async fn session_state(&self) -> SessionState {
        self.core.lock().await.session.state()
    }

    /// Observes stream session state transitions.
    pub async fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.core.lock().await.session.watch_state()
    }

    /// The filter of the live stream generation.
    pub async fn filter(&self) -> Vec<String> {
        self.core.lock().await.session.filter().to_vec()
    }

    /// How many stream generations were started.
    pub async fn generation(&self) -> u64 {
        self.core.lock().await.session.generation()
    }

    /// Whether `fault` was raised by the generation that is meant to be live.
    /// Faults of retired generations, or raised after the stream was stopped
    /// on purpose, are stale.
    pub async fn is_live(&self, fault: &RelayFault) -> bool {
        let core = self.core.lock().await;
        core.streaming && fault.generation() == core.session.generation()
    }
}

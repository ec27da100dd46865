//! # Relay Bridge
//!
//! The listener the stream worker calls for every accepted item. It counts the
//! item against the tracked keywords under the relay lock, then posts the text
//! to the relay channel. Posting failures never cross the worker boundary
//! silently: they are sent to the control loop as [`RelayFault`]s.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{mpsc, Mutex};

use crate::core::error::{RelayFault, TransportError};
use crate::core::relay::RelayCore;
use crate::core::session::{StreamItem, StreamListener};

/// Where relayed items are posted.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Posts `text` to `channel`.
    async fn post(&self, channel: &str, text: &str) -> Result<(), TransportError>;
}

/// Sending half of the fault channel read by the control loop.
pub type FaultSender = mpsc::UnboundedSender<RelayFault>;
/// Receiving half of the fault channel read by the control loop.
pub type FaultReceiver = mpsc::UnboundedReceiver<RelayFault>;

pub(crate) struct RelayListener {
    generation: u64,
    core: Weak<Mutex<RelayCore>>,
    sink: Arc<dyn ChatSink>,
    channel: String,
    faults: FaultSender,
}

impl RelayListener {
    pub(crate) fn new(
        generation: u64,
        core: Weak<Mutex<RelayCore>>,
        sink: Arc<dyn ChatSink>,
        channel: String,
        faults: FaultSender,
    ) -> Self {
        Self {
            generation,
            core,
            sink,
            channel,
            faults,
        }
    }

    fn report(&self, fault: RelayFault) {
        if self.faults.send(fault).is_err() {
            warn!("Control loop is gone, dropping relay fault");
        }
    }
}

#[async_trait]
impl StreamListener for RelayListener {
    async fn on_item(&self, item: StreamItem) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let matched = core.lock().await.subscriptions.record_matches(&item.text);
        debug!("Item {} matched {:?}", item.id, matched);

        if let Err(e) = self.sink.post(&self.channel, &item.text).await {
            warn!("Failed to relay item {} to {}: {}", item.id, self.channel, e);
            self.report(RelayFault::Post {
                generation: self.generation,
                error: e,
            });
        }
    }

    async fn on_failure(&self, error: TransportError) {
        self.report(RelayFault::Stream {
            generation: self.generation,
            error,
        });
    }
}

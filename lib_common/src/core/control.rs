//! # Control Loop
//!
//! Drives the process. It connects to chat, announces itself, then polls for
//! frames, turns mentions of the bot into commands for the [`Relay`] and posts
//! the replies.
//!
//! A chat transport error or a fault from the live stream generation is logged,
//! the stream is stopped, a restart notice is posted if possible and the whole
//! session starts over after a fixed delay. There is no backoff and no retry
//! cap. Faults of retired generations are dropped.
//!
//! A stream that cannot be opened does not end the session. The failure is
//! answered in chat and the stream is retried from inside the poll loop every
//! `restart_delay`, so commands keep being handled in between.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::bridge::{ChatSink, FaultReceiver};
use crate::core::commands::{channels_reply, Command, Reply, ONLINE_BANNER, RESTART_NOTICE, STREAM_DOWN_NOTICE};
use crate::core::error::{RelayError, RelayFault, RelayResult, TransportError};
use crate::core::relay::Relay;

/// One raw frame read from the chat transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatFrame {
    /// Frame type, e.g. `message`.
    pub kind: String,
    /// Channel the frame belongs to.
    pub channel: Option<String>,
    /// Author of the frame.
    pub user: Option<String>,
    /// Message text.
    pub text: Option<String>,
}

/// A chat frame addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// The text after the mention, trimmed.
    pub text: String,
    /// Where to reply.
    pub channel: String,
}

/// The chat collaborator: an event source and a sink.
#[async_trait]
pub trait ChatTransport: ChatSink {
    /// Opens (or reopens) the event connection and returns the bot's own
    /// user id as reported by the handshake.
    async fn connect(&mut self) -> Result<String, TransportError>;

    /// Returns the frames received within `wait`. May return an empty batch.
    async fn read_events(&mut self, wait: Duration) -> Result<Vec<ChatFrame>, TransportError>;

    /// Names of the channels visible to the bot.
    async fn channels(&self) -> Result<Vec<String>, TransportError>;
}

/// Picks the mentions of `bot_id` out of a batch of frames.
pub fn extract_mentions(bot_id: &str, frames: &[ChatFrame]) -> Vec<Mention> {
    let at_bot = format!("<@{bot_id}>");
    frames
        .iter()
        .filter_map(|frame| {
            let text = frame.text.as_deref()?;
            let rest = text.strip_prefix(&at_bot)?;
            let channel = frame.channel.clone()?;
            Some(Mention {
                text: rest.trim().to_string(),
                channel,
            })
        })
        .collect()
}

/// Timing and addressing for the control loop.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Where the online banner and restart notices go.
    pub home_channel: String,
    /// Configured bot id. When `None` the id from the handshake is used.
    pub bot_id: Option<String>,
    /// How long one poll of the chat transport may block.
    pub poll_interval: Duration,
    /// Pause between a failure and the next session.
    pub restart_delay: Duration,
}

/// The supervising driver of the whole process.
pub struct ControlLoop<C: ChatTransport> {
    chat: C,
    relay: Relay,
    faults: FaultReceiver,
    settings: ControlSettings,
    shutdown: CancellationToken,
    restarts: u64,
}

impl<C: ChatTransport> ControlLoop<C> {
    /// Wires the loop. `shutdown` is cancelled by the process signal handler.
    pub fn new(
        chat: C,
        relay: Relay,
        faults: FaultReceiver,
        settings: ControlSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            chat,
            relay,
            faults,
            settings,
            shutdown,
            restarts: 0,
        }
    }

    /// Runs sessions until shutdown, restarting after every failure. Stops the
    /// stream before returning.
    pub async fn run(mut self) -> u64 {
        while !self.shutdown.is_cancelled() {
            match self.run_session().await {
                Ok(()) => break,
                Err(e) => {
                    error!("UnCaught exception: {}", e);
                    info!("restarting after error");
                    self.restarts += 1;
                    self.relay.suspend().await;
                    let mut stale = 0;
                    while self.faults.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        debug!("Discarded {} queued faults", stale);
                    }
                    if let Err(e) = self.chat.post(&self.settings.home_channel, RESTART_NOTICE).await {
                        warn!("Could not post restart notice: {}", e);
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.restart_delay) => {}
                    }
                }
            }
        }

        info!("Control loop shutting down");
        self.relay.shutdown().await;
        self.restarts
    }

    async fn run_session(&mut self) -> RelayResult<()> {
        let handshake_id = self.chat.connect().await?;
        let bot_id = self.settings.bot_id.clone().unwrap_or(handshake_id);
        info!("Chat connected as {}", bot_id);
        self.chat.post(&self.settings.home_channel, ONLINE_BANNER).await?;

        let mut resume_at = match self.relay.resume().await {
            Ok(()) => None,
            Err(RelayError::Session(e)) => {
                let notice = format!("{STREAM_DOWN_NOTICE}: {e}");
                warn!("{}", notice);
                self.chat.post(&self.settings.home_channel, &notice).await?;
                Some(Instant::now() + self.settings.restart_delay)
            }
            Err(e) => return Err(e),
        };

        loop {
            let retry_at = resume_at;
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                Some(fault) = self.faults.recv() => Wake::Fault(fault),
                _ = retry => Wake::Resume,
                frames = self.chat.read_events(self.settings.poll_interval) => Wake::Frames(frames?),
            };

            match wake {
                Wake::Fault(fault) => {
                    if self.relay.is_live(&fault).await {
                        return Err(RelayError::Fault(fault));
                    }
                    debug!("Dropping stale fault: {}", fault);
                }
                Wake::Resume => {
                    resume_at = None;
                    match self.relay.resume().await {
                        Ok(()) => {}
                        Err(RelayError::Session(e)) => {
                            warn!("{}: {}", STREAM_DOWN_NOTICE, e);
                            resume_at = Some(Instant::now() + self.settings.restart_delay);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Wake::Frames(frames) => {
                    for mention in extract_mentions(&bot_id, &frames) {
                        let command = Command::parse(&mention.text);
                        debug!("Mention in {}: {:?}", mention.channel, command);
                        let reply = match self.relay.execute(&command).await {
                            Ok(Reply::Text(text)) => text,
                            Ok(Reply::Channels) => {
                                info!("requesting channel list");
                                channels_reply(&self.chat.channels().await?)
                            }
                            Err(RelayError::Session(e)) => {
                                warn!("{} after {:?}: {}", STREAM_DOWN_NOTICE, command.verb, e);
                                resume_at.get_or_insert(Instant::now() + self.settings.restart_delay);
                                format!("{STREAM_DOWN_NOTICE}: {e}")
                            }
                            Err(e) => return Err(e),
                        };
                        info!("Sent response to channel: {}", mention.channel);
                        self.chat.post(&mention.channel, &reply).await?;
                    }
                }
            }
        }
    }
}

enum Wake {
    Fault(RelayFault),
    Resume,
    Frames(Vec<ChatFrame>),
}

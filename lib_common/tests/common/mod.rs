#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use lib_common::core::{
    ChatFrame, ChatSink, ChatTransport, EventStream, StreamEvent, StreamItem, StreamTransport, TransportError,
};

pub type Posts = Arc<Mutex<Vec<(String, String)>>>;

pub fn posts_of(posts: &Posts) -> Vec<(String, String)> {
    posts.lock().unwrap().clone()
}

pub fn texts_in(posts: &Posts, channel: &str) -> Vec<String> {
    posts
        .lock()
        .unwrap()
        .iter()
        .filter(|(c, _)| c == channel)
        .map(|(_, t)| t.clone())
        .collect()
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type EventFeed = mpsc::UnboundedSender<Result<StreamEvent, TransportError>>;

/// Stream transport whose items are pushed by the test. Counts how many
/// connections are open at once.
#[derive(Default)]
pub struct FeedTransport {
    open: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    opens: AtomicUsize,
    filters: Mutex<Vec<Vec<String>>>,
    feed: Mutex<Option<EventFeed>>,
    pub fail_open: AtomicBool,
}

impl FeedTransport {
    pub fn open_now(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<Vec<String>> {
        self.filters.lock().unwrap().clone()
    }

    /// Delivers an event on the connection opened last.
    pub fn push(&self, event: Result<StreamEvent, TransportError>) {
        if let Some(feed) = self.feed.lock().unwrap().as_ref() {
            let _ = feed.send(event);
        }
    }

    pub fn push_item(&self, item: StreamItem) {
        self.push(Ok(StreamEvent::Item(item)));
    }

    /// Ends the connection opened last as if the remote hung up.
    pub fn hang_up(&self) {
        self.feed.lock().unwrap().take();
    }
}

#[async_trait]
impl StreamTransport for FeedTransport {
    async fn open(&self, keywords: &[String]) -> Result<EventStream, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Auth("401 Unauthorized".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.filters.lock().unwrap().push(keywords.to_vec());

        let guard = OpenGuard(Arc::clone(&self.open));
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(StreamEvent::Connected));
        *self.feed.lock().unwrap() = Some(tx);

        let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        });
        Ok(events.boxed())
    }
}

/// Chat sink that records every post.
#[derive(Default)]
pub struct RecordingSink {
    pub posts: Posts,
    pub fail: AtomicBool,
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn post(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                method: "chat.postMessage".to_string(),
                error: "channel_not_found".to_string(),
            });
        }
        self.posts.lock().unwrap().push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

pub type FrameFeed = mpsc::UnboundedSender<Result<Vec<ChatFrame>, TransportError>>;

/// Chat transport driven by batches the test sends.
pub struct ScriptedChat {
    batches: mpsc::UnboundedReceiver<Result<Vec<ChatFrame>, TransportError>>,
    pub posts: Posts,
    pub connects: Arc<AtomicUsize>,
}

impl ScriptedChat {
    pub fn new() -> (Self, FrameFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let chat = Self {
            batches: rx,
            posts: Posts::default(),
            connects: Arc::new(AtomicUsize::new(0)),
        };
        (chat, tx)
    }
}

#[async_trait]
impl ChatSink for ScriptedChat {
    async fn post(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.posts.lock().unwrap().push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for ScriptedChat {
    async fn connect(&mut self) -> Result<String, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok("UBOT".to_string())
    }

    async fn read_events(&mut self, wait: Duration) -> Result<Vec<ChatFrame>, TransportError> {
        match tokio::time::timeout(wait, self.batches.recv()).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                tokio::time::sleep(wait).await;
                Ok(Vec::new())
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn channels(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["general".to_string(), "random".to_string()])
    }
}

pub fn mention(channel: &str, text: &str) -> ChatFrame {
    ChatFrame {
        kind: "message".to_string(),
        channel: Some(channel.to_string()),
        user: Some("UHUMAN".to_string()),
        text: Some(format!("<@UBOT> {text}")),
    }
}

//! # Slack RTM
//!
//! [`SlackClient`] speaks the Web API (`rtm.connect`, `chat.postMessage`,
//! `conversations.list`). Every Slack answer carries an `ok` flag; `ok: false`
//! becomes [`TransportError::Api`] (or [`TransportError::Auth`] for token
//! problems).
//!
//! [`SlackRtm`] adds the RTM WebSocket that events are read from.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::core::bridge::ChatSink;
use crate::core::control::{ChatFrame, ChatTransport};
use crate::core::error::TransportError;
use crate::retrieve::{ApiClient, ApiResponse};

type RtmSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const AUTH_ERRORS: [&str; 4] = ["not_authed", "invalid_auth", "account_inactive", "token_revoked"];

#[derive(Debug, Deserialize)]
struct RtmConnect {
    url: String,
    #[serde(rename = "self")]
    me: RtmSelf,
}

#[derive(Debug, Deserialize)]
struct RtmSelf {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ConversationList {
    #[serde(default)]
    channels: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RtmFrame {
    #[serde(rename = "type", default)]
    kind: String,
    channel: Option<String>,
    user: Option<String>,
    text: Option<String>,
}

impl From<RtmFrame> for ChatFrame {
    fn from(frame: RtmFrame) -> Self {
        ChatFrame {
            kind: frame.kind,
            channel: frame.channel,
            user: frame.user,
            text: frame.text,
        }
    }
}

/// Slack Web API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SlackClient {
    api: ApiClient,
}

impl SlackClient {
    /// Creates a client against `api_url` (e.g. `https://slack.com/api/`).
    pub fn new(api_url: &str, token: String) -> Result<Self, TransportError> {
        Ok(Self {
            api: ApiClient::new(api_url, Some(token))?,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        api_method: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, TransportError> {
        let resp: ApiResponse<Value> = self.api.request(method, api_method, query, body).await?;
        let value = match resp.data {
            Some(value) if resp.success => value,
            _ => {
                return Err(TransportError::Api {
                    method: api_method.to_string(),
                    error: format!("http {} {}", resp.status, resp.error_body.unwrap_or_default()),
                });
            }
        };
        unwrap_envelope(api_method, value)
    }

    /// Posts `text` to `channel` as the bot.
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        let body = json!({ "channel": channel, "text": text, "as_user": true });
        let _: Value = self.call(Method::POST, "chat.postMessage", &[], Some(&body)).await?;
        Ok(())
    }

    /// Names of the public channels in the workspace.
    pub async fn channel_names(&self) -> Result<Vec<String>, TransportError> {
        let list: ConversationList = self
            .call(
                Method::GET,
                "conversations.list",
                &[("types", "public_channel"), ("exclude_archived", "true"), ("limit", "1000")],
                None,
            )
            .await?;
        Ok(list.channels.into_iter().map(|c| c.name).collect())
    }

    async fn rtm_connect(&self) -> Result<RtmConnect, TransportError> {
        self.call(Method::GET, "rtm.connect", &[], None).await
    }
}

#[async_trait]
impl ChatSink for SlackClient {
    async fn post(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.post_message(channel, text).await
    }
}

fn unwrap_envelope<T: DeserializeOwned>(api_method: &str, value: Value) -> Result<T, TransportError> {
    if value.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        if AUTH_ERRORS.contains(&error.as_str()) {
            return Err(TransportError::Auth(format!("{api_method}: {error}")));
        }
        return Err(TransportError::Api {
            method: api_method.to_string(),
            error,
        });
    }
    serde_json::from_value(value).map_err(|e| TransportError::Decode(format!("{api_method}: {e}")))
}

/// Slack chat over the RTM WebSocket.
pub struct SlackRtm {
    client: SlackClient,
    socket: Option<RtmSocket>,
}

impl SlackRtm {
    /// Wraps a Web API client. Nothing is connected until
    /// [`ChatTransport::connect`].
    pub fn new(client: SlackClient) -> Self {
        Self { client, socket: None }
    }
}

#[async_trait]
impl ChatSink for SlackRtm {
    async fn post(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.client.post_message(channel, text).await
    }
}

#[async_trait]
impl ChatTransport for SlackRtm {
    async fn connect(&mut self) -> Result<String, TransportError> {
        if let Some(mut old) = self.socket.take() {
            let _ = old.close(None).await;
        }
        let rtm = self.client.rtm_connect().await?;
        let (socket, response) = connect_async(rtm.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(
            "RTM connected as {} ({}), handshake status {}",
            rtm.me.name,
            rtm.me.id,
            response.status()
        );
        self.socket = Some(socket);
        Ok(rtm.me.id)
    }

    async fn read_events(&mut self, wait: Duration) -> Result<Vec<ChatFrame>, TransportError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| TransportError::Disconnected("rtm socket is not connected".to_string()))?;
        let result = drain(socket, wait).await;
        if result.is_err() {
            self.socket = None;
        }
        result
    }

    async fn channels(&self) -> Result<Vec<String>, TransportError> {
        self.client.channel_names().await
    }
}

/// Waits up to `wait` for the first message, then takes whatever else is
/// already buffered without blocking.
async fn drain(socket: &mut RtmSocket, wait: Duration) -> Result<Vec<ChatFrame>, TransportError> {
    let mut frames = Vec::new();
    let mut next = match tokio::time::timeout(wait, socket.next()).await {
        Ok(msg) => msg,
        Err(_) => return Ok(frames),
    };
    loop {
        match next {
            None => return Err(TransportError::Disconnected("rtm socket closed".to_string())),
            Some(Err(e)) => return Err(TransportError::Disconnected(e.to_string())),
            Some(Ok(Message::Close(reason))) => {
                return Err(TransportError::Disconnected(format!("rtm close frame: {reason:?}")));
            }
            Some(Ok(Message::Text(text))) => {
                if let Some(frame) = parse_frame(text.as_str()) {
                    frames.push(frame);
                }
            }
            Some(Ok(_)) => {}
        }
        match socket.next().now_or_never() {
            Some(msg) => next = msg,
            None => break,
        }
    }
    Ok(frames)
}

fn parse_frame(text: &str) -> Option<ChatFrame> {
    match serde_json::from_str::<RtmFrame>(text) {
        Ok(frame) => {
            debug!("rtm frame: {}", frame.kind);
            Some(frame.into())
        }
        Err(e) => {
            warn!("Skipping unreadable rtm frame ({}): {}", e, text);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frames_keep_channel_user_and_text() {
        let frame = parse_frame(r#"{"type":"message","channel":"C1","user":"U1","text":"<@UBOT> ping","ts":"1.2"}"#)
            .unwrap();
        assert_eq!(frame.kind, "message");
        assert_eq!(frame.channel.as_deref(), Some("C1"));
        assert_eq!(frame.user.as_deref(), Some("U1"));
        assert_eq!(frame.text.as_deref(), Some("<@UBOT> ping"));
    }

    #[test]
    fn non_message_frames_parse_and_garbage_is_skipped() {
        let hello = parse_frame(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(hello.kind, "hello");
        assert!(hello.text.is_none());
        assert!(parse_frame("not json").is_none());
    }

    #[test]
    fn ok_false_is_an_api_error() {
        let err = unwrap_envelope::<Value>("chat.postMessage", json!({"ok": false, "error": "channel_not_found"}))
            .unwrap_err();
        match err {
            TransportError::Api { method, error } => {
                assert_eq!(method, "chat.postMessage");
                assert_eq!(error, "channel_not_found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn token_problems_are_auth_errors() {
        let err = unwrap_envelope::<Value>("rtm.connect", json!({"ok": false, "error": "invalid_auth"})).unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[test]
    fn rtm_connect_payload_decodes() {
        let rtm: RtmConnect = unwrap_envelope(
            "rtm.connect",
            json!({"ok": true, "url": "wss://example.invalid/ws", "self": {"id": "UBOT", "name": "pbj"}}),
        )
        .unwrap();
        assert_eq!(rtm.url, "wss://example.invalid/ws");
        assert_eq!(rtm.me.id, "UBOT");
    }

    #[test]
    fn conversations_decode_to_names() {
        let list: ConversationList = unwrap_envelope(
            "conversations.list",
            json!({"ok": true, "channels": [{"id": "C1", "name": "general"}, {"id": "C2", "name": "random"}]}),
        )
        .unwrap();
        let names: Vec<String> = list.channels.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["general", "random"]);
    }
}

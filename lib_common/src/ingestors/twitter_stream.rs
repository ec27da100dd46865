//! # Twitter Filtered Stream
//!
//! `open` makes the account's filtered-stream rules match exactly the
//! requested keywords, then holds the stream endpoint open. The body is
//! newline-delimited JSON with blank keep-alive lines in between.

use std::fmt::Display;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use log::{debug, info};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::core::error::TransportError;
use crate::core::session::{EventStream, StreamEvent, StreamItem, StreamTransport};
use crate::retrieve::{ApiClient, ApiResponse};

const RULES_PATH: &str = "tweets/search/stream/rules";
const STREAM_PATH: &str = "tweets/search/stream";
/// Longest line buffered while waiting for its newline.
const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct RulesList {
    #[serde(default)]
    data: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct Rule {
    id: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct NewRule<'a> {
    value: &'a str,
    tag: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum RulesUpdate<'a> {
    Add(Vec<NewRule<'a>>),
    Delete { ids: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Tweet>,
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
}

impl From<Tweet> for StreamItem {
    fn from(tweet: Tweet) -> Self {
        let reshare = tweet.text.starts_with("RT @")
            || tweet.referenced_tweets.iter().any(|r| r.kind == "retweeted");
        StreamItem {
            id: tweet.id,
            text: tweet.text,
            reshare,
        }
    }
}

/// The Twitter v2 filtered stream.
#[derive(Debug, Clone)]
pub struct TwitterStream {
    api: ApiClient,
}

impl TwitterStream {
    /// Creates a transport against `api_url` (e.g. `https://api.twitter.com/2/`).
    pub fn new(api_url: &str, bearer_token: String) -> Result<Self, TransportError> {
        Ok(Self {
            api: ApiClient::new(api_url, Some(bearer_token))?,
        })
    }

    async fn replace_rules(&self, keywords: &[String]) -> Result<(), TransportError> {
        let current: ApiResponse<RulesList> = self
            .api
            .request(Method::GET, RULES_PATH, &[], None::<&()>)
            .await?;
        let current = check(RULES_PATH, current)?;

        let (stale, values): (Vec<String>, Vec<String>) = current.data.into_iter().map(|r| (r.id, r.value)).unzip();
        if !stale.is_empty() {
            debug!("Deleting stale stream rules {:?}", values);
            let update = RulesUpdate::Delete { ids: stale };
            let resp: ApiResponse<serde_json::Value> =
                self.api.request(Method::POST, RULES_PATH, &[], Some(&update)).await?;
            check(RULES_PATH, resp)?;
        }

        let update = RulesUpdate::Add(
            keywords
                .iter()
                .map(|k| NewRule {
                    value: k.as_str(),
                    tag: k.as_str(),
                })
                .collect(),
        );
        let resp: ApiResponse<serde_json::Value> =
            self.api.request(Method::POST, RULES_PATH, &[], Some(&update)).await?;
        check(RULES_PATH, resp)?;
        info!("Stream rules set to {:?}", keywords);
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for TwitterStream {
    async fn open(&self, keywords: &[String]) -> Result<EventStream, TransportError> {
        self.replace_rules(keywords).await?;

        let response = self
            .api
            .open(STREAM_PATH, &[("tweet.fields", "referenced_tweets")])
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(STREAM_PATH, status, body));
        }
        info!("Filtered stream opened for {:?}", keywords);
        Ok(tweet_events(response.bytes_stream()))
    }
}

fn status_error(method: &str, status: StatusCode, body: String) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Auth(format!("{method}: {status} {body}")),
        _ => TransportError::Api {
            method: method.to_string(),
            error: format!("{status} {body}"),
        },
    }
}

fn check<T>(method: &str, resp: ApiResponse<T>) -> Result<T, TransportError> {
    match (resp.success, resp.data) {
        (true, Some(data)) => Ok(data),
        (true, None) => Err(TransportError::Decode(format!("{method}: empty body"))),
        (false, _) => {
            let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Err(status_error(method, status, resp.error_body.unwrap_or_default()))
        }
    }
}

/// Turns a raw body stream into stream events: `Connected` first, then one
/// item per tweet line.
fn tweet_events<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let lines = stream::unfold((body.boxed(), Vec::<u8>::new()), |(mut body, mut buf)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(None) => continue,
                    Ok(Some(item)) => return Some((Ok(StreamEvent::Item(item)), (body, buf))),
                    Err(e) => return Some((Err(e), (body, buf))),
                }
            }
            if buf.len() > MAX_LINE_BYTES {
                let len = buf.len();
                buf.clear();
                return Some((
                    Err(TransportError::Decode(format!(
                        "stream line exceeds {MAX_LINE_BYTES} bytes ({len} buffered)"
                    ))),
                    (body, buf),
                ));
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    return Some((Err(TransportError::Disconnected(e.to_string())), (body, buf)));
                }
                None => return None,
            }
        }
    });
    stream::once(async { Ok(StreamEvent::Connected) }).chain(lines).boxed()
}

fn parse_line(line: &[u8]) -> Result<Option<StreamItem>, TransportError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    let envelope: Envelope = serde_json::from_slice(line).map_err(|e| TransportError::Decode(e.to_string()))?;
    match (envelope.data, envelope.errors) {
        (Some(tweet), _) => Ok(Some(tweet.into())),
        (None, Some(errors)) => Err(TransportError::Api {
            method: STREAM_PATH.to_string(),
            error: errors.to_string(),
        }),
        (None, None) => Ok(None),
    }
}

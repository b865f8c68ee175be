//! Streaming event reader with bounded reconnect.
//!
//! A session opens the source once and yields parsed frames until the source
//! ends or fails. The retry wrapper reopens from scratch after a transport
//! failure: there is no resume offset, so frames after a reconnect belong to
//! a fresh session and progress values may jump backwards.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::{stream, try_stream};
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::frame::{parse_frame, FrameDecoder};
use crate::{Result, VoiceLabError};

pub const STREAM_MAX_ATTEMPTS: u32 = 3;
pub const STREAM_RETRY_DELAY: Duration = Duration::from_secs(1);
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw body chunks of one open session.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Something that can open a fresh byte stream on demand.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new session. Errors here and inside the returned stream are
    /// transport failures.
    async fn open(&self) -> Result<ByteStream>;

    /// Human readable name for logs.
    fn describe(&self) -> String;
}

/// `GET` an HTTP endpoint that answers with a chunked event stream.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    http: Client,
    url: Url,
}

impl HttpEventSource {
    pub fn new(http: Client, url: Url) -> Self {
        Self { http, url }
    }

    /// Build a source for `base_url` + `path` with URL-encoded query pairs.
    pub fn get(base_url: &str, path: &str, query: &[(&str, &str)]) -> Result<Self> {
        let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
        let url = Url::parse_with_params(&raw, query)
            .map_err(|e| VoiceLabError::Config(format!("invalid stream url {}: {}", raw, e)))?;
        // No overall request timeout: the body is expected to stay open.
        let http = Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::new(http, url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self) -> Result<ByteStream> {
        let resp = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VoiceLabError::Http(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(VoiceLabError::from));
        Ok(Box::pin(body))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Reads `T` frames from an [`EventSource`].
#[derive(Clone)]
pub struct StreamingEventReader {
    source: Arc<dyn EventSource>,
}

impl StreamingEventReader {
    pub fn new<S: EventSource + 'static>(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// One session, no retry. Ends when the source closes; the first
    /// transport error is yielded and ends the stream.
    pub fn stream<T>(&self) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        session(Arc::clone(&self.source))
    }

    /// Sessions retried up to [`STREAM_MAX_ATTEMPTS`] times with a fixed
    /// [`STREAM_RETRY_DELAY`]. Exhausting the attempts yields a single
    /// `StreamFailed` carrying the last cause.
    pub fn stream_with_retry<T>(&self) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        stream! {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let events = session::<T>(Arc::clone(&source));
                tokio::pin!(events);

                let mut failure = None;
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                let Some(cause) = failure else {
                    debug!(target: "event_stream", source = %source.describe(), attempt, "Stream closed");
                    return;
                };
                if attempt >= STREAM_MAX_ATTEMPTS {
                    warn!(
                        target: "event_stream",
                        source = %source.describe(),
                        attempts = attempt,
                        error = %cause,
                        "Event stream failed; giving up"
                    );
                    yield Err(VoiceLabError::StreamFailed(format!(
                        "{} failed after {} attempts: {}",
                        source.describe(),
                        attempt,
                        cause
                    )));
                    return;
                }
                warn!(
                    target: "event_stream",
                    source = %source.describe(),
                    attempt,
                    error = %cause,
                    "Event stream interrupted; reconnecting"
                );
                tokio::time::sleep(STREAM_RETRY_DELAY).await;
            }
        }
    }
}

fn session<T>(source: Arc<dyn EventSource>) -> impl Stream<Item = Result<T>> + Send + 'static
where
    T: DeserializeOwned + Send + 'static,
{
    try_stream! {
        let mut bytes = source.open().await?;
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for payload in decoder.push(&chunk) {
                if let Some(event) = parse_frame::<T>(&payload) {
                    yield event;
                }
            }
        }
        if let Some(payload) = decoder.finish() {
            if let Some(event) = parse_frame::<T>(&payload) {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tick {
        n: u32,
    }

    fn body(chunks: &[&str]) -> ByteStream {
        let items: Vec<Result<Vec<u8>>> = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        Box::pin(tokio_stream::iter(items))
    }

    #[tokio::test]
    async fn retries_failed_opens_then_reads_third_session() {
        let mut source = MockEventSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_open()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Err(VoiceLabError::Http("connection refused".into())));
        source
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(body(&["data: {\"n\":1}\n\n", "data: {\"n\":2}\n\n"])));
        source.expect_describe().returning(|| "mock".to_string());

        let reader = StreamingEventReader::new(source);
        let events: Vec<Result<Tick>> = reader.stream_with_retry().collect().await;
        let events: Vec<Tick> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec![Tick { n: 1 }, Tick { n: 2 }]);
    }

    #[tokio::test]
    async fn single_session_surfaces_open_error() {
        let mut source = MockEventSource::new();
        source
            .expect_open()
            .times(1)
            .returning(|| Err(VoiceLabError::Http("down".into())));
        source.expect_describe().returning(|| "mock".to_string());

        let reader = StreamingEventReader::new(source);
        let events: Vec<Result<Tick>> = reader.stream().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(VoiceLabError::Http(_))));
    }
}

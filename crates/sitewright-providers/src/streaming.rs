//! Stream decoding helpers
//!
//! Upstreams deliver incremental output either as server-sent events or as
//! newline-delimited JSON. Both arrive as arbitrary byte chunks; the helpers
//! here buffer across chunk boundaries and yield complete units.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::models::{GenerateResult, StreamChunk, TokenUsage};

/// Incremental generation output
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
}

/// Split a byte stream into lines without their terminators
pub fn lines<S, E>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::<ProviderError>::into)?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield decode_line(&line);
            }
        }

        if !buffer.is_empty() {
            yield decode_line(&buffer);
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .to_string()
}

/// Decode server-sent events
///
/// Comment lines are skipped, as is the `[DONE]` sentinel some upstreams
/// send before closing.
pub fn sse_events<S, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut lines = Box::pin(lines(bytes));
        let mut pending = SseEvent::default();
        let mut has_data = false;

        while let Some(line) = lines.next().await {
            let line = line?;

            if line.is_empty() {
                if has_data && pending.data != "[DONE]" {
                    yield std::mem::take(&mut pending);
                }
                pending = SseEvent::default();
                has_data = false;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => pending.event = Some(value.to_string()),
                "data" => {
                    if has_data {
                        pending.data.push('\n');
                    }
                    pending.data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }

        if has_data && pending.data != "[DONE]" {
            yield pending;
        }
    }
}

/// Non-empty lines of a newline-delimited JSON stream
pub fn ndjson_lines<S, E>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    lines(bytes).filter_map(|line| async move {
        match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(line.trim().to_string())),
            Err(e) => Some(Err(e)),
        }
    })
}

/// End `stream` with an `Aborted` error once `token` fires
pub fn with_cancellation(stream: ChunkStream, token: Option<CancellationToken>) -> ChunkStream {
    let Some(token) = token else {
        return stream;
    };

    Box::pin(async_stream::stream! {
        let mut stream = stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = stream.next() => Some(item),
            };

            match next {
                None => {
                    yield Err(ProviderError::aborted());
                    break;
                }
                Some(None) => break,
                Some(Some(item)) => {
                    let stop = item.is_err();
                    yield item;
                    if stop {
                        break;
                    }
                }
            }
        }
    })
}

/// Drain a chunk stream into a single result
///
/// Text is concatenated in order; usage comes from the terminal chunk.
pub async fn collect_stream(mut stream: ChunkStream) -> Result<GenerateResult, ProviderError> {
    let mut text = String::new();
    let mut usage = TokenUsage::default();
    let mut provider = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        provider = chunk.provider.or(provider);
        text.push_str(&chunk.text);
        if chunk.done {
            if let Some(final_usage) = chunk.usage {
                usage = final_usage;
            }
            break;
        }
    }

    Ok(GenerateResult {
        text,
        finish_reason: Default::default(),
        usage,
        model: String::new(),
        provider,
    })
}

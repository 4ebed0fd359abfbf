//! Shared SSE plumbing for provider adapters.
//!
//! Every HTTP adapter follows the same pattern: buffer response chunks,
//! split on `\n\n`, pull `data:` payloads, and hand each payload to a
//! parser producing raw provider events.

use cw_domain::error::{Error, Result};

use crate::raw::RawProviderEvent;
use crate::traits::BoxStream;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// The buffer is drained in place; a trailing partial event stays for
/// the next call. `data: [DONE]` markers are skipped.
pub(crate) fn drain_data_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() && data != "[DONE]" {
                    payloads.push(data.to_owned());
                }
            }
        }
    }

    payloads
}

/// Parse one SSE payload into a raw event via its `type` discriminator.
pub(crate) fn parse_payload(data: &str) -> Option<RawProviderEvent> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping non-JSON SSE payload");
            return None;
        }
    };
    let event_type = value.get("type").and_then(|v| v.as_str())?.to_owned();
    Some(RawProviderEvent::parse(&event_type, value))
}

/// Build a raw-event stream from an SSE `reqwest::Response`.
pub(crate) fn response_event_stream(
    response: reqwest::Response,
) -> BoxStream<'static, Result<RawProviderEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_payloads(&mut buffer) {
                        if let Some(event) = parse_payload(&data) {
                            yield Ok(event);
                        }
                    }
                }
                Ok(None) => {
                    // Flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_payloads(&mut buffer) {
                            if let Some(event) = parse_payload(&data) {
                                yield Ok(event);
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Transport(format!("provider stream read failed: {e}")));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

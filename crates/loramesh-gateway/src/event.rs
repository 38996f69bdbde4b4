//! Inbound event extractor
//!
//! The radio client only hands out a printable rendering of each received
//! packet. For text messages that rendering embeds the packet's protobuf text
//! form, and the extractor scrapes it positionally:
//!
//! 1. skip past the third `{` (the `decoded {` block of the raw packet);
//! 2. the message body sits between the next two `"`;
//! 3. after the body, the second `:` opens the receive timestamp, which runs
//!    to the end of its line;
//! 4. on the following lines, the third `'` opens the sender id, which runs
//!    to the next `'`.
//!
//! Renderings without the [`TEXT_MESSAGE_MARKER`] are not text messages and
//! extract to `None`.

use chrono::{Local, TimeZone};
use tracing::{debug, warn};

use crate::config::TEXT_MESSAGE_MARKER;
use crate::error::{GatewayError, Result};
use crate::registry::NodeRegistry;
use crate::report::decode_escapes;

/// Rendering of message timestamps on the message channel
pub const TIMESTAMP_FORMAT: &str = "%A, %B %d, %Y %I:%M:%S";

/// Text message scraped from an event, before sender resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Sender node id, without the leading `!`
    pub sender_id: String,
    /// Message body
    pub text: String,
    /// Receive time, seconds since the epoch
    pub epoch: i64,
    /// Receive time in local time, rendered with [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
}

/// Text message with the sender's names resolved from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender node id
    pub sender_id: String,
    /// Message body
    pub text: String,
    /// Receive time, seconds since the epoch
    pub epoch: i64,
    /// Receive time in local time
    pub timestamp: String,
    /// Sender's long name, empty when unknown
    pub display_name: String,
    /// Sender's short name, empty when unknown
    pub short_name: String,
}

/// Outcome of resolving a message's sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Sender is in the registry
    Known(InboundMessage),
    /// Sender has not been reported yet; names are empty
    UnknownSender(InboundMessage),
}

impl Resolution {
    /// The message, if it may be forwarded downstream
    pub fn forwardable(self) -> Option<InboundMessage> {
        match self {
            Resolution::Known(message) => Some(message),
            Resolution::UnknownSender(_) => None,
        }
    }

    /// The message regardless of resolution
    pub fn message(&self) -> &InboundMessage {
        match self {
            Resolution::Known(message) | Resolution::UnknownSender(message) => message,
        }
    }
}

impl TextMessage {
    /// Attach the sender's names from the registry
    pub fn resolve(self, registry: &NodeRegistry) -> Resolution {
        let names = registry.resolve(&self.sender_id);
        let known = names.is_some();
        let (display_name, short_name) = names.unwrap_or_default();

        let message = InboundMessage {
            sender_id: self.sender_id,
            text: self.text,
            epoch: self.epoch,
            timestamp: self.timestamp,
            display_name,
            short_name,
        };

        if known {
            Resolution::Known(message)
        } else {
            warn!(sender = %message.sender_id, "Sender id not found in node registry");
            Resolution::UnknownSender(message)
        }
    }
}

/// Extract a text message from a raw event rendering
///
/// Returns `Ok(None)` when the event is not a text message and
/// [`GatewayError::MalformedEvent`] when a section is missing.
pub fn extract(raw: &str) -> Result<Option<TextMessage>> {
    if !raw.contains(TEXT_MESSAGE_MARKER) {
        return Ok(None);
    }
    let decoded = decode_escapes(raw);

    let payload = after_nth(&decoded, '{', 3)
        .ok_or_else(|| malformed("fewer than three '{' before the payload"))?;

    let body_start =
        after_nth(payload, '"', 1).ok_or_else(|| malformed("no opening quote for the text"))?;
    let body_len = body_start
        .find('"')
        .ok_or_else(|| malformed("no closing quote for the text"))?;
    let text = &body_start[..body_len];
    let after_body = &body_start[body_len + 1..];

    let stamp_start =
        after_nth(after_body, ':', 2).ok_or_else(|| malformed("no timestamp field"))?;
    let stamp_len = stamp_start
        .find('\n')
        .ok_or_else(|| malformed("timestamp line is not terminated"))?;
    let stamp: String = stamp_start[..stamp_len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let after_stamp = &stamp_start[stamp_len + 1..];

    let sender_start =
        after_nth(after_stamp, '\'', 3).ok_or_else(|| malformed("no sender id field"))?;
    let sender_len = sender_start
        .find('\'')
        .ok_or_else(|| malformed("sender id is not terminated"))?;
    let sender_id: String = sender_start[..sender_len]
        .chars()
        .filter(|c| *c != '!')
        .collect();
    if sender_id.is_empty() {
        return Err(malformed("empty sender id"));
    }

    let epoch: i64 = stamp
        .parse()
        .map_err(|_| GatewayError::InvalidTimestamp(stamp.clone()))?;
    let timestamp = format_timestamp(epoch)?;

    debug!(
        sender = %sender_id,
        text,
        timestamp = %timestamp,
        "Extracted text message"
    );

    Ok(Some(TextMessage {
        sender_id,
        text: text.to_string(),
        epoch,
        timestamp,
    }))
}

/// Render an epoch timestamp in local time
pub fn format_timestamp(epoch: i64) -> Result<String> {
    let local = Local
        .timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| GatewayError::InvalidTimestamp(epoch.to_string()))?;
    Ok(local.format(TIMESTAMP_FORMAT).to_string())
}

/// Slice following the n-th (1-based) occurrence of `ch`
fn after_nth(s: &str, ch: char, n: usize) -> Option<&str> {
    let (pos, _) = s.match_indices(ch).nth(n.checked_sub(1)?)?;
    Some(&s[pos + ch.len_utf8()..])
}

fn malformed(what: &str) -> GatewayError {
    GatewayError::MalformedEvent(what.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_record, text_event};

    #[test]
    fn test_extract_text_message() {
        let message = extract(&text_event("hello world", 1700000000, "!abc123"))
            .unwrap()
            .unwrap();

        assert_eq!(message.text, "hello world");
        assert_eq!(message.sender_id, "abc123");
        assert_eq!(message.epoch, 1700000000);
        assert_eq!(message.timestamp, format_timestamp(1700000000).unwrap());
    }

    #[test]
    fn test_timestamp_format() {
        let expected = Local
            .timestamp_opt(1700000000, 0)
            .unwrap()
            .format("%A, %B %d, %Y %I:%M:%S")
            .to_string();
        assert_eq!(format_timestamp(1700000000).unwrap(), expected);
        // November 2023 in every time zone
        assert!(expected.contains("November"));
        assert!(expected.contains("2023"));
    }

    #[test]
    fn test_non_text_event_is_none() {
        let raw = "{'from': 1, 'decoded': {'portnum': 'POSITION_APP', 'position': {}}}";
        assert_eq!(extract(raw).unwrap(), None);
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let raw = "{'decoded': {'portnum': 'TEXT_MESSAGE_APP'}}";
        let err = extract(raw).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedEvent(_)));
        assert!(err.is_scrape_error());
    }

    #[test]
    fn test_non_numeric_timestamp_is_invalid() {
        let raw = text_event("hi", 0, "!abc123").replace("rx_time: 0", "rx_time: soon");
        assert!(matches!(
            extract(&raw),
            Err(GatewayError::InvalidTimestamp(ts)) if ts == "soon"
        ));
    }

    #[test]
    fn test_unterminated_sender_is_malformed() {
        let raw = text_event("hi", 1700000000, "!abc123");
        let cut = &raw[..raw.rfind("abc123").unwrap() + 6];
        assert!(matches!(extract(cut), Err(GatewayError::MalformedEvent(_))));
    }

    #[test]
    fn test_resolve_known_sender() {
        let mut registry = NodeRegistry::new();
        let mut record = sample_record("1", "abc123");
        record.display_name = "Base Camp".to_string();
        record.short_name = "BC".to_string();
        registry.merge(record);

        let resolution = extract(&text_event("hello world", 1700000000, "!abc123"))
            .unwrap()
            .unwrap()
            .resolve(&registry);

        let message = resolution.forwardable().unwrap();
        assert_eq!(message.display_name, "Base Camp");
        assert_eq!(message.short_name, "BC");
    }

    #[test]
    fn test_resolve_unknown_sender() {
        let registry = NodeRegistry::new();
        let resolution = extract(&text_event("hello world", 1700000000, "!abc123"))
            .unwrap()
            .unwrap()
            .resolve(&registry);

        assert!(matches!(resolution, Resolution::UnknownSender(_)));
        assert_eq!(resolution.message().display_name, "");
        assert_eq!(resolution.message().short_name, "");
        assert_eq!(resolution.forwardable(), None);
    }

    #[test]
    fn test_after_nth() {
        assert_eq!(after_nth("a{b{c{d", '{', 3), Some("d"));
        assert_eq!(after_nth("a{b", '{', 2), None);
        assert_eq!(after_nth("a{b", '{', 0), None);
    }
}

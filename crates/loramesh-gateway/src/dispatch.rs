//! Change dispatcher
//!
//! Decides after every report cycle whether the automation server needs a
//! fresh node status snapshot, and renders the push payloads.
//!
//! Payloads are `!`-prefixed field lists, records concatenated back to back:
//!
//! ```text
//! status:  !No!User!AKA!ID!Latitude!Longitude!Altitude!Battery!SNR!LastHeard!Since  (per node)
//! message: !DisplayName!ShortName!SenderId!MessageText!Timestamp
//! ```
//!
//! Field values are not escaped; the separator is part of the wire contract
//! with the automation server flows.

use tracing::debug;

use crate::config::FIELD_SEPARATOR;
use crate::event::InboundMessage;
use crate::registry::{MergeOutcome, NodeRecord};

/// Tracks whether a status push is owed
#[derive(Debug, Default, Clone)]
pub struct ChangeDispatcher {
    first_cycle_done: bool,
    pending: bool,
}

impl ChangeDispatcher {
    /// Create a dispatcher that owes nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the merge outcomes of one successful report cycle
    ///
    /// Returns true when the cycle raised a dispatch: on the first cycle since
    /// start, or when any node was inserted or moved.
    pub fn complete_cycle<I>(&mut self, outcomes: I) -> bool
    where
        I: IntoIterator<Item = MergeOutcome>,
    {
        let first = !self.first_cycle_done;
        self.first_cycle_done = true;

        let changed = outcomes
            .into_iter()
            .filter(MergeOutcome::is_significant)
            .count();

        let dispatch = first || changed > 0;
        if dispatch {
            debug!(first, changed, "Node status dispatch requested");
            self.pending = true;
        }
        dispatch
    }

    /// Whether a dispatch is waiting for the pusher
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Claim the pending dispatch, clearing it
    ///
    /// Several cycles raising a dispatch before the pusher runs collapse
    /// into a single claim.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    /// Whether at least one report cycle has completed
    pub fn first_cycle_done(&self) -> bool {
        self.first_cycle_done
    }
}

/// Render the node status payload for a registry snapshot
pub fn encode_status_payload(records: &[NodeRecord]) -> String {
    let mut payload = String::new();
    for record in records {
        for field in record.fields() {
            payload.push(FIELD_SEPARATOR);
            payload.push_str(field);
        }
    }
    payload
}

/// Render the inbound message payload
pub fn encode_message_payload(message: &InboundMessage) -> String {
    let fields = [
        message.display_name.as_str(),
        &message.short_name,
        &message.sender_id,
        &message.text,
        &message.timestamp,
    ];
    let mut payload = String::new();
    for field in fields {
        payload.push(FIELD_SEPARATOR);
        payload.push_str(field);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NODE_FIELD_COUNT;
    use crate::test_utils::sample_record;

    #[test]
    fn test_first_cycle_dispatches_without_changes() {
        let mut dispatcher = ChangeDispatcher::new();
        assert!(dispatcher.complete_cycle(Vec::new()));
        assert!(dispatcher.take_pending());
        assert!(!dispatcher.take_pending());
    }

    #[test]
    fn test_unchanged_cycle_does_not_dispatch() {
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.complete_cycle([MergeOutcome::Inserted]);
        dispatcher.take_pending();

        let fired = dispatcher.complete_cycle([
            MergeOutcome::Updated { changed: false },
            MergeOutcome::Updated { changed: false },
        ]);
        assert!(!fired);
        assert!(!dispatcher.is_pending());
    }

    #[test]
    fn test_insert_or_move_dispatches() {
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.complete_cycle([]);
        dispatcher.take_pending();

        assert!(dispatcher.complete_cycle([MergeOutcome::Inserted]));
        dispatcher.take_pending();
        assert!(dispatcher.complete_cycle([
            MergeOutcome::Updated { changed: false },
            MergeOutcome::Updated { changed: true },
        ]));
    }

    #[test]
    fn test_triggers_collapse_into_one_push() {
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.complete_cycle([MergeOutcome::Inserted]);
        dispatcher.complete_cycle([MergeOutcome::Updated { changed: true }]);
        dispatcher.complete_cycle([MergeOutcome::Inserted]);

        assert!(dispatcher.take_pending());
        assert!(!dispatcher.take_pending());
    }

    #[test]
    fn test_status_payload_token_count() {
        let records: Vec<NodeRecord> = (1..=3)
            .map(|n| sample_record(&n.to_string(), &format!("node{n:04}")))
            .collect();
        let payload = encode_status_payload(&records);

        let tokens: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        assert_eq!(tokens.len(), 1 + NODE_FIELD_COUNT * records.len());
        assert_eq!(tokens[0], "");
        assert_eq!(tokens[1], "1");
        assert_eq!(tokens[4], "node0001");
        assert_eq!(tokens[1 + NODE_FIELD_COUNT], "2");
    }

    #[test]
    fn test_status_payload_exact_encoding() {
        let record = sample_record("1", "a1b2c3d4");
        assert_eq!(
            encode_status_payload(&[record]),
            "!1!Base Camp!BC!a1b2c3d4!3.1390 [degree]!101.6869 [degree]!45m!100[VDC]!6.25dB!2026-10-19 10:00:00!1 min ago"
        );
        assert_eq!(encode_status_payload(&[]), "");
    }

    #[test]
    fn test_message_payload() {
        let message = InboundMessage {
            sender_id: "abc123".to_string(),
            text: "hello world".to_string(),
            epoch: 1700000000,
            timestamp: "Tuesday, November 14, 2023 10:13:20".to_string(),
            display_name: "Base Camp".to_string(),
            short_name: "BC".to_string(),
        };
        assert_eq!(
            encode_message_payload(&message),
            "!Base Camp!BC!abc123!hello world!Tuesday, November 14, 2023 10:13:20"
        );
    }
}

//! Node registry: last known state of every mesh node ever reported
//!
//! The registry maps a node id to its [`NodeRecord`], keeping insertion
//! order so the read API and the status push list nodes stably. Records are
//! never pruned; a node stays until the process restarts.
//!
//! # Change significance
//!
//! Only a moved node counts as a change. [`NodeRegistry::merge`] overwrites
//! every field of an existing record but reports `changed` only when the
//! latitude or longitude differs from what was stored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Number of fields in a node record
pub const NODE_FIELD_COUNT: usize = 11;

/// One mesh participant as rendered by the radio's node report
///
/// Numeric fields keep the cosmetic units applied by the report parser
/// (`" [degree]"`, `m`, `[VDC]`, `dB`) or hold `"N/A"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Display ordinal from the report (not identity-bearing)
    #[serde(rename = "No")]
    pub index: String,
    /// Long user name
    #[serde(rename = "User")]
    pub display_name: String,
    /// Short name (a.k.a.)
    #[serde(rename = "AKA")]
    pub short_name: String,
    /// Stable node id, unique key of the registry
    #[serde(rename = "ID")]
    pub id: String,
    /// Latitude in degrees or `N/A`
    #[serde(rename = "Latitude")]
    pub latitude: String,
    /// Longitude in degrees or `N/A`
    #[serde(rename = "Longitude")]
    pub longitude: String,
    /// Altitude in meters or `N/A`
    #[serde(rename = "Altitude")]
    pub altitude: String,
    /// Battery level or `N/A`
    #[serde(rename = "Battery")]
    pub battery: String,
    /// Signal to noise ratio or `N/A`
    #[serde(rename = "SNR")]
    pub snr: String,
    /// Last heard, verbatim from the report
    #[serde(rename = "LastHeard")]
    pub last_heard: String,
    /// Time since last heard, verbatim from the report
    #[serde(rename = "Since")]
    pub since: String,
}

impl NodeRecord {
    /// Build a record from its fields in report column order
    pub fn from_fields(fields: [String; NODE_FIELD_COUNT]) -> Self {
        let [
            index,
            display_name,
            short_name,
            id,
            latitude,
            longitude,
            altitude,
            battery,
            snr,
            last_heard,
            since,
        ] = fields;
        Self {
            index,
            display_name,
            short_name,
            id,
            latitude,
            longitude,
            altitude,
            battery,
            snr,
            last_heard,
            since,
        }
    }

    /// Field values in report column order
    pub fn fields(&self) -> [&str; NODE_FIELD_COUNT] {
        [
            &self.index,
            &self.display_name,
            &self.short_name,
            &self.id,
            &self.latitude,
            &self.longitude,
            &self.altitude,
            &self.battery,
            &self.snr,
            &self.last_heard,
            &self.since,
        ]
    }

    fn same_position(&self, other: &NodeRecord) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// Result of merging one candidate record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The id was unknown and has been added
    Inserted,
    /// The id was known; `changed` is true when its position moved
    Updated {
        /// Latitude or longitude differed from the stored value
        changed: bool,
    },
}

impl MergeOutcome {
    /// Whether this outcome warrants a downstream push
    pub fn is_significant(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Inserted | MergeOutcome::Updated { changed: true }
        )
    }
}

/// Insertion-ordered map of node id to record
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    records: Vec<NodeRecord>,
    by_id: HashMap<String, usize>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a candidate record, inserting or overwriting by id
    pub fn merge(&mut self, candidate: NodeRecord) -> MergeOutcome {
        match self.by_id.get(&candidate.id) {
            Some(&slot) => {
                let stored = &mut self.records[slot];
                let changed = !stored.same_position(&candidate);
                trace!(id = %candidate.id, changed, "Updating node record");
                *stored = candidate;
                MergeOutcome::Updated { changed }
            }
            None => {
                trace!(id = %candidate.id, "Inserting node record");
                self.by_id.insert(candidate.id.clone(), self.records.len());
                self.records.push(candidate);
                MergeOutcome::Inserted
            }
        }
    }

    /// Copy of every record in insertion order
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.records.clone()
    }

    /// Display name and short name of a node
    pub fn resolve(&self, id: &str) -> Option<(String, String)> {
        self.get(id)
            .map(|record| (record.display_name.clone(), record.short_name.clone()))
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.by_id.get(id).map(|&slot| &self.records[slot])
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no node has been reported yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter()
    }
}

//! Entropy pulse records.
//!
//! A pulse is one timestamped unit of published randomness. Only the
//! output value and period drive reseeding; the remaining fields are
//! carried through for auditing.

use super::BeaconError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Source metadata passed through from the beacon untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PulseMetadata {
    /// Canonical URI of the pulse.
    pub uri: Option<String>,
    /// Beacon format version string.
    pub version: Option<String>,
    /// Hash of the signing certificate.
    pub certificate_id: Option<String>,
    /// Chain the pulse belongs to.
    pub chain_index: Option<u64>,
    /// Position of the pulse within its chain.
    pub pulse_index: Option<u64>,
    /// Beacon status; 0 means normal operation.
    pub status_code: Option<u32>,
}

/// One pulse from a randomness beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyPulse {
    /// Hex-encoded entropy material.
    #[serde(rename = "outputValue")]
    output: String,
    /// Interval until the beacon publishes the next pulse.
    #[serde(with = "duration_millis")]
    period: Duration,
    /// Publication time reported by the beacon.
    #[serde(rename = "timeStamp")]
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    metadata: PulseMetadata,
}

/// Beacon responses wrap the pulse in an envelope; replay files may not.
#[derive(Deserialize)]
#[serde(untagged)]
enum PulseDocument {
    Envelope { pulse: EntropyPulse },
    Bare(EntropyPulse),
}

impl From<PulseDocument> for EntropyPulse {
    fn from(doc: PulseDocument) -> Self {
        match doc {
            PulseDocument::Envelope { pulse } | PulseDocument::Bare(pulse) => pulse,
        }
    }
}

impl EntropyPulse {
    /// Creates a pulse stamped with the current time and no metadata.
    pub fn new(output: impl Into<String>, period: Duration) -> Self {
        Self {
            output: output.into(),
            period,
            timestamp: Utc::now(),
            metadata: PulseMetadata::default(),
        }
    }

    /// Replaces the beacon timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attaches chain and index metadata.
    pub fn with_metadata(mut self, metadata: PulseMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parses a single pulse, with or without the `{"pulse": ...}` envelope.
    pub fn from_json(json: &str) -> Result<Self, BeaconError> {
        let doc: PulseDocument = serde_json::from_str(json)?;
        Ok(doc.into())
    }

    /// Parses a JSON array of pulses, each with or without an envelope.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, BeaconError> {
        let docs: Vec<PulseDocument> = serde_json::from_str(json)?;
        Ok(docs.into_iter().map(Self::from).collect())
    }

    #[inline]
    pub fn output(&self) -> &str {
        &self.output
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    pub fn metadata(&self) -> &PulseMetadata {
        &self.metadata
    }
}

/// Serde adapter for `Duration` fields stored as integer milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! Record model for the Tvheadend configuration classes the deduplicator reads.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "muxdedup-core";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid scan_result index {0}: expected 0..=4")]
    InvalidScanResult(u8),
    #[error("mux {uuid}: frequency must be a positive kHz value")]
    ZeroFrequency { uuid: String },
    #[error("duplicate {class} uuid {uuid} in snapshot")]
    DuplicateUuid { class: String, uuid: String },
    #[error("decoding {class} record #{index}: {source}")]
    Decode {
        class: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding mux {uuid}: {source}")]
    Encode {
        uuid: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of the last scan attempt against a mux, carried on the wire as its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ScanResult {
    #[default]
    None,
    Ok,
    Fail,
    Partial,
    Ignore,
}

impl ScanResult {
    pub const ALL: [ScanResult; 5] = [
        ScanResult::None,
        ScanResult::Ok,
        ScanResult::Fail,
        ScanResult::Partial,
        ScanResult::Ignore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScanResult::None => "NONE",
            ScanResult::Ok => "OK",
            ScanResult::Fail => "FAIL",
            ScanResult::Partial => "PARTIAL",
            ScanResult::Ignore => "IGNORE",
        }
    }
}

impl TryFrom<u8> for ScanResult {
    type Error = RecordError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(RecordError::InvalidScanResult(index))
    }
}

impl From<ScanResult> for u8 {
    fn from(value: ScanResult) -> Self {
        match value {
            ScanResult::None => 0,
            ScanResult::Ok => 1,
            ScanResult::Fail => 2,
            ScanResult::Partial => 3,
            ScanResult::Ignore => 4,
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast multiplex. Optional attributes are defaulted at load time; every
/// attribute without a typed field is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mux {
    pub uuid: String,
    #[serde(default)]
    pub orbital: String,
    #[serde(default)]
    pub polarisation: String,
    /// kHz.
    pub frequency: u32,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub scan_first: i64,
    #[serde(default)]
    pub scan_last: i64,
    #[serde(default)]
    pub scan_result: ScanResult,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub cridauth: String,
    #[serde(default)]
    pub pnetwork_name: String,
    #[serde(default)]
    pub epg_module_id: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Mux {
    pub fn to_json(&self) -> Result<JsonValue, RecordError> {
        serde_json::to_value(self).map_err(|source| RecordError::Encode {
            uuid: self.uuid.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: String,
    #[serde(default)]
    pub svcname: String,
}

/// Channels are read-only inputs; only their service references matter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub services: Vec<String>,
}

/// Point-in-time copy of the three record classes, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub channels: Vec<Channel>,
    pub services: Vec<Service>,
    pub muxes: Vec<Mux>,
}

impl Snapshot {
    pub fn from_raw(
        channels: Vec<JsonValue>,
        services: Vec<JsonValue>,
        muxes: Vec<JsonValue>,
        mux_class: &str,
    ) -> Result<Self, RecordError> {
        let muxes: Vec<Mux> = decode_records(mux_class, muxes)?;
        validate_muxes(mux_class, &muxes)?;
        Ok(Self {
            channels: decode_records("channel", channels)?,
            services: decode_records("service", services)?,
            muxes,
        })
    }
}

pub fn decode_records<T: DeserializeOwned>(
    class: &str,
    values: Vec<JsonValue>,
) -> Result<Vec<T>, RecordError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).map_err(|source| RecordError::Decode {
                class: class.to_string(),
                index,
                source,
            })
        })
        .collect()
}

pub fn validate_muxes(class: &str, muxes: &[Mux]) -> Result<(), RecordError> {
    let mut seen = HashSet::with_capacity(muxes.len());
    for mux in muxes {
        if mux.frequency == 0 {
            return Err(RecordError::ZeroFrequency {
                uuid: mux.uuid.clone(),
            });
        }
        if !seen.insert(mux.uuid.as_str()) {
            return Err(RecordError::DuplicateUuid {
                class: class.to_string(),
                uuid: mux.uuid.clone(),
            });
        }
    }
    Ok(())
}

/// Display form of a unix timestamp; `0` means the event never happened.
pub fn format_date(timestamp: i64) -> String {
    if timestamp == 0 {
        return "never".to_string();
    }
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_mux_attributes_default_at_load() {
        let mux: Mux = serde_json::from_value(json!({
            "uuid": "m1",
            "orbital": "19.2E",
            "polarisation": "H",
            "frequency": 11494000,
            "scan_result": 1,
        }))
        .expect("decode");

        assert_eq!(mux.cridauth, "");
        assert_eq!(mux.pnetwork_name, "");
        assert_eq!(mux.epg_module_id, "");
        assert_eq!(mux.scan_first, 0);
        assert_eq!(mux.scan_result, ScanResult::Ok);
        assert!(mux.services.is_empty());
        assert!(mux.extra.is_empty());
    }

    #[test]
    fn unknown_attributes_survive_reencoding() {
        let raw = json!({
            "uuid": "m1",
            "orbital": "19.2E",
            "polarisation": "H",
            "frequency": 11494000,
            "scan_result": 2,
            "symbolrate": 22000000,
            "delsys": "DVB-S2",
            "enabled": true,
        });
        let mux: Mux = serde_json::from_value(raw).expect("decode");
        assert_eq!(mux.extra.get("symbolrate"), Some(&json!(22000000)));

        let encoded = mux.to_json().expect("encode");
        assert_eq!(encoded["delsys"], json!("DVB-S2"));
        assert_eq!(encoded["enabled"], json!(true));
        assert_eq!(encoded["scan_result"], json!(2));
    }

    #[test]
    fn out_of_range_scan_result_is_rejected() {
        let err = decode_records::<Mux>(
            "dvb_mux_dvbs",
            vec![json!({"uuid": "m1", "frequency": 10714000, "scan_result": 7})],
        )
        .expect_err("scan_result 7 must not decode");
        assert!(matches!(err, RecordError::Decode { index: 0, .. }));
    }

    #[test]
    fn snapshot_rejects_duplicate_uuids_and_zero_frequency() {
        let dup = Snapshot::from_raw(
            vec![],
            vec![],
            vec![
                json!({"uuid": "m1", "frequency": 10714000}),
                json!({"uuid": "m1", "frequency": 10729000}),
            ],
            "dvb_mux_dvbs",
        );
        assert!(matches!(dup, Err(RecordError::DuplicateUuid { .. })));

        let zero = Snapshot::from_raw(
            vec![],
            vec![],
            vec![json!({"uuid": "m1", "frequency": 0})],
            "dvb_mux_dvbs",
        );
        assert!(matches!(zero, Err(RecordError::ZeroFrequency { .. })));
    }

    #[test]
    fn dates_render_never_for_zero() {
        assert_eq!(format_date(0), "never");
        assert_eq!(format_date(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }

    #[test]
    fn scan_result_indices_are_fixed() {
        assert_eq!(u8::from(ScanResult::Ok), 1);
        assert_eq!(u8::from(ScanResult::Fail), 2);
        assert_eq!(ScanResult::try_from(4).expect("ignore"), ScanResult::Ignore);
        assert_eq!(ScanResult::Partial.to_string(), "PARTIAL");
    }
}

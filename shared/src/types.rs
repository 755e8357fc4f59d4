use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// Per-device metadata persisted in `data.json`, keyed by device UUID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Display name override for the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Authentication token issued for the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Fields written by other tools; kept as-is on rewrite
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A table entry that can carry fields it does not model in `extra`.
pub trait TableRecord: Default {
    fn extra_mut(&mut self) -> &mut BTreeMap<String, Value>;
}

impl DeviceRecord {
    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.extra.remove("alias");
        self.alias = Some(alias.into());
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.extra.remove("token");
        self.token = Some(token.into());
    }
}

impl TableRecord for DeviceRecord {
    fn extra_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.extra
    }
}

/// Per-location port assignment persisted in `dlna_servers.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// TCP port reserved for the location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LocationRecord {
    /// A typed port replaces any raw `port` kept in `extra`
    pub fn set_port(&mut self, port: u16) {
        self.extra.remove("port");
        self.port = Some(port);
    }
}

impl TableRecord for LocationRecord {
    fn extra_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.extra
    }
}

/// Device UUID -> record. Sorted so rewrites produce stable diffs.
pub type DeviceTable = BTreeMap<String, DeviceRecord>;

/// Location identifier -> record.
pub type LocationTable = BTreeMap<String, LocationRecord>;

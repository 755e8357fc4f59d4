use std::collections::BTreeMap;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{DeviceTable, LocationTable};

/// Tokens are credentials; the digest is served to any local client, so
/// only whether a device has one goes into the view.
#[derive(Serialize)]
struct DeviceView<'a> {
    alias: Option<&'a str>,
    has_token: bool,
}

#[derive(Serialize)]
struct RegistryView<'a> {
    devices: BTreeMap<&'a str, DeviceView<'a>>,
    locations: &'a LocationTable,
}

/// SHA-256 over both tables. Keys are sorted, so the result depends only on content.
pub fn compute_digest(devices: &DeviceTable, locations: &LocationTable) -> String {
    let view = RegistryView {
        devices: devices
            .iter()
            .map(|(uuid, record)| {
                (
                    uuid.as_str(),
                    DeviceView {
                        alias: record.alias.as_deref(),
                        has_token: record.token.is_some(),
                    },
                )
            })
            .collect(),
        locations,
    };

    let json = serde_json::to_string(&view)
        .expect("Failed to serialize registry for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}

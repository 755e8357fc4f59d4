/// Default file holding per-device metadata (alias, token)
pub const DATA_FILE_NAME: &str = "data.json";

/// Default file holding per-location port assignments
pub const LOCATION_PORT_FILE_NAME: &str = "dlna_servers.json";

/// API path prefix
pub const API_PREFIX: &str = "/v1";

//! Device registry and port assignments backed by two JSON tables under
//! `Settings::config_path`.
//!
//! Each operation is a fresh read-modify-write of one file. Nothing here
//! locks the files: two processes (or two threads holding separate stores)
//! writing the same table can lose updates. Inside the daemon every call
//! goes through [`crate::store_manager::StoreHandle`], which owns the only
//! store.

pub mod alias;
pub mod error;
pub mod hash;
pub mod table;

use std::path::PathBuf;
use shared::types::{DeviceRecord, DeviceTable, LocationRecord, LocationTable};
use crate::config::Settings;
use self::alias::AliasRules;
use self::table::{load_table, save_table, table_path, TableLoad};

pub use self::error::StoreError;

pub struct ConfigStore {
    settings: Settings,
    aliases: AliasRules,
}

impl ConfigStore {
    /// Build a store over `settings`. Alias rules are validated here.
    pub fn new(settings: Settings) -> Result<Self, StoreError> {
        let aliases = AliasRules::parse(&settings.aliases)?;
        if !aliases.is_empty() {
            tracing::info!("Loaded {} alias rules", aliases.len());
        }
        Ok(Self { settings, aliases })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn data_path(&self) -> PathBuf {
        table_path(&self.settings.config_path, &self.settings.data_file_name)
    }

    pub fn locations_path(&self) -> PathBuf {
        table_path(&self.settings.config_path, &self.settings.location_port_file_name)
    }

    pub fn load_devices(&self) -> TableLoad<DeviceTable> {
        load_table(&self.settings.config_path, &self.settings.data_file_name)
    }

    pub fn load_locations(&self) -> TableLoad<LocationTable> {
        load_table(&self.settings.config_path, &self.settings.location_port_file_name)
    }

    fn save_devices(&self, devices: &DeviceTable) -> Result<(), StoreError> {
        save_table(devices, &self.settings.config_path, &self.settings.data_file_name)
    }

    fn save_locations(&self, locations: &LocationTable) -> Result<(), StoreError> {
        save_table(locations, &self.settings.config_path, &self.settings.location_port_file_name)
    }

    fn update_device<F>(&self, uuid: &str, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut devices = self.load_devices().into_table();
        update(devices.entry(uuid.to_string()).or_default());
        self.save_devices(&devices)
    }

    /// Persisted alias, then the first matching alias rule, then `default_name`
    pub fn resolve_display_name(&self, uuid: &str, default_name: &str, ip: &str) -> String {
        let devices = self.load_devices().into_table();
        if let Some(alias) = devices.get(uuid).and_then(|d| d.alias.as_deref()) {
            return alias.to_string();
        }

        self.aliases
            .resolve(uuid, default_name, ip)
            .unwrap_or(default_name)
            .to_string()
    }

    /// Set the alias for `uuid`, keeping its token
    pub fn persist_display_name(&self, uuid: &str, alias: &str) -> Result<(), StoreError> {
        self.update_device(uuid, |record| record.set_alias(alias))?;
        tracing::info!("Alias for {} set to {:?}", uuid, alias);
        Ok(())
    }

    pub fn get_token(&self, uuid: &str) -> Option<String> {
        self.load_devices()
            .into_table()
            .remove(uuid)
            .and_then(|record| record.token)
    }

    /// Set the token for `uuid`, keeping its alias
    pub fn set_token(&self, uuid: &str, token: &str) -> Result<(), StoreError> {
        self.update_device(uuid, |record| record.set_token(token))?;
        tracing::info!("Token for {} updated", uuid);
        Ok(())
    }

    pub fn list_devices(&self) -> DeviceTable {
        self.load_devices().into_table()
    }

    pub fn get_location_port(&self, location: &str) -> Option<u16> {
        self.load_locations()
            .into_table()
            .get(location)
            .and_then(|record| record.port)
    }

    pub fn list_locations(&self) -> LocationTable {
        self.load_locations().into_table()
    }

    pub fn persist_location_port(&self, location: &str, port: u16) -> Result<(), StoreError> {
        let mut locations = self.load_locations().into_table();
        locations
            .entry(location.to_string())
            .or_insert_with(LocationRecord::default)
            .set_port(port);
        self.save_locations(&locations)?;

        tracing::info!("Location {} bound to port {}", location, port);
        Ok(())
    }

    /// Reserve the next free port in memory.
    ///
    /// The base port first catches up with the highest persisted location
    /// port, then advances by one. The result is recorded in
    /// `Settings::device_ports` but **not** written to disk: until the
    /// caller passes it to [`ConfigStore::persist_location_port`], a restart
    /// hands the same port out again. Use
    /// [`ConfigStore::assign_location_port`] to do both in one step.
    pub fn allocate_port(&mut self) -> Result<u16, StoreError> {
        let persisted_max = self
            .list_locations()
            .values()
            .filter_map(|record| record.port)
            .max();

        let base = persisted_max.map_or(self.settings.base_port, |max| max.max(self.settings.base_port));
        let port = base
            .checked_add(1)
            .ok_or(StoreError::PortsExhausted { base_port: base })?;

        self.settings.base_port = port;
        self.settings.device_ports.push(port);

        tracing::debug!("Allocated port {}", port);
        Ok(port)
    }

    /// Port for `location`, allocating and persisting one if it has none yet
    pub fn assign_location_port(&mut self, location: &str) -> Result<u16, StoreError> {
        if let Some(port) = self.get_location_port(location) {
            return Ok(port);
        }

        let port = self.allocate_port()?;
        self.persist_location_port(location, port)?;
        Ok(port)
    }

    /// Digest of both tables, see [`hash::compute_digest`]
    pub fn digest(&self) -> String {
        hash::compute_digest(&self.list_devices(), &self.list_locations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_in(dir: &TempDir) -> Settings {
        Settings {
            config_path: dir.path().join("config"),
            ..Settings::default()
        }
    }

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(settings_in(dir)).unwrap()
    }

    fn store_with_aliases(dir: &TempDir, aliases: &str) -> ConfigStore {
        ConfigStore::new(Settings {
            aliases: aliases.to_string(),
            ..settings_in(dir)
        })
        .unwrap()
    }

    #[test]
    fn test_default_name_without_rules() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.resolve_display_name("u-new", "Foo", "1.2.3.4"), "Foo");
    }

    #[test]
    fn test_persisted_alias_wins_and_keeps_token() {
        let dir = TempDir::new().unwrap();
        let store = store_with_aliases(&dir, "u1:FromRules");

        store.set_token("u1", "tok-123").unwrap();
        store.persist_display_name("u1", "Living Room").unwrap();

        assert_eq!(store.resolve_display_name("u1", "anything", "anyip"), "Living Room");
        assert_eq!(store.get_token("u1").as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_token_update_keeps_alias() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.persist_display_name("u1", "Living Room").unwrap();
        store.set_token("u1", "first").unwrap();
        store.set_token("u1", "second").unwrap();

        assert_eq!(store.get_token("u1").as_deref(), Some("second"));
        assert_eq!(store.resolve_display_name("u1", "x", "y"), "Living Room");
    }

    #[test]
    fn test_alias_rules() {
        let dir = TempDir::new().unwrap();
        let store = store_with_aliases(&dir, "u2:Bedroom,1.2.3.4:Kitchen");

        assert_eq!(store.resolve_display_name("u2", "DefaultName", "9.9.9.9"), "Bedroom");
        assert_eq!(store.resolve_display_name("other", "DefaultName", "1.2.3.4"), "Kitchen");
        assert_eq!(store.resolve_display_name("other", "DefaultName", "9.9.9.9"), "DefaultName");
    }

    #[test]
    fn test_invalid_alias_rules_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let result = ConfigStore::new(Settings {
            aliases: "u2:Bedroom,Kitchen".to_string(),
            ..settings_in(&dir)
        });

        assert!(matches!(result, Err(StoreError::InvalidAliasRule { .. })));
    }

    #[test]
    fn test_missing_token() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.get_token("nobody"), None);
        store.persist_display_name("u1", "Den").unwrap();
        assert_eq!(store.get_token("u1"), None);
    }

    #[test]
    fn test_location_port() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.get_location_port("loc1"), None);
        store.persist_location_port("loc1", 5000).unwrap();
        assert_eq!(store.get_location_port("loc1"), Some(5000));
        assert_eq!(store.list_locations().len(), 1);
    }

    #[test]
    fn test_persist_location_port_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.persist_location_port("loc1", 5000).unwrap();
        let once = std::fs::read(store.locations_path()).unwrap();
        store.persist_location_port("loc1", 5000).unwrap();
        let twice = std::fs::read(store.locations_path()).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_persist_location_port_keeps_other_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(&store.settings().config_path).unwrap();
        std::fs::write(
            store.locations_path(),
            r#"{"loc1": {"port": 5000, "label": "nas"}}"#,
        )
        .unwrap();

        store.persist_location_port("loc1", 5005).unwrap();

        let record = store.list_locations().remove("loc1").unwrap();
        assert_eq!(record.port, Some(5005));
        assert_eq!(record.extra["label"], "nas");
    }

    #[test]
    fn test_corrupt_locations_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(&store.settings().config_path).unwrap();
        std::fs::write(store.locations_path(), "garbage").unwrap();

        assert!(store.list_locations().is_empty());
        assert_eq!(store.get_location_port("loc1"), None);
        assert!(!store.load_locations().is_pristine());
    }

    #[test]
    fn test_out_of_range_port_keeps_other_locations() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        std::fs::create_dir_all(&store.settings().config_path).unwrap();
        std::fs::write(
            store.locations_path(),
            r#"{"a": {"port": 32490}, "b": {"port": 70000}}"#,
        )
        .unwrap();

        assert_eq!(store.get_location_port("a"), Some(32490));
        assert_eq!(store.get_location_port("b"), None);

        let port = store.allocate_port().unwrap();
        assert_eq!(port, 32491, "must not hand out the port held by \"a\"");
        store.persist_location_port("c", port).unwrap();

        let text = std::fs::read_to_string(store.locations_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["a"]["port"], 32490);
        assert_eq!(value["b"]["port"], 70000);
        assert_eq!(value["c"]["port"], 32491);
    }

    #[test]
    fn test_malformed_device_keeps_other_tokens() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(&store.settings().config_path).unwrap();
        std::fs::write(
            store.data_path(),
            r#"{"u1": {"alias": "Den", "token": "tok"}, "u9": {"alias": 5}}"#,
        )
        .unwrap();

        assert_eq!(store.get_token("u1").as_deref(), Some("tok"));
        assert_eq!(store.resolve_display_name("u9", "Fallback", "ip"), "Fallback");

        store.persist_display_name("u2", "Office").unwrap();
        assert_eq!(store.get_token("u1").as_deref(), Some("tok"));
        assert_eq!(store.resolve_display_name("u1", "x", "y"), "Den");

        // A typed write replaces the malformed field
        store.persist_display_name("u9", "Attic").unwrap();
        assert_eq!(store.resolve_display_name("u9", "Fallback", "ip"), "Attic");
        assert!(store.load_devices().is_pristine());
    }

    #[test]
    fn test_allocate_port_sequence() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        assert_eq!(store.allocate_port().unwrap(), 32490);
        assert_eq!(store.allocate_port().unwrap(), 32491);
        assert_eq!(store.settings().device_ports, vec![32490, 32491]);
        assert_eq!(store.settings().base_port, 32491);
        assert!(!store.locations_path().exists(), "allocation must not persist");
    }

    #[test]
    fn test_allocate_port_skips_persisted_ports() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.persist_location_port("loc1", 40000).unwrap();

        assert_eq!(store.allocate_port().unwrap(), 40001);
        assert_eq!(store.allocate_port().unwrap(), 40002);
    }

    #[test]
    fn test_allocate_port_never_moves_base_down() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.persist_location_port("loc1", 1000).unwrap();

        assert_eq!(store.allocate_port().unwrap(), 32490);
    }

    #[test]
    fn test_allocate_port_exhausted() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::new(Settings {
            base_port: u16::MAX,
            ..settings_in(&dir)
        })
        .unwrap();

        assert!(matches!(
            store.allocate_port(),
            Err(StoreError::PortsExhausted { base_port: u16::MAX })
        ));
        assert!(store.settings().device_ports.is_empty());
    }

    #[test]
    fn test_allocated_port_lost_without_persist() {
        let dir = TempDir::new().unwrap();

        let mut first = store_in(&dir);
        let port = first.allocate_port().unwrap();
        drop(first);

        // Restart before persist_location_port: the port is handed out again
        let mut restarted = store_in(&dir);
        assert_eq!(restarted.allocate_port().unwrap(), port);
    }

    #[test]
    fn test_allocated_port_survives_once_persisted() {
        let dir = TempDir::new().unwrap();

        let mut first = store_in(&dir);
        let port = first.allocate_port().unwrap();
        first.persist_location_port("loc1", port).unwrap();
        drop(first);

        let mut restarted = store_in(&dir);
        assert_eq!(restarted.allocate_port().unwrap(), port + 1);
    }

    #[test]
    fn test_assign_location_port() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let port = store.assign_location_port("loc1").unwrap();
        assert_eq!(port, 32490);
        assert_eq!(store.get_location_port("loc1"), Some(port));

        // Already bound: same port, nothing new allocated
        assert_eq!(store.assign_location_port("loc1").unwrap(), port);
        assert_eq!(store.settings().device_ports, vec![port]);

        assert_eq!(store.assign_location_port("loc2").unwrap(), 32491);
    }

    #[test]
    fn test_digest_tracks_changes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let empty = store.digest();
        store.persist_location_port("loc1", 5000).unwrap();
        assert_ne!(store.digest(), empty);
    }
}

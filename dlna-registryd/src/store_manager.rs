use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::{DeviceTable, LocationTable};
use crate::config::Settings;
use crate::store::{ConfigStore, StoreError};

type Reply<T> = oneshot::Sender<T>;

/// Commands sent to the store thread
pub enum StoreCommand {
    ResolveName {
        uuid: String,
        name: String,
        ip: String,
        reply: Reply<String>,
    },
    SetAlias(String, String, Reply<Result<(), StoreError>>),
    GetToken(String, Reply<Option<String>>),
    SetToken(String, String, Reply<Result<(), StoreError>>),
    ListDevices(Reply<DeviceTable>),
    GetLocationPort(String, Reply<Option<u16>>),
    ListLocations(Reply<LocationTable>),
    SetLocationPort(String, u16, Reply<Result<(), StoreError>>),
    AssignLocationPort(String, Reply<Result<u16, StoreError>>),
    AllocatePort(Reply<Result<u16, StoreError>>),
    Settings(Reply<Settings>),
    Shutdown,
}

/// Handle to the store thread. The thread owns the only [`ConfigStore`],
/// so read-modify-write cycles from API handlers never interleave.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread. `digest_tx` receives the registry digest
    /// after every successful mutation.
    pub fn spawn(mut store: ConfigStore, digest_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        let publish = |store: &ConfigStore, digest_tx: &watch::Sender<String>| {
            let _ = digest_tx.send(store.digest());
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::ResolveName { uuid, name, ip, reply } => {
                        let _ = reply.send(store.resolve_display_name(&uuid, &name, &ip));
                    }
                    StoreCommand::SetAlias(uuid, alias, reply) => {
                        let result = store.persist_display_name(&uuid, &alias);
                        if result.is_ok() {
                            publish(&store, &digest_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::GetToken(uuid, reply) => {
                        let _ = reply.send(store.get_token(&uuid));
                    }
                    StoreCommand::SetToken(uuid, token, reply) => {
                        let result = store.set_token(&uuid, &token);
                        if result.is_ok() {
                            publish(&store, &digest_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::ListDevices(reply) => {
                        let _ = reply.send(store.list_devices());
                    }
                    StoreCommand::GetLocationPort(location, reply) => {
                        let _ = reply.send(store.get_location_port(&location));
                    }
                    StoreCommand::ListLocations(reply) => {
                        let _ = reply.send(store.list_locations());
                    }
                    StoreCommand::SetLocationPort(location, port, reply) => {
                        let result = store.persist_location_port(&location, port);
                        if result.is_ok() {
                            publish(&store, &digest_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::AssignLocationPort(location, reply) => {
                        let result = store.assign_location_port(&location);
                        if result.is_ok() {
                            publish(&store, &digest_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::AllocatePort(reply) => {
                        // In-memory only; the tables are unchanged
                        let _ = reply.send(store.allocate_port());
                    }
                    StoreCommand::Settings(reply) => {
                        let _ = reply.send(store.settings().clone());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await?;
        Ok(rx.await?)
    }

    pub async fn resolve_display_name(&self, uuid: String, name: String, ip: String) -> Result<String> {
        self.request(|reply| StoreCommand::ResolveName { uuid, name, ip, reply }).await
    }

    pub async fn persist_display_name(&self, uuid: String, alias: String) -> Result<()> {
        Ok(self.request(|reply| StoreCommand::SetAlias(uuid, alias, reply)).await??)
    }

    pub async fn get_token(&self, uuid: String) -> Result<Option<String>> {
        self.request(|reply| StoreCommand::GetToken(uuid, reply)).await
    }

    pub async fn set_token(&self, uuid: String, token: String) -> Result<()> {
        Ok(self.request(|reply| StoreCommand::SetToken(uuid, token, reply)).await??)
    }

    pub async fn list_devices(&self) -> Result<DeviceTable> {
        self.request(StoreCommand::ListDevices).await
    }

    pub async fn get_location_port(&self, location: String) -> Result<Option<u16>> {
        self.request(|reply| StoreCommand::GetLocationPort(location, reply)).await
    }

    pub async fn list_locations(&self) -> Result<LocationTable> {
        self.request(StoreCommand::ListLocations).await
    }

    pub async fn persist_location_port(&self, location: String, port: u16) -> Result<()> {
        Ok(self.request(|reply| StoreCommand::SetLocationPort(location, port, reply)).await??)
    }

    pub async fn assign_location_port(&self, location: String) -> Result<u16> {
        Ok(self.request(|reply| StoreCommand::AssignLocationPort(location, reply)).await??)
    }

    pub async fn allocate_port(&self) -> Result<u16> {
        Ok(self.request(StoreCommand::AllocatePort).await??)
    }

    pub async fn settings(&self) -> Result<Settings> {
        self.request(StoreCommand::Settings).await
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}

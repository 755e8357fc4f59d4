use std::collections::BTreeMap;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use crate::store::StoreError;
use crate::store_manager::StoreHandle;
use shared::protocol::API_PREFIX;
use shared::types::LocationTable;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub digest_rx: watch::Receiver<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub product: String,
    pub version: String,
    pub platform: String,
    pub platform_version: String,
    pub http_port: u16,
    pub host_ip: Option<String>,
    pub location_url: Option<String>,
    pub base_port: u16,
    pub device_ports: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceSummary {
    pub alias: Option<String>,
    pub has_token: bool,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NameResponse {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AliasBody {
    pub alias: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationPortBody {
    pub location: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub location: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PortResponse {
    pub port: u16,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/config", get(get_config))
        .route("/devices", get(get_devices))
        .route("/devices/:uuid/name", get(get_name))
        .route("/devices/:uuid/alias", put(put_alias))
        .route("/devices/:uuid/token", get(get_token).put(put_token))
        .route("/locations", get(get_locations))
        .route("/locations/port", get(get_location_port).put(put_location_port))
        .route("/locations/assign", post(assign_location))
        .route("/ports", post(allocate_port))
        .route("/registry/hash", get(get_hash));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

fn internal(context: &str) -> impl FnOnce(anyhow::Error) -> StatusCode + '_ {
    move |e| {
        tracing::error!("{}: {:#}", context, e);
        match e.downcast_ref::<StoreError>() {
            Some(StoreError::PortsExhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Result<Json<ConfigResponse>, StatusCode> {
    let s = state
        .store
        .settings()
        .await
        .map_err(internal("Failed to read settings"))?;

    Ok(Json(ConfigResponse {
        product: s.product,
        version: s.version,
        platform: s.platform,
        platform_version: s.platform_version,
        http_port: s.http_port,
        host_ip: s.host_ip,
        location_url: s.location_url,
        base_port: s.base_port,
        device_ports: s.device_ports,
    }))
}

async fn get_devices(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, DeviceSummary>>, StatusCode> {
    let devices = state
        .store
        .list_devices()
        .await
        .map_err(internal("Failed to list devices"))?;

    Ok(Json(
        devices
            .into_iter()
            .map(|(uuid, record)| {
                let summary = DeviceSummary {
                    alias: record.alias,
                    has_token: record.token.is_some(),
                };
                (uuid, summary)
            })
            .collect(),
    ))
}

async fn get_name(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<NameQuery>,
) -> Result<Json<NameResponse>, StatusCode> {
    let name = state
        .store
        .resolve_display_name(uuid, query.name, query.ip)
        .await
        .map_err(internal("Failed to resolve display name"))?;

    Ok(Json(NameResponse { name }))
}

async fn put_alias(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(body): Json<AliasBody>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .persist_display_name(uuid, body.alias)
        .await
        .map_err(internal("Failed to save alias"))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_token(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<TokenBody>, StatusCode> {
    state
        .store
        .get_token(uuid)
        .await
        .map_err(internal("Failed to read token"))?
        .map(|token| Json(TokenBody { token }))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_token(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(body): Json<TokenBody>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .set_token(uuid, body.token)
        .await
        .map_err(internal("Failed to save token"))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_locations(State(state): State<AppState>) -> Result<Json<LocationTable>, StatusCode> {
    state
        .store
        .list_locations()
        .await
        .map(Json)
        .map_err(internal("Failed to list locations"))
}

async fn get_location_port(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<PortResponse>, StatusCode> {
    state
        .store
        .get_location_port(query.location)
        .await
        .map_err(internal("Failed to read location port"))?
        .map(|port| Json(PortResponse { port }))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_location_port(
    State(state): State<AppState>,
    Json(body): Json<LocationPortBody>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .persist_location_port(body.location, body.port)
        .await
        .map_err(internal("Failed to save location port"))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn assign_location(
    State(state): State<AppState>,
    Json(body): Json<AssignBody>,
) -> Result<Json<PortResponse>, StatusCode> {
    let port = state
        .store
        .assign_location_port(body.location)
        .await
        .map_err(internal("Failed to assign location port"))?;

    Ok(Json(PortResponse { port }))
}

async fn allocate_port(State(state): State<AppState>) -> Result<Json<PortResponse>, StatusCode> {
    let port = state
        .store
        .allocate_port()
        .await
        .map_err(internal("Failed to allocate port"))?;

    Ok(Json(PortResponse { port }))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.digest_rx.borrow().clone()
}

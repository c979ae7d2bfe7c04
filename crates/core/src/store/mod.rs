//! Legacy object-store reader.
//!
//! The legacy system persisted its state as an object graph; a migration
//! run works from a JSON export of that graph (the "snapshot"). Snapshots
//! are opened from a URI: a `file://` URI or bare path for local exports,
//! or `http(s)://` for exports served over the network.

pub mod objects;

use tracing::{debug, info};

pub use objects::{MainSnapshot, RoomBookingSnapshot};

use crate::errors::StoreError;

/// Open the main object-graph snapshot from `uri`.
pub fn open_snapshot(uri: &str) -> Result<MainSnapshot, StoreError> {
    info!(uri, "opening legacy snapshot");
    let bytes = fetch(uri)?;
    let snapshot =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::DecodeError(e.to_string()))?;
    debug!(uri, "legacy snapshot decoded");
    Ok(snapshot)
}

/// Open the room-booking snapshot from `uri`.
pub fn open_rb_snapshot(uri: &str) -> Result<RoomBookingSnapshot, StoreError> {
    info!(uri, "opening room-booking snapshot");
    let bytes = fetch(uri)?;
    let snapshot =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::DecodeError(e.to_string()))?;
    debug!(uri, "room-booking snapshot decoded");
    Ok(snapshot)
}

/// Fetch raw snapshot bytes from a URI.
///
/// `file://<path>` and bare paths read from disk; `http://` and `https://`
/// fetch over the network. Anything else is rejected.
fn fetch(uri: &str) -> Result<Vec<u8>, StoreError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return read_local(path);
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return fetch_http(uri);
    }
    match uri.split_once("://") {
        Some((scheme, _)) => Err(StoreError::UnknownScheme(scheme.to_string())),
        None => read_local(uri),
    }
}

fn read_local(path: &str) -> Result<Vec<u8>, StoreError> {
    if !std::path::Path::new(path).exists() {
        return Err(StoreError::NotFound(path.to_string()));
    }
    Ok(std::fs::read(path)?)
}

fn fetch_http(uri: &str) -> Result<Vec<u8>, StoreError> {
    let response = reqwest::blocking::get(uri)?;
    let status = response.status();
    if !status.is_success() {
        return Err(StoreError::HttpStatus {
            status: status.as_u16(),
            uri: uri.to_string(),
        });
    }
    Ok(response.bytes()?.to_vec())
}

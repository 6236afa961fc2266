//! Known-peer snapshot persistence: a JSON file enumerating the known
//! peers, rewritten periodically and read back on startup.

use std::fs;
use std::path::Path;

use ember_core::PeerEntry;

use crate::NetError;

/// Load a previously written snapshot. Missing files are an error for
/// the caller to downgrade; corrupt content surfaces as a JSON error.
pub fn load_peer_snapshot(path: &Path) -> Result<Vec<PeerEntry>, NetError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Rewrite the snapshot file with the current known-peer table.
pub fn write_peer_snapshot(path: &Path, peers: &[PeerEntry]) -> Result<(), NetError> {
    let data = serde_json::to_string_pretty(peers)?;
    fs::write(path, data)?;
    Ok(())
}

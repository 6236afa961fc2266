//! Known-peer and active-connection tables with group-balanced caps.
//!
//! Pure state machine: no IO happens here. The periodic tasks and the
//! propagator drive it and hold the overlay lock only for short,
//! non-suspending sections.

use std::collections::HashMap;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde::Serialize;

use ember_core::{group_of, PeerEntry};

use crate::{Identity, MAX_EXTERNAL_CONNECTIONS, MAX_INTERNAL_CONNECTIONS, PEER_TIMEOUT};

/// Whether a peer shares the local node's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Internal,
    External,
}

/// A peer as tracked by the overlay.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub entry: PeerEntry,
    pub group: char,
    pub last_seen: Instant,
    pub retries: u32,
}

impl PeerState {
    fn new(entry: PeerEntry) -> Option<Self> {
        let group = group_of(&entry.node_id).ok()?;
        Some(Self {
            entry,
            group,
            last_seen: Instant::now(),
            retries: 0,
        })
    }
}

/// Serializable view of a tracked peer, used by `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDetail {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    pub group: String,
    pub retries: u32,
}

impl From<&PeerState> for PeerDetail {
    fn from(state: &PeerState) -> Self {
        Self {
            node_id: state.entry.node_id.clone(),
            ip: state.entry.ip.clone(),
            port: state.entry.port,
            group: state.group.to_string(),
            retries: state.retries,
        }
    }
}

/// Active-connection counts split by group kind, reported by `/status`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCounts {
    pub internal: usize,
    pub external: usize,
}

/// Peer tables and connection-cap bookkeeping.
///
/// The outgoing active set is capped at [`MAX_INTERNAL_CONNECTIONS`]
/// peers of the local group plus [`MAX_EXTERNAL_CONNECTIONS`] peers of
/// other groups. Callers re-check capacity around every suspension point
/// (intent, post-ping, exchange acceptance).
pub struct Overlay {
    self_id: String,
    self_group: char,
    known: HashMap<String, PeerState>,
    active: HashMap<String, PeerState>,
}

impl Overlay {
    pub fn new(identity: &Identity) -> Self {
        Self {
            self_id: identity.node_id.clone(),
            self_group: identity.group,
            known: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub fn group_kind(&self, group: char) -> GroupKind {
        if group == self.self_group {
            GroupKind::Internal
        } else {
            GroupKind::External
        }
    }

    /// Record a peer in the known table. Self references and malformed
    /// node ids are ignored. Returns true when the peer was new.
    pub fn learn(&mut self, entry: PeerEntry) -> bool {
        if entry.node_id == self.self_id {
            return false;
        }
        let Some(state) = PeerState::new(entry) else {
            return false;
        };
        self.known
            .insert(state.entry.node_id.clone(), state)
            .is_none()
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.active.contains_key(node_id)
    }

    pub fn counts_by_group(&self) -> GroupCounts {
        let internal = self
            .active
            .values()
            .filter(|p| p.group == self.self_group)
            .count();
        GroupCounts {
            internal,
            external: self.active.len() - internal,
        }
    }

    /// Whether the cap covering `group` still has room.
    pub fn has_capacity(&self, group: char) -> bool {
        self.has_capacity_kind(self.group_kind(group))
    }

    /// Whether the internal or external cap still has room.
    pub fn has_capacity_kind(&self, kind: GroupKind) -> bool {
        let counts = self.counts_by_group();
        match kind {
            GroupKind::Internal => counts.internal < MAX_INTERNAL_CONNECTIONS,
            GroupKind::External => counts.external < MAX_EXTERNAL_CONNECTIONS,
        }
    }

    /// Both caps met.
    pub fn saturated(&self) -> bool {
        let counts = self.counts_by_group();
        counts.internal >= MAX_INTERNAL_CONNECTIONS && counts.external >= MAX_EXTERNAL_CONNECTIONS
    }

    /// Promote a peer to the active set after a successful ping.
    /// Re-checks the cap; returns false when the slot was taken in the
    /// meantime or the peer is already active.
    pub fn activate(&mut self, entry: PeerEntry) -> bool {
        if entry.node_id == self.self_id || self.active.contains_key(&entry.node_id) {
            return false;
        }
        let Some(state) = PeerState::new(entry) else {
            return false;
        };
        if !self.has_capacity(state.group) {
            return false;
        }
        self.known
            .entry(state.entry.node_id.clone())
            .or_insert_with(|| state.clone());
        self.active.insert(state.entry.node_id.clone(), state);
        true
    }

    /// Record a successful contact: reset retries, refresh `last_seen`
    /// in both tables.
    pub fn touch(&mut self, node_id: &str) {
        for table in [&mut self.known, &mut self.active] {
            if let Some(state) = table.get_mut(node_id) {
                state.retries = 0;
                state.last_seen = Instant::now();
            }
        }
    }

    /// Record a failed contact; returns the peer's new retry count.
    pub fn record_failure(&mut self, node_id: &str) -> u32 {
        let mut retries = 0;
        for table in [&mut self.known, &mut self.active] {
            if let Some(state) = table.get_mut(node_id) {
                state.retries += 1;
                retries = state.retries;
            }
        }
        retries
    }

    /// Drop a peer from both tables, reporting which cap it occupied.
    pub fn evict(&mut self, node_id: &str) -> Option<GroupKind> {
        let state = self.active.remove(node_id)?;
        self.known.remove(node_id);
        Some(self.group_kind(state.group))
    }

    /// Remove peers not heard from within [`PEER_TIMEOUT`]. Returns the
    /// number of peers dropped from either table.
    pub fn cleanup_stale(&mut self) -> usize {
        let now = Instant::now();
        let stale =
            |state: &PeerState| now.duration_since(state.last_seen) > PEER_TIMEOUT;
        let before = self.known.len() + self.active.len();
        self.known.retain(|_, state| !stale(state));
        self.active.retain(|_, state| !stale(state));
        before - (self.known.len() + self.active.len())
    }

    /// Active peers eligible for a peer-exchange round.
    pub fn exchange_targets(&self, max_retries: u32) -> Vec<PeerEntry> {
        self.active
            .values()
            .filter(|p| p.retries <= max_retries)
            .map(|p| p.entry.clone())
            .collect()
    }

    /// Known-but-not-active peers occupying the given cap, shuffled.
    pub fn replacement_candidates(&self, kind: GroupKind) -> Vec<PeerEntry> {
        let mut candidates: Vec<PeerEntry> = self
            .known
            .values()
            .filter(|p| !self.active.contains_key(&p.entry.node_id))
            .filter(|p| self.group_kind(p.group) == kind)
            .map(|p| p.entry.clone())
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates
    }

    /// Snapshot of the active set, for propagation fan-out and `/peers`.
    pub fn snapshot_active(&self) -> Vec<PeerEntry> {
        self.active.values().map(|p| p.entry.clone()).collect()
    }

    pub fn known_entries(&self) -> Vec<PeerEntry> {
        self.known.values().map(|p| p.entry.clone()).collect()
    }

    pub fn active_details(&self) -> Vec<PeerDetail> {
        self.active.values().map(PeerDetail::from).collect()
    }

    pub fn known_details(&self) -> Vec<PeerDetail> {
        self.known.values().map(PeerDetail::from).collect()
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    fn backdate(&mut self, node_id: &str, by: std::time::Duration) {
        for table in [&mut self.known, &mut self.active] {
            if let Some(state) = table.get_mut(node_id) {
                if let Some(past) = Instant::now().checked_sub(by) {
                    state.last_seen = past;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity() -> Identity {
        Identity::new(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            "127.0.0.1".to_string(),
            7001,
        )
        .unwrap()
    }

    fn peer(node_id: &str, port: u16) -> PeerEntry {
        PeerEntry {
            node_id: node_id.to_string(),
            ip: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Node ids whose first hex char picks the group.
    fn internal_id(n: u8) -> String {
        format!("a{n:031x}")
    }

    fn external_id(n: u8) -> String {
        format!("b{n:031x}")
    }

    #[test]
    fn learn_ignores_self_and_duplicates() {
        let id = identity();
        let mut overlay = Overlay::new(&id);
        assert!(!overlay.learn(peer(&id.node_id, 7001)));
        assert!(overlay.learn(peer(&internal_id(1), 7002)));
        assert!(!overlay.learn(peer(&internal_id(1), 7002)));
        assert_eq!(overlay.known_count(), 1);
    }

    #[test]
    fn caps_are_enforced_per_group() {
        let mut overlay = Overlay::new(&identity());
        for n in 0..MAX_INTERNAL_CONNECTIONS {
            assert!(overlay.activate(peer(&internal_id(n as u8), 7100 + n as u16)));
        }
        assert!(!overlay.activate(peer(&internal_id(9), 7199)));

        for n in 0..MAX_EXTERNAL_CONNECTIONS {
            assert!(overlay.activate(peer(&external_id(n as u8), 7200 + n as u16)));
        }
        assert!(!overlay.activate(peer(&external_id(9), 7299)));

        assert!(overlay.saturated());
        let counts = overlay.counts_by_group();
        assert_eq!(counts.internal, MAX_INTERNAL_CONNECTIONS);
        assert_eq!(counts.external, MAX_EXTERNAL_CONNECTIONS);
        assert_eq!(overlay.active_count(), 8);
    }

    #[test]
    fn one_saturated_cap_leaves_the_other_open() {
        let mut overlay = Overlay::new(&identity());
        for n in 0..MAX_INTERNAL_CONNECTIONS {
            overlay.activate(peer(&internal_id(n as u8), 7100 + n as u16));
        }
        assert!(!overlay.has_capacity('a'));
        assert!(overlay.has_capacity('b'));
        assert!(!overlay.saturated());
    }

    #[test]
    fn failure_counting_and_eviction() {
        let mut overlay = Overlay::new(&identity());
        let id = external_id(1);
        overlay.activate(peer(&id, 7200));

        assert_eq!(overlay.record_failure(&id), 1);
        assert_eq!(overlay.record_failure(&id), 2);
        overlay.touch(&id);
        assert_eq!(overlay.record_failure(&id), 1);

        assert_eq!(overlay.evict(&id), Some(GroupKind::External));
        assert!(!overlay.is_active(&id));
        assert_eq!(overlay.known_count(), 0);
        assert_eq!(overlay.evict(&id), None);
    }

    #[test]
    fn replacement_candidates_match_group_kind() {
        let mut overlay = Overlay::new(&identity());
        overlay.learn(peer(&internal_id(1), 7101));
        overlay.learn(peer(&external_id(1), 7201));
        overlay.activate(peer(&external_id(2), 7202));

        let internal = overlay.replacement_candidates(GroupKind::Internal);
        assert_eq!(internal.len(), 1);
        assert_eq!(internal[0].node_id, internal_id(1));

        // Active peers are not candidates.
        let external = overlay.replacement_candidates(GroupKind::External);
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].node_id, external_id(1));
    }

    #[test]
    fn cleanup_drops_stale_peers() {
        let mut overlay = Overlay::new(&identity());
        let fresh = internal_id(1);
        let stale = external_id(1);
        overlay.activate(peer(&fresh, 7101));
        overlay.activate(peer(&stale, 7201));
        overlay.backdate(&stale, PEER_TIMEOUT + Duration::from_secs(1));

        overlay.cleanup_stale();
        assert!(overlay.is_active(&fresh));
        assert!(!overlay.is_active(&stale));
    }

    #[test]
    fn exchange_targets_skip_exhausted_peers() {
        let mut overlay = Overlay::new(&identity());
        let good = internal_id(1);
        let bad = external_id(1);
        overlay.activate(peer(&good, 7101));
        overlay.activate(peer(&bad, 7201));
        for _ in 0..4 {
            overlay.record_failure(&bad);
        }

        let targets = overlay.exchange_targets(3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].node_id, good);
    }
}

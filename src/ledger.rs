//! Ledger of activity ids already uploaded to the fitness platform.
//!
//! The remote activity list is authoritative; a snapshot of it (plus ids
//! uploaded since) is cached in a [`KeyValueStore`] under a single key so
//! the list is only fetched once.
//!
//! All state lives behind one async mutex that is held across remote
//! fetches, so a `mark_synced` racing a fetch is applied after it instead
//! of being overwritten.

use std::collections::BTreeSet;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::providers::{ActivityListProvider, KeyValueStore};
use crate::SyncConfig;

/// Store key holding the serialized snapshot.
pub const LEDGER_KEY: &str = "cached_activity_ids";

/// Upper bound on remote pages fetched in one pass.
const MAX_PAGES: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerSnapshot {
    ids: BTreeSet<String>,
    /// Whether the remote list has been merged in at least once
    #[serde(default)]
    reconciled: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLedger {
    Snapshot(LedgerSnapshot),
    /// Bare id array written by older versions
    Legacy(Vec<String>),
}

#[derive(Debug, Default)]
struct LedgerState {
    loaded: bool,
    snapshot: LedgerSnapshot,
}

pub struct SyncLedger<S: KeyValueStore> {
    store: S,
    page_size: u32,
    state: Mutex<LedgerState>,
}

impl<S: KeyValueStore> SyncLedger<S> {
    pub fn new(store: S, config: &SyncConfig) -> Self {
        Self {
            store,
            page_size: config.remote_page_size.max(1),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// All ids known to be synced.
    ///
    /// The first call after load fetches the remote list and merges it with
    /// any locally marked ids. Remote failures fall back to the local set.
    /// When the store cannot be read the cache counts as empty: the remote
    /// list is returned (empty if that fails too) and nothing is cached, so
    /// the next call reads the store again.
    pub async fn synced_ids(&self, remote: &dyn ActivityListProvider) -> BTreeSet<String> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.ensure_loaded(&mut state) {
            error!("[Ledger] Failed to read synced ids, using remote list: {}", e);
            return match fetch_remote_ids(remote, self.page_size).await {
                Ok(remote_ids) => remote_ids,
                Err(e) => {
                    warn!("[Ledger] Remote activity list unavailable too: {}", e);
                    BTreeSet::new()
                }
            };
        }

        if !state.snapshot.reconciled {
            match fetch_remote_ids(remote, self.page_size).await {
                Ok(remote_ids) => {
                    let mut merged = state.snapshot.clone();
                    merged.ids.extend(remote_ids);
                    merged.reconciled = true;
                    info!(
                        "[Ledger] Reconciled with remote list: {} synced ids",
                        merged.ids.len()
                    );
                    if let Err(e) = self.persist(&merged) {
                        warn!("[Ledger] Could not persist reconciled ids: {}", e);
                    }
                    state.snapshot = merged;
                }
                Err(e) => {
                    warn!("[Ledger] Remote activity list unavailable, using local ids: {}", e);
                }
            }
        }

        state.snapshot.ids.clone()
    }

    pub async fn is_synced(&self, id: &str, remote: &dyn ActivityListProvider) -> bool {
        self.synced_ids(remote).await.contains(id)
    }

    /// Replace the cache with the current remote list.
    ///
    /// Errors propagate and leave the cache as it was.
    pub async fn refresh(&self, remote: &dyn ActivityListProvider) -> Result<BTreeSet<String>> {
        let mut state = self.state.lock().await;
        let ids = fetch_remote_ids(remote, self.page_size).await?;

        let snapshot = LedgerSnapshot { ids, reconciled: true };
        self.persist(&snapshot)?;
        info!("[Ledger] Refreshed from remote: {} synced ids", snapshot.ids.len());

        state.snapshot = snapshot;
        state.loaded = true;
        Ok(state.snapshot.ids.clone())
    }

    /// Record a successful upload. On error the ledger is unchanged.
    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state)?;
        if state.snapshot.ids.contains(id) {
            return Ok(());
        }

        let mut updated = state.snapshot.clone();
        updated.ids.insert(id.to_string());
        self.persist(&updated)?;
        state.snapshot = updated;

        debug!("[Ledger] Marked '{}' as synced", id);
        Ok(())
    }

    /// Forget everything, in memory and on disk.
    pub async fn invalidate(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store.delete(LEDGER_KEY)?;
        *state = LedgerState::default();
        info!("[Ledger] Invalidated");
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut LedgerState) -> Result<()> {
        if state.loaded {
            return Ok(());
        }

        state.snapshot = match self.store.get(LEDGER_KEY)? {
            None => LedgerSnapshot::default(),
            Some(bytes) => match serde_json::from_slice::<StoredLedger>(&bytes) {
                Ok(StoredLedger::Snapshot(snapshot)) => snapshot,
                Ok(StoredLedger::Legacy(ids)) => LedgerSnapshot {
                    reconciled: !ids.is_empty(),
                    ids: ids.into_iter().collect(),
                },
                Err(e) => {
                    warn!("[Ledger] Discarding unreadable cache: {}", e);
                    LedgerSnapshot::default()
                }
            },
        };
        state.loaded = true;
        debug!("[Ledger] Loaded {} cached ids", state.snapshot.ids.len());
        Ok(())
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| SyncError::persistence(e.to_string()))?;
        self.store.set(LEDGER_KEY, &bytes)
    }
}

/// Every `external_id` in the remote list, with `.gpx` suffixes stripped.
async fn fetch_remote_ids(remote: &dyn ActivityListProvider, per_page: u32) -> Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();

    for page in 1..=MAX_PAGES {
        let activities = remote.list_activities(page, per_page).await?;
        let count = activities.len();
        ids.extend(
            activities
                .into_iter()
                .filter_map(|a| a.external_id)
                .filter_map(|id| normalize_external_id(&id)),
        );
        if count < per_page as usize {
            debug!("[Ledger] Fetched {} remote pages", page);
            return Ok(ids);
        }
    }

    warn!("[Ledger] Stopped after {} remote pages", MAX_PAGES);
    Ok(ids)
}

fn normalize_external_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let id = trimmed.strip_suffix(".gpx").unwrap_or(trimmed);
    (!id.is_empty()).then(|| id.to_string())
}

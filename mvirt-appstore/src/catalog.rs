//! Catalog merge engine.
//!
//! [`Catalog::add`] is the only way installer records change. It merges a
//! single `(name, version, metadata)` observation into the stored record:
//!
//! - unknown name: a new installer is inserted
//! - unknown version: the version is added
//! - known version, different metadata: the version entry is replaced
//! - known version, identical metadata: nothing is written
//!
//! Calls for the same name are serialized in-process. Across processes the
//! store's unique name constraint decides: a lost insert race is retried as a
//! merge into the record that won.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, CatalogOp, Result, StoreError};
use crate::installer::{Installer, InstallerKey, InstallerMetadata, derive_id};
use crate::store::CatalogStore;

/// What [`Catalog::add`] did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First version of a new installer.
    Created,
    /// New version added to an existing installer.
    VersionAdded,
    /// Existing version's metadata replaced.
    VersionReplaced,
    /// Identical metadata already stored.
    Unchanged,
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddOutcome::Created => write!(f, "created"),
            AddOutcome::VersionAdded => write!(f, "version added"),
            AddOutcome::VersionReplaced => write!(f, "version replaced"),
            AddOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

type NameLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    name_locks: NameLocks,
}

/// Claim on the per-name lock. Removes the map entry on drop once no other
/// claim for the name remains, including when `add` is cancelled.
struct NameLease<'a> {
    locks: &'a NameLocks,
    name: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for NameLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference is held by the map, one by this lease.
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.name);
        }
    }
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            name_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    /// Merge one version observation into the catalog.
    pub async fn add(
        &self,
        name: &str,
        version: &str,
        metadata: InstallerMetadata,
    ) -> Result<AddOutcome> {
        let lease = self.lease_name(name);
        let result = {
            let _guard = lease.lock.lock().await;
            match self.merge(name, version, &metadata).await {
                Err(CatalogError::Store {
                    op: CatalogOp::Insert,
                    source: StoreError::Conflict(_),
                    ..
                }) => {
                    warn!(name = %name, version = %version, "Installer was inserted concurrently, merging");
                    self.merge(name, version, &metadata).await
                }
                other => other,
            }
        };
        drop(lease);

        if let Ok(outcome) = &result {
            info!(name = %name, version = %version, outcome = %outcome, "Installer saved");
        }
        result
    }

    async fn merge(
        &self,
        name: &str,
        version: &str,
        metadata: &InstallerMetadata,
    ) -> Result<AddOutcome> {
        let existing = self
            .store
            .get(InstallerKey::Name(name))
            .await
            .map_err(|e| CatalogError::store(CatalogOp::Lookup, name, e))?;

        let Some(mut installer) = existing else {
            let installer = Installer::new(name, version, metadata.clone());
            self.store
                .insert(&installer)
                .await
                .map_err(|e| CatalogError::store(CatalogOp::Insert, name, e))?;
            return Ok(AddOutcome::Created);
        };

        let outcome = match installer.versions.get(version) {
            Some(stored) if stored == metadata => AddOutcome::Unchanged,
            Some(_) => AddOutcome::VersionReplaced,
            None => AddOutcome::VersionAdded,
        };

        let stale_id = installer.id.clone();
        let id_migrated = installer.migrate_id();
        if id_migrated {
            info!(name = %name, old_id = %stale_id, new_id = %installer.id, "Migrating installer ID");
        }

        if outcome == AddOutcome::Unchanged && !id_migrated {
            debug!(name = %name, version = %version, "Installer version unchanged, skipping write");
            return Ok(outcome);
        }

        installer
            .versions
            .insert(version.to_string(), metadata.clone());
        self.store
            .update(&installer)
            .await
            .map_err(|e| CatalogError::store(CatalogOp::Update, name, e))?;

        Ok(outcome)
    }

    fn lease_name(&self, name: &str) -> NameLease<'_> {
        let mut locks = self.name_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(name.to_string()).or_default());
        NameLease {
            locks: &self.name_locks,
            name: name.to_string(),
            lock,
        }
    }

    /// Get one installer, with its ID normalized.
    ///
    /// An ID that misses the stored column is matched against the IDs derived
    /// from installer names, so records not yet migrated are still found.
    pub async fn get(&self, key: InstallerKey<'_>) -> Result<Option<Installer>> {
        let lookup_error = |e| CatalogError::store(CatalogOp::Lookup, key.to_string(), e);
        let mut installer = self.store.get(key).await.map_err(lookup_error)?;

        if let (true, InstallerKey::Id(id)) = (installer.is_none(), key) {
            installer = self
                .store
                .list()
                .await
                .map_err(lookup_error)?
                .into_iter()
                .find(|installer| derive_id(&installer.name) == id);
            if installer.is_some() {
                debug!(id = %id, "Installer found by derived ID");
            }
        }

        Ok(installer.map(|mut installer| {
            installer.migrate_id();
            installer
        }))
    }

    /// All installers, with normalized IDs.
    pub async fn list(&self) -> Result<Vec<Installer>> {
        let mut installers = self
            .store
            .list()
            .await
            .map_err(|e| CatalogError::store(CatalogOp::List, "*", e))?;
        for installer in &mut installers {
            installer.migrate_id();
        }
        Ok(installers)
    }
}

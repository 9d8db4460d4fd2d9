//! Incident persistence
//!
//! Active incidents are committed with optimistic concurrency: a writer
//! names the version it started from and the store refuses the write if the
//! record moved on. Closed incidents move to an archive with a TTL and stay
//! readable through [`IncidentStore::load`].

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use reroute_model::{Incident, IncidentId};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Durable home of incident records
#[async_trait]
pub trait IncidentStore: Send + Sync + Debug {
    /// Store a new record
    async fn insert(&self, incident: &Incident) -> Result<(), StoreError>;

    /// Current record, active or archived
    async fn load(&self, id: IncidentId) -> Result<Incident, StoreError>;

    /// Replace the record if it is still at `expected_version`
    ///
    /// Returns the stored record with its version bumped.
    async fn commit(&self, incident: Incident, expected_version: u64)
        -> Result<Incident, StoreError>;

    /// Move a record to the archive
    async fn archive(&self, id: IncidentId) -> Result<(), StoreError>;

    /// Ids of active records, oldest first
    async fn list_active(&self) -> Result<Vec<IncidentId>, StoreError>;
}

/// Process-local store
#[derive(Debug, Clone)]
pub struct InMemoryIncidentStore {
    active: Arc<DashMap<IncidentId, Incident>>,
    archived: Cache<IncidentId, Arc<Incident>>,
}

impl Default for InMemoryIncidentStore {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(86_400))
    }
}

impl InMemoryIncidentStore {
    /// Create a store whose archive keeps up to `archive_capacity` records
    /// for `archive_ttl`
    #[must_use]
    pub fn new(archive_capacity: u64, archive_ttl: Duration) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            archived: Cache::builder()
                .max_capacity(archive_capacity)
                .time_to_live(archive_ttl)
                .build(),
        }
    }

    /// Number of active records
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn insert(&self, incident: &Incident) -> Result<(), StoreError> {
        match self.active.entry(incident.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(incident.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(incident.clone());
                Ok(())
            }
        }
    }

    async fn load(&self, id: IncidentId) -> Result<Incident, StoreError> {
        let active = self.active.get(&id).map(|r| r.value().clone());
        if let Some(incident) = active {
            return Ok(incident);
        }
        self.archived
            .get(&id)
            .await
            .map(|a| a.as_ref().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn commit(
        &self,
        mut incident: Incident,
        expected_version: u64,
    ) -> Result<Incident, StoreError> {
        let id = incident.id;
        let mut slot = self.active.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if slot.version != expected_version {
            return Err(StoreError::Conflict {
                id,
                expected: expected_version,
                found: slot.version,
            });
        }
        incident.version = expected_version + 1;
        *slot = incident.clone();
        Ok(incident)
    }

    async fn archive(&self, id: IncidentId) -> Result<(), StoreError> {
        let (_, incident) = self.active.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.archived.insert(id, Arc::new(incident)).await;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<IncidentId>, StoreError> {
        let mut ids: Vec<IncidentId> = self.active.iter().map(|r| *r.key()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use reroute_model::{Alert, IncidentState};

    fn incident() -> Incident {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Incident::open(IncidentId::new(), &Alert::raise("a-1", "L1", "R1", "R2", at), at)
    }

    #[tokio::test]
    async fn commit_bumps_version() {
        let store = InMemoryIncidentStore::default();
        let mut record = incident();
        store.insert(&record).await.unwrap();

        record.state = IncidentState::Assessing;
        let stored = store.commit(record, 0).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.load(stored.id).await.unwrap().state, IncidentState::Assessing);
    }

    #[tokio::test]
    async fn stale_commit_conflicts() {
        let store = InMemoryIncidentStore::default();
        let record = incident();
        store.insert(&record).await.unwrap();
        store.commit(record.clone(), 0).await.unwrap();

        let err = store.commit(record.clone(), 0).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                id: record.id,
                expected: 0,
                found: 1
            }
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let store = InMemoryIncidentStore::default();
        let record = incident();
        store.insert(&record).await.unwrap();
        assert_eq!(
            store.insert(&record).await,
            Err(StoreError::AlreadyExists(record.id))
        );
    }

    #[tokio::test]
    async fn archived_records_stay_readable() {
        let store = InMemoryIncidentStore::default();
        let record = incident();
        store.insert(&record).await.unwrap();
        store.archive(record.id).await.unwrap();

        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.load(record.id).await.unwrap().id, record.id);
        assert!(matches!(
            store.commit(record.clone(), 0).await,
            Err(StoreError::NotFound(_))
        ));
    }
}

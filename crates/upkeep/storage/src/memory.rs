//! In-memory reference implementation of the Upkeep storage traits.
//!
//! Deterministic and test-friendly. A single lock over all tables makes the
//! transition commit genuinely atomic; production deployments should use a
//! transactional backend instead.

use crate::traits::{
    HistoryStore, PrincipalDirectory, RequestStore, StatusChangeStore, TransitionStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use upkeep_types::{
    HistoryEntry, Principal, PrincipalId, Request, RequestId, StatusChangeId, StatusChangeRequest,
};

#[derive(Default)]
struct Tables {
    requests: HashMap<RequestId, Request>,
    status_changes: HashMap<StatusChangeId, StatusChangeRequest>,
    principals: HashMap<PrincipalId, Principal>,
    history: Vec<HistoryEntry>,
}

/// In-memory Upkeep storage adapter.
#[derive(Default)]
pub struct InMemoryUpkeepStore {
    tables: RwLock<Tables>,
}

impl InMemoryUpkeepStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StorageError::Backend("storage lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StorageError::Backend("storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl RequestStore for InMemoryUpkeepStore {
    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<Request>> {
        let guard = self.read()?;
        Ok(guard.requests.get(id).cloned())
    }

    async fn list_requests(&self) -> StorageResult<Vec<Request>> {
        let guard = self.read()?;
        let mut values = guard.requests.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.urgent
                .cmp(&a.urgent)
                .then_with(|| b.opened_at.cmp(&a.opened_at))
        });
        Ok(values)
    }
}

#[async_trait]
impl StatusChangeStore for InMemoryUpkeepStore {
    async fn get_status_change(
        &self,
        id: &StatusChangeId,
    ) -> StorageResult<Option<StatusChangeRequest>> {
        let guard = self.read()?;
        Ok(guard.status_changes.get(id).cloned())
    }

    async fn pending_status_change(
        &self,
        request_id: &RequestId,
    ) -> StorageResult<Option<StatusChangeRequest>> {
        let guard = self.read()?;
        Ok(guard
            .status_changes
            .values()
            .find(|change| change.request_id == *request_id && change.is_pending())
            .cloned())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryUpkeepStore {
    async fn get_principal(&self, id: &PrincipalId) -> StorageResult<Option<Principal>> {
        let guard = self.read()?;
        Ok(guard.principals.get(id).cloned())
    }

    async fn list_principals(&self) -> StorageResult<Vec<Principal>> {
        let guard = self.read()?;
        let mut values = guard.principals.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(values)
    }

    async fn upsert_principal(&self, principal: Principal) -> StorageResult<()> {
        let mut guard = self.write()?;
        guard.principals.insert(principal.id.clone(), principal);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryUpkeepStore {
    async fn append_history(&self, entry: HistoryEntry) -> StorageResult<()> {
        let mut guard = self.write()?;
        guard.history.push(entry);
        Ok(())
    }

    async fn history_for_request(
        &self,
        request_id: &RequestId,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let guard = self.read()?;
        let mut entries = guard
            .history
            .iter()
            .filter(|entry| entry.request_id == *request_id)
            .cloned()
            .collect::<Vec<_>>();
        entries.reverse(); // append order -> newest first
        Ok(entries)
    }
}

#[async_trait]
impl TransitionStore for InMemoryUpkeepStore {
    async fn commit_creation(
        &self,
        request: Request,
        history: HistoryEntry,
    ) -> StorageResult<()> {
        if history.request_id != request.id {
            return Err(StorageError::InvalidInput(
                "history entry does not document this request".to_string(),
            ));
        }

        let mut guard = self.write()?;
        if guard.requests.contains_key(&request.id) {
            return Err(StorageError::Conflict(format!(
                "request {} already exists",
                request.id
            )));
        }
        guard.requests.insert(request.id.clone(), request);
        guard.history.push(history);
        Ok(())
    }

    async fn commit_transition(
        &self,
        mut request: Request,
        expected_version: u64,
        status_change: Option<StatusChangeRequest>,
        history: HistoryEntry,
    ) -> StorageResult<()> {
        if history.request_id != request.id {
            return Err(StorageError::InvalidInput(
                "history entry does not document this request".to_string(),
            ));
        }
        if let Some(change) = &status_change {
            if change.request_id != request.id {
                return Err(StorageError::InvalidInput(
                    "status-change request does not belong to this request".to_string(),
                ));
            }
        }

        let mut guard = self.write()?;

        let stored = guard.requests.get(&request.id).ok_or_else(|| {
            StorageError::NotFound(format!("request {} not found", request.id))
        })?;
        if stored.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "request {} was modified concurrently (expected version {}, found {})",
                request.id, expected_version, stored.version
            )));
        }

        // At most one unresolved status-change request per request.
        if let Some(change) = &status_change {
            if change.is_pending() {
                let duplicate = guard.status_changes.values().any(|existing| {
                    existing.request_id == request.id
                        && existing.is_pending()
                        && existing.id != change.id
                });
                if duplicate {
                    return Err(StorageError::Conflict(format!(
                        "request {} already has a pending status-change request",
                        request.id
                    )));
                }
            }
        }

        request.version = expected_version + 1;
        guard.requests.insert(request.id.clone(), request);
        if let Some(change) = status_change {
            guard.status_changes.insert(change.id.clone(), change);
        }
        guard.history.push(history);
        Ok(())
    }

    async fn delete_request(&self, request_id: &RequestId) -> StorageResult<()> {
        let mut guard = self.write()?;
        if guard.requests.remove(request_id).is_none() {
            return Err(StorageError::NotFound(format!(
                "request {request_id} not found"
            )));
        }
        guard
            .status_changes
            .retain(|_, change| change.request_id != *request_id);
        guard.history.retain(|entry| entry.request_id != *request_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use upkeep_types::{Building, HistoryAction, HistoryEntryId, RequestStatus};

    fn entry_for(request: &Request, action: HistoryAction) -> HistoryEntry {
        HistoryEntry {
            id: HistoryEntryId::generate(),
            request_id: request.id.clone(),
            action,
            performed_by: Some(PrincipalId::new("actor")),
            old_status: None,
            new_status: Some(request.status),
            details: None,
            created_at: Utc::now(),
        }
    }

    async fn stored_request(store: &InMemoryUpkeepStore) -> Request {
        let request = Request::new("cracked window", Building::new("north"));
        store
            .commit_creation(request.clone(), entry_for(&request, HistoryAction::Created))
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn stale_version_commit_is_a_conflict_and_writes_nothing() {
        let store = InMemoryUpkeepStore::new();
        let request = Request::new("cracked window", Building::new("north"));
        store
            .commit_creation(request.clone(), entry_for(&request, HistoryAction::Created))
            .await
            .unwrap();

        let mut first = request.clone();
        first.status = RequestStatus::PendingApproval;
        store
            .commit_transition(
                first,
                0,
                None,
                entry_for(&request, HistoryAction::StatusChangeRequested),
            )
            .await
            .unwrap();

        // Second writer still holds version 0.
        let mut second = request.clone();
        second.urgent = true;
        let result = store
            .commit_transition(
                second,
                0,
                None,
                entry_for(&request, HistoryAction::Updated),
            )
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        let stored = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(!stored.urgent, "losing commit wrote nothing");
        assert_eq!(
            store.history_for_request(&request.id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn second_pending_status_change_is_rejected() {
        let store = InMemoryUpkeepStore::new();
        let request = stored_request(&store).await;

        let first = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Postponed,
        )
        .with_reason("waiting on parts");
        store
            .commit_transition(
                request.clone(),
                0,
                Some(first),
                entry_for(&request, HistoryAction::StatusChangeRequested),
            )
            .await
            .unwrap();

        let second = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Postponed,
        )
        .with_reason("still waiting");
        let result = store
            .commit_transition(
                request.clone(),
                1,
                Some(second),
                entry_for(&request, HistoryAction::StatusChangeRequested),
            )
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn duplicate_creation_is_a_conflict() {
        let store = InMemoryUpkeepStore::new();
        let request = stored_request(&store).await;
        let result = store
            .commit_creation(request.clone(), entry_for(&request, HistoryAction::Created))
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn history_reads_newest_first() {
        let store = InMemoryUpkeepStore::new();
        let request = stored_request(&store).await;
        store
            .append_history(entry_for(&request, HistoryAction::Updated))
            .await
            .unwrap();

        let entries = store.history_for_request(&request.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, HistoryAction::Updated);
        assert_eq!(entries[1].action, HistoryAction::Created);
    }

    #[tokio::test]
    async fn deletion_cascades_to_changes_and_history() {
        let store = InMemoryUpkeepStore::new();
        let request = stored_request(&store).await;
        let change = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Postponed,
        )
        .with_reason("waiting on parts");
        store
            .commit_transition(
                request.clone(),
                0,
                Some(change.clone()),
                entry_for(&request, HistoryAction::StatusChangeRequested),
            )
            .await
            .unwrap();

        store.delete_request(&request.id).await.unwrap();

        assert!(store.get_request(&request.id).await.unwrap().is_none());
        assert!(store.get_status_change(&change.id).await.unwrap().is_none());
        assert!(store
            .history_for_request(&request.id)
            .await
            .unwrap()
            .is_empty());

        let missing = store.delete_request(&request.id).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn urgent_requests_list_first() {
        let store = InMemoryUpkeepStore::new();
        let calm = stored_request(&store).await;
        let urgent = Request::new("burst pipe", Building::new("north")).with_urgent(true);
        store
            .commit_creation(urgent.clone(), entry_for(&urgent, HistoryAction::Created))
            .await
            .unwrap();

        let listed = store.list_requests().await.unwrap();
        assert_eq!(listed[0].id, urgent.id);
        assert_eq!(listed[1].id, calm.id);
    }
}

use crate::StorageResult;
use async_trait::async_trait;
use upkeep_types::{
    HistoryEntry, Principal, PrincipalId, Request, RequestId, StatusChangeId, StatusChangeRequest,
};

/// Read access to requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Get one request by id.
    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<Request>>;

    /// List all requests, urgent first, then newest first.
    async fn list_requests(&self) -> StorageResult<Vec<Request>>;
}

/// Read access to status-change requests.
#[async_trait]
pub trait StatusChangeStore: Send + Sync {
    /// Get one status-change request by id.
    async fn get_status_change(
        &self,
        id: &StatusChangeId,
    ) -> StorageResult<Option<StatusChangeRequest>>;

    /// The unresolved status-change request for a request, if any.
    /// The commit surface guarantees at most one exists.
    async fn pending_status_change(
        &self,
        request_id: &RequestId,
    ) -> StorageResult<Option<StatusChangeRequest>>;
}

/// The principal read model consulted by authorization callers and the
/// notification targeting rules.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn get_principal(&self, id: &PrincipalId) -> StorageResult<Option<Principal>>;
    async fn list_principals(&self) -> StorageResult<Vec<Principal>>;
    async fn upsert_principal(&self, principal: Principal) -> StorageResult<()>;
}

/// Append-only history. There is deliberately no update or delete surface.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one entry.
    async fn append_history(&self, entry: HistoryEntry) -> StorageResult<()>;

    /// Read a request's entries newest-first.
    async fn history_for_request(
        &self,
        request_id: &RequestId,
    ) -> StorageResult<Vec<HistoryEntry>>;
}

/// The transactional boundary: a request mutation and its audit entry are
/// committed together or not at all.
#[async_trait]
pub trait TransitionStore: Send + Sync {
    /// Insert a brand-new request together with its first history entry.
    async fn commit_creation(&self, request: Request, history: HistoryEntry)
        -> StorageResult<()>;

    /// Persist a mutated request, an optional new or resolved status-change
    /// request, and the history entry atomically.
    ///
    /// Fails with a conflict when the stored request's version no longer
    /// matches `expected_version` (a concurrent transition won), or when
    /// `status_change` is a second pending change for the same request.
    /// On failure nothing is written.
    async fn commit_transition(
        &self,
        request: Request,
        expected_version: u64,
        status_change: Option<StatusChangeRequest>,
        history: HistoryEntry,
    ) -> StorageResult<()>;

    /// Remove a request together with its status-change requests and
    /// history entries. History shares the request's lifetime, so the
    /// cascade is total. Fails with not-found when the request is absent.
    async fn delete_request(&self, request_id: &RequestId) -> StorageResult<()>;
}

/// Unified storage bundle used by the orchestrator.
pub trait UpkeepStore:
    RequestStore + StatusChangeStore + PrincipalDirectory + HistoryStore + TransitionStore + Send + Sync
{
}

impl<T> UpkeepStore for T where
    T: RequestStore
        + StatusChangeStore
        + PrincipalDirectory
        + HistoryStore
        + TransitionStore
        + Send
        + Sync
{
}

//! Upkeep Ledger - the append-only audit trail
//!
//! Builds history entries out of applied transitions and reads them back,
//! newest first. Entries reach storage only inside the atomic commit of the
//! transition they document; once written they are immutable, and neither
//! this crate nor the store it wraps offers an update surface.

#![deny(unsafe_code)]

use chrono::Utc;
use std::sync::Arc;
use upkeep_lifecycle::Applied;
use upkeep_storage::HistoryStore;
use upkeep_types::{
    HistoryEntry, HistoryEntryId, PrincipalId, Request, RequestId, UpkeepResult,
};

/// Build the single history entry documenting an applied transition.
///
/// `actor` is `None` only for anonymous intake, which happens before any
/// principal exists.
pub fn entry_for(request: &Request, applied: &Applied, actor: Option<PrincipalId>) -> HistoryEntry {
    HistoryEntry {
        id: HistoryEntryId::generate(),
        request_id: request.id.clone(),
        action: applied.action,
        performed_by: actor,
        old_status: applied.old_status,
        new_status: Some(applied.new_status),
        details: Some(applied.detail.clone()),
        created_at: Utc::now(),
    }
}

/// Read facade over the history store. Every entry reaches storage through
/// a creation or transition commit; this side only builds and reads them.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn HistoryStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// All entries for a request, newest first.
    pub async fn for_request(&self, request_id: &RequestId) -> UpkeepResult<Vec<HistoryEntry>> {
        Ok(self.store.history_for_request(request_id).await?)
    }
}

//! Upkeep Types - the maintenance request domain model
//!
//! Everything else in the workspace is built on these types: principals and
//! the (building, department) scopes they are confined to, requests and their
//! lifecycle status, status-change requests with their review outcome, and
//! the append-only history entries that document every transition.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for an authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a maintenance request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a status-change request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusChangeId(pub String);

impl StatusChangeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for StatusChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a history entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

impl HistoryEntryId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for HistoryEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reference into the opaque blob store (photo attachments).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef(pub String);

impl AttachmentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }
}

impl std::fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Principal & Scope Model ──────────────────────────────────────────

/// Closed set of roles. The authorization engine branches on nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Unrestricted: every action, every scope.
    Admin,
    /// Manages requests and users within one building.
    Head,
    /// Creates and works requests within building + department.
    Specialist,
    /// Works requests within building + department; may only originate
    /// status-change requests, never raw requests or direct status edits.
    Executor,
}

/// A building (site) a principal or request belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Building(pub String);

impl Building {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for Building {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A department within a building (e.g. IT, maintenance).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Department(pub String);

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (building, department) pair an action targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub building: Building,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
}

impl Scope {
    pub fn building(building: Building) -> Self {
        Self {
            building,
            department: None,
        }
    }

    pub fn with_department(mut self, department: Department) -> Self {
        self.department = Some(department);
        self
    }
}

/// An authenticated actor as produced by the identity provider.
///
/// Head, Specialist and Executor principals normally carry a building;
/// Specialist and Executor may carry a department that further restricts
/// what they can see and touch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<Building>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
}

impl Principal {
    pub fn new(id: PrincipalId, role: Role) -> Self {
        Self {
            id,
            role,
            building: None,
            department: None,
        }
    }

    pub fn with_building(mut self, building: Building) -> Self {
        self.building = Some(building);
        self
    }

    pub fn with_department(mut self, department: Department) -> Self {
        self.department = Some(department);
        self
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// Lifecycle states of a maintenance request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Anonymous intake awaiting approval by a Head or Admin.
    PendingCreationApproval,
    /// Open and workable.
    Created,
    /// A status-change request is awaiting review.
    PendingApproval,
    /// Closed as done.
    Completed,
    /// Closed as deferred; can return to work.
    Postponed,
}

impl RequestStatus {
    /// True for the two closed states. `closed_at`/`closed_by` are set iff
    /// the request is in one of these.
    pub fn is_closed(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Postponed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestStatus::PendingCreationApproval => "pending_creation_approval",
            RequestStatus::Created => "created",
            RequestStatus::PendingApproval => "pending_approval",
            RequestStatus::Completed => "completed",
            RequestStatus::Postponed => "postponed",
        };
        write!(f, "{name}")
    }
}

/// A maintenance request.
///
/// Invariant: `closed_at.is_some() == status.is_closed()` and
/// `closed_by.is_some() == closed_at.is_some()`. The lifecycle crate is the
/// only writer of `status` and the closure fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub status: RequestStatus,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub building: Building,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    pub urgent: bool,
    pub anonymous: bool,
    /// Absent only while the request is anonymous and unapproved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_by: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<PrincipalId>,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Ordered photo attachment references.
    pub attachments: Vec<AttachmentRef>,
    /// Optimistic concurrency token; bumped on every committed transition.
    pub version: u64,
}

impl Request {
    /// Create a draft request. The lifecycle crate decides its initial
    /// status (`Created` for direct creation, `PendingCreationApproval`
    /// for anonymous intake).
    pub fn new(title: impl Into<String>, building: Building) -> Self {
        Self {
            id: RequestId::generate(),
            status: RequestStatus::Created,
            title: title.into(),
            description: None,
            building,
            department: None,
            urgent: false,
            anonymous: false,
            opened_by: None,
            closed_by: None,
            opened_at: Utc::now(),
            closed_at: None,
            attachments: Vec::new(),
            version: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_department(mut self, department: Department) -> Self {
        self.department = Some(department);
        self
    }

    pub fn with_urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    /// The scope this request lives in.
    pub fn scope(&self) -> Scope {
        Scope {
            building: self.building.clone(),
            department: self.department.clone(),
        }
    }

    /// True when the closure-field invariant holds.
    pub fn closure_consistent(&self) -> bool {
        self.closed_at.is_some() == self.status.is_closed()
            && self.closed_by.is_some() == self.closed_at.is_some()
    }
}

// ── Status-Change Request ────────────────────────────────────────────

/// The recorded outcome of reviewing a status-change request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewed_by: PrincipalId,
    pub reviewed_at: DateTime<Utc>,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_photo: Option<AttachmentRef>,
}

/// A Specialist/Executor's request to move a request to Completed or
/// Postponed, resolved exactly once by a Head or Admin.
///
/// `review == None` means pending. At most one pending status-change
/// request may exist per request; while one is pending the parent request
/// sits in `PendingApproval`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub id: StatusChangeId,
    pub request_id: RequestId,
    pub requested_by: PrincipalId,
    /// Only `Completed` or `Postponed` are ever accepted here.
    pub requested_status: RequestStatus,
    /// Required evidence when requesting `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<AttachmentRef>,
    /// Required evidence when requesting `Postponed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<Review>,
}

impl StatusChangeRequest {
    pub fn new(
        request_id: RequestId,
        requested_by: PrincipalId,
        requested_status: RequestStatus,
    ) -> Self {
        Self {
            id: StatusChangeId::generate(),
            request_id,
            requested_by,
            requested_status,
            photo: None,
            reason: None,
            created_at: Utc::now(),
            review: None,
        }
    }

    pub fn with_photo(mut self, photo: AttachmentRef) -> Self {
        self.photo = Some(photo);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.review.is_none()
    }
}

// ── History ──────────────────────────────────────────────────────────

/// Action tags for the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    Created,
    AnonymousSubmitted,
    AnonymousApproved,
    StatusChangeRequested,
    StatusChangeApproved,
    StatusChangeRejected,
    StatusChanged,
    ReturnedToWork,
    Updated,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::AnonymousSubmitted => "anonymous_submitted",
            HistoryAction::AnonymousApproved => "anonymous_approved",
            HistoryAction::StatusChangeRequested => "status_change_requested",
            HistoryAction::StatusChangeApproved => "status_change_approved",
            HistoryAction::StatusChangeRejected => "status_change_rejected",
            HistoryAction::StatusChanged => "status_changed",
            HistoryAction::ReturnedToWork => "returned_to_work",
            HistoryAction::Updated => "updated",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable audit record, appended for every committed transition and
/// never mutated or deleted afterwards. Owned by the request it documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub request_id: RequestId,
    pub action: HistoryAction,
    /// `None` only for anonymous intake, where no principal exists yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Error taxonomy ───────────────────────────────────────────────────

/// Result alias used across the workspace.
pub type UpkeepResult<T> = Result<T, UpkeepError>;

/// The error taxonomy every operation surfaces synchronously.
///
/// Nothing is swallowed except notifier delivery failures, which are logged
/// by the dispatcher and otherwise ignored.
#[derive(Debug, Error)]
pub enum UpkeepError {
    /// Authorization rule failed: role or scope mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or malformed required input (e.g. evidence for a
    /// status-change request).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate pending status-change request, re-review of a resolved
    /// one, or a violated transition guard.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Request, status-change request, or attachment absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A principal is missing a required attribute (e.g. a Specialist
    /// without a department).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

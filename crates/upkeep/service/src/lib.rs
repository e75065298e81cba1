//! Upkeep Service - the orchestrator
//!
//! Every operation runs the same sequence: authorize, drive the lifecycle
//! state machine, commit the mutation together with its audit entry, then
//! hand notification targeting and dispatch off the critical path. The
//! commit is atomic and version-guarded; a concurrent transition on the
//! same request loses with a conflict. Notification failures are logged
//! and never reach the caller.

#![deny(unsafe_code)]

use chrono::Utc;
use std::sync::Arc;
use upkeep_authz::{authorize, visible_to, Action};
use upkeep_ledger::{entry_for, AuditTrail};
use upkeep_lifecycle as lifecycle;
use upkeep_notify::{payload_for, targets, DispatchConfig, Dispatcher, Notifier, RequestEvent};
use upkeep_storage::{HistoryStore, UpkeepStore};
use upkeep_types::{
    AttachmentRef, Building, Department, HistoryAction, HistoryEntry, HistoryEntryId, Principal,
    PrincipalId, Request, RequestId, RequestStatus, Role, Scope, StatusChangeId,
    StatusChangeRequest, UpkeepError, UpkeepResult,
};

// ── Operation parameters ─────────────────────────────────────────────

/// Parameters for direct request creation.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub title: String,
    pub description: Option<String>,
    pub building: Building,
    pub department: Option<Department>,
    pub urgent: bool,
}

/// Parameters for anonymous intake. No principal is involved.
#[derive(Clone, Debug)]
pub struct NewAnonymousRequest {
    pub title: String,
    pub description: Option<String>,
    pub building: Building,
    pub department: Option<Department>,
    pub urgent: bool,
}

/// Supporting evidence accompanying a status-change request.
#[derive(Clone, Debug, Default)]
pub struct Evidence {
    pub photo: Option<AttachmentRef>,
    pub reason: Option<String>,
}

/// A reviewer's decision on a pending status-change request.
#[derive(Clone, Debug)]
pub enum ReviewVerdict {
    Approve,
    Reject {
        reason: Option<String>,
        photo: Option<AttachmentRef>,
    },
}

/// Partial update of a request's descriptive fields. `None` leaves the
/// field untouched.
#[derive(Clone, Debug, Default)]
pub struct RequestUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub building: Option<Building>,
    pub department: Option<Department>,
    pub urgent: Option<bool>,
}

/// The read model returned to callers: the request, its full history
/// (newest first), and the pending status-change request if one exists.
#[derive(Clone, Debug)]
pub struct RequestView {
    pub request: Request,
    pub history: Vec<HistoryEntry>,
    pub pending_change: Option<StatusChangeRequest>,
}

// ── Service ──────────────────────────────────────────────────────────

/// The composition root. Owns the store, the audit trail and the
/// notification dispatcher; exposes one method per operation.
#[derive(Clone)]
pub struct UpkeepService {
    store: Arc<dyn UpkeepStore>,
    audit: AuditTrail,
    dispatcher: Dispatcher,
}

impl UpkeepService {
    pub fn new<S: UpkeepStore + 'static>(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        let audit = AuditTrail::new(store.clone() as Arc<dyn HistoryStore>);
        Self {
            store,
            audit,
            dispatcher: Dispatcher::new(notifier, config),
        }
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Open a request directly. The effective scope comes from the grant:
    /// a Specialist's creation is narrowed into their own department.
    pub async fn create_request(
        &self,
        principal: &Principal,
        params: NewRequest,
    ) -> UpkeepResult<Request> {
        let scope = Scope {
            building: params.building.clone(),
            department: params.department.clone(),
        };
        let grant = authorize(principal, Action::CreateRequest, &scope)?;

        let mut request = Request::new(params.title, grant.scope.building)
            .with_urgent(params.urgent);
        request.description = params.description;
        request.department = grant.scope.department;

        let applied = lifecycle::create_direct(&mut request, principal);
        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store.commit_creation(request.clone(), entry).await?;

        tracing::info!(request_id = %request.id, actor = %principal.id, "request created");
        self.notify(
            RequestEvent::Created {
                actor: Some(principal.id.clone()),
            },
            &request,
        )
        .await;
        Ok(request)
    }

    /// Anonymous intake: no principal, no authorization, no notification.
    /// The request waits in `PendingCreationApproval`.
    pub async fn create_anonymous_request(
        &self,
        params: NewAnonymousRequest,
    ) -> UpkeepResult<Request> {
        let mut request = Request::new(params.title, params.building)
            .with_urgent(params.urgent);
        request.description = params.description;
        request.department = params.department;

        let applied = lifecycle::submit_anonymous(&mut request);
        let entry = entry_for(&request, &applied, None);
        self.store.commit_creation(request.clone(), entry).await?;

        tracing::info!(request_id = %request.id, "anonymous request submitted");
        Ok(request)
    }

    /// Approve an anonymous intake into the working lifecycle. The approver
    /// becomes the opener.
    pub async fn approve_anonymous_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> UpkeepResult<Request> {
        let mut request = self.load_request(request_id).await?;
        authorize(principal, Action::ApproveAnonymousRequest, &request.scope())?;

        let expected_version = request.version;
        let applied = lifecycle::approve_anonymous(&mut request, principal)?;
        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store
            .commit_transition(request.clone(), expected_version, None, entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(request_id = %request.id, actor = %principal.id, "anonymous request approved");
        self.notify(
            RequestEvent::Created {
                actor: Some(principal.id.clone()),
            },
            &request,
        )
        .await;
        Ok(request)
    }

    // ── Status-change workflow ───────────────────────────────────────

    /// Ask to close a request as Completed (with a photo) or Postponed
    /// (with a reason). At most one such request may be pending.
    pub async fn request_status_change(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        requested_status: RequestStatus,
        evidence: Evidence,
    ) -> UpkeepResult<StatusChangeRequest> {
        let mut request = self.load_request(request_id).await?;
        authorize(principal, Action::RequestStatusChange, &request.scope())?;

        if let Some(pending) = self.store.pending_status_change(request_id).await? {
            return Err(UpkeepError::Conflict(format!(
                "request {} already has pending status-change request {}",
                request_id, pending.id
            )));
        }

        let mut change =
            StatusChangeRequest::new(request.id.clone(), principal.id.clone(), requested_status);
        change.photo = evidence.photo;
        change.reason = evidence.reason;

        let expected_version = request.version;
        let applied = lifecycle::request_status_change(&mut request, &change)?;
        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store
            .commit_transition(request.clone(), expected_version, Some(change.clone()), entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(
            request_id = %request.id,
            change_id = %change.id,
            requested = %requested_status,
            "status change requested"
        );
        self.notify(
            RequestEvent::StatusChangeRequested {
                actor: principal.id.clone(),
            },
            &request,
        )
        .await;
        Ok(change)
    }

    /// Resolve a pending status-change request exactly once. Approval lands
    /// the request on the requested status, closed by the original
    /// requester; rejection returns it to `Created` with closure unset.
    pub async fn review_status_change(
        &self,
        principal: &Principal,
        change_id: &StatusChangeId,
        verdict: ReviewVerdict,
    ) -> UpkeepResult<Request> {
        let mut change = self
            .store
            .get_status_change(change_id)
            .await?
            .ok_or_else(|| {
                UpkeepError::NotFound(format!("status-change request {change_id} not found"))
            })?;
        let request_id = change.request_id.clone();
        let mut request = self.load_request(&request_id).await?;
        authorize(principal, Action::ReviewStatusChange, &request.scope())?;

        let expected_version = request.version;
        let (applied, event) = match verdict {
            ReviewVerdict::Approve => {
                let applied = lifecycle::review_approve(&mut request, &mut change, principal)?;
                let event = RequestEvent::StatusChangeApproved {
                    new_status: applied.new_status,
                };
                (applied, event)
            }
            ReviewVerdict::Reject { reason, photo } => {
                let applied =
                    lifecycle::review_reject(&mut request, &mut change, principal, reason, photo)?;
                let event = RequestEvent::StatusChangeRejected {
                    requester: change.requested_by.clone(),
                };
                (applied, event)
            }
        };

        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store
            .commit_transition(request.clone(), expected_version, Some(change), entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(
            request_id = %request.id,
            change_id = %change_id,
            outcome = %applied.new_status,
            "status change reviewed"
        );
        self.notify(event, &request).await;
        Ok(request)
    }

    /// Directly set a request's status, bypassing the approval workflow.
    /// A pending status-change request is resolved as rejected so it cannot
    /// be reviewed against the superseded state. No notification.
    pub async fn override_status(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        target: RequestStatus,
    ) -> UpkeepResult<Request> {
        let mut request = self.load_request(request_id).await?;
        authorize(principal, Action::OverrideStatus, &request.scope())?;

        let resolved_change = match self.store.pending_status_change(request_id).await? {
            Some(mut pending) => {
                pending.review = Some(upkeep_types::Review {
                    reviewed_by: principal.id.clone(),
                    reviewed_at: Utc::now(),
                    approved: false,
                    rejection_reason: Some("superseded by a direct status change".to_string()),
                    rejection_photo: None,
                });
                Some(pending)
            }
            None => None,
        };

        let expected_version = request.version;
        let applied = lifecycle::override_status(&mut request, target, principal)?;
        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store
            .commit_transition(request.clone(), expected_version, resolved_change, entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(request_id = %request.id, target = %target, actor = %principal.id, "status overridden");
        Ok(request)
    }

    /// Bring a postponed request back to work.
    pub async fn return_to_work(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> UpkeepResult<Request> {
        let mut request = self.load_request(request_id).await?;
        authorize(principal, Action::ReturnToWork, &request.scope())?;

        let expected_version = request.version;
        let applied = lifecycle::return_to_work(&mut request, principal)?;
        let entry = entry_for(&request, &applied, Some(principal.id.clone()));
        self.store
            .commit_transition(request.clone(), expected_version, None, entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(request_id = %request.id, actor = %principal.id, "request returned to work");
        self.notify(
            RequestEvent::ReturnedToWork {
                actor: principal.id.clone(),
            },
            &request,
        )
        .await;
        Ok(request)
    }

    // ── Metadata ─────────────────────────────────────────────────────

    /// Edit a request's descriptive fields. Moving it between buildings is
    /// Admin-only; other edits follow the usual scope rules.
    pub async fn update_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        update: RequestUpdate,
    ) -> UpkeepResult<Request> {
        let mut request = self.load_request(request_id).await?;
        let changes_building = update
            .building
            .as_ref()
            .is_some_and(|b| *b != request.building);
        authorize(
            principal,
            Action::UpdateRequest { changes_building },
            &request.scope(),
        )?;

        if let Some(title) = update.title {
            request.title = title;
        }
        if let Some(description) = update.description {
            request.description = Some(description);
        }
        if let Some(building) = update.building {
            request.building = building;
        }
        if let Some(department) = update.department {
            request.department = Some(department);
        }
        if let Some(urgent) = update.urgent {
            request.urgent = urgent;
        }

        let expected_version = request.version;
        let entry = self.metadata_entry(&request, principal, "request fields updated");
        self.store
            .commit_transition(request.clone(), expected_version, None, entry)
            .await?;
        request.version = expected_version + 1;

        tracing::info!(request_id = %request.id, actor = %principal.id, "request updated");
        Ok(request)
    }

    /// Append a photo attachment.
    pub async fn attach_photo(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        photo: AttachmentRef,
    ) -> UpkeepResult<Request> {
        let mut request = self.load_request(request_id).await?;
        authorize(principal, Action::AttachPhoto, &request.scope())?;

        request.attachments.push(photo);

        let expected_version = request.version;
        let entry = self.metadata_entry(&request, principal, "photo attached");
        self.store
            .commit_transition(request.clone(), expected_version, None, entry)
            .await?;
        request.version = expected_version + 1;
        Ok(request)
    }

    /// Remove a request entirely. History entries share the request's
    /// lifetime, so they go with it, as do its status-change requests.
    pub async fn delete_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> UpkeepResult<()> {
        let request = self.load_request(request_id).await?;
        authorize(principal, Action::DeleteRequest, &request.scope())?;

        self.store.delete_request(request_id).await?;
        tracing::info!(request_id = %request_id, actor = %principal.id, "request deleted");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// One request with its history and pending change, scope permitting.
    pub async fn get_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> UpkeepResult<RequestView> {
        let request = self.load_request(request_id).await?;
        authorize(principal, Action::ViewRequest, &request.scope())?;

        let history = self.audit.for_request(request_id).await?;
        let pending_change = self.store.pending_status_change(request_id).await?;
        Ok(RequestView {
            request,
            history,
            pending_change,
        })
    }

    /// All requests the principal may see, urgent first, then newest first.
    pub async fn list_requests(&self, principal: &Principal) -> UpkeepResult<Vec<Request>> {
        let requests = self.store.list_requests().await?;
        Ok(requests
            .into_iter()
            .filter(|request| visible_to(principal, request))
            .collect())
    }

    // ── Principals ───────────────────────────────────────────────────

    /// Create or edit a principal. Heads manage users within their own
    /// building; principals without a building are Admin territory.
    pub async fn upsert_principal(
        &self,
        actor: &Principal,
        principal: Principal,
    ) -> UpkeepResult<()> {
        match &principal.building {
            Some(building) => {
                authorize(
                    actor,
                    Action::ManageUsers,
                    &Scope::building(building.clone()),
                )?;
            }
            None => {
                if actor.role != Role::Admin {
                    return Err(UpkeepError::Forbidden(
                        "only admins can manage principals without a building".to_string(),
                    ));
                }
            }
        }
        self.store.upsert_principal(principal).await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn load_request(&self, id: &RequestId) -> UpkeepResult<Request> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| UpkeepError::NotFound(format!("request {id} not found")))
    }

    fn metadata_entry(
        &self,
        request: &Request,
        principal: &Principal,
        detail: &str,
    ) -> HistoryEntry {
        HistoryEntry {
            id: HistoryEntryId::generate(),
            request_id: request.id.clone(),
            action: HistoryAction::Updated,
            performed_by: Some(principal.id.clone()),
            old_status: None,
            new_status: None,
            details: Some(detail.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Compute recipients and hand the payload to the detached dispatcher.
    /// Any failure here is logged and swallowed; the transition is already
    /// durable.
    async fn notify(&self, event: RequestEvent, request: &Request) {
        let directory = match self.store.list_principals().await {
            Ok(directory) => directory,
            Err(err) => {
                tracing::warn!(error = %err, "skipping notification, principal directory unavailable");
                return;
            }
        };
        let recipients = targets(&event, request, &directory);
        if recipients.is_empty() {
            return;
        }
        let payload = payload_for(&event, request);
        self.dispatcher.dispatch(recipients, payload);
    }
}

//! Upkeep Lifecycle - the request state machine
//!
//! The lifecycle of a request is an explicit finite-state machine: every
//! reachable transition appears in [`TRANSITIONS`], and the guarded apply
//! functions below are the only writers of a request's status and closure
//! fields. A transition that fails a guard performs no mutation; a
//! transition that succeeds returns exactly one [`Applied`] record for the
//! orchestrator to turn into a history entry. All-or-nothing, always.
//!
//! Authorization is deliberately not handled here - callers consult the
//! authz engine first and hand this crate pre-authorized inputs.

#![deny(unsafe_code)]

use chrono::Utc;
use upkeep_types::{
    AttachmentRef, HistoryAction, Principal, PrincipalId, Request, RequestStatus, Review,
    StatusChangeRequest, UpkeepError, UpkeepResult,
};

/// The transitions a request can undergo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    SubmitAnonymous,
    CreateDirect,
    ApproveAnonymous,
    RequestStatusChange,
    ReviewApprove,
    ReviewReject,
    OverrideStatus,
    ReturnToWork,
}

/// The full transition table: (source status, transition, target status).
/// `None` as source marks the two creation entry points. Nothing outside
/// this table is reachable.
pub const TRANSITIONS: &[(Option<RequestStatus>, TransitionKind, RequestStatus)] = &[
    (
        None,
        TransitionKind::SubmitAnonymous,
        RequestStatus::PendingCreationApproval,
    ),
    (None, TransitionKind::CreateDirect, RequestStatus::Created),
    (
        Some(RequestStatus::PendingCreationApproval),
        TransitionKind::ApproveAnonymous,
        RequestStatus::Created,
    ),
    (
        Some(RequestStatus::Created),
        TransitionKind::RequestStatusChange,
        RequestStatus::PendingApproval,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::ReviewApprove,
        RequestStatus::Completed,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::ReviewApprove,
        RequestStatus::Postponed,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::ReviewReject,
        RequestStatus::Created,
    ),
    // Legacy direct path: Admin/Head may push Created or PendingApproval
    // anywhere, bypassing the approval workflow.
    (
        Some(RequestStatus::Created),
        TransitionKind::OverrideStatus,
        RequestStatus::Created,
    ),
    (
        Some(RequestStatus::Created),
        TransitionKind::OverrideStatus,
        RequestStatus::PendingApproval,
    ),
    (
        Some(RequestStatus::Created),
        TransitionKind::OverrideStatus,
        RequestStatus::Completed,
    ),
    (
        Some(RequestStatus::Created),
        TransitionKind::OverrideStatus,
        RequestStatus::Postponed,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::OverrideStatus,
        RequestStatus::Created,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::OverrideStatus,
        RequestStatus::PendingApproval,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::OverrideStatus,
        RequestStatus::Completed,
    ),
    (
        Some(RequestStatus::PendingApproval),
        TransitionKind::OverrideStatus,
        RequestStatus::Postponed,
    ),
    (
        Some(RequestStatus::Postponed),
        TransitionKind::ReturnToWork,
        RequestStatus::Created,
    ),
    // Completed has no return transition: it stays reachable forward only.
];

/// Whether `(from, kind, to)` appears in the transition table.
pub fn permitted(from: Option<RequestStatus>, kind: TransitionKind, to: RequestStatus) -> bool {
    TRANSITIONS
        .iter()
        .any(|(f, k, t)| *f == from && *k == kind && *t == to)
}

/// The record of one successfully applied transition. The orchestrator
/// turns this into exactly one history entry.
#[derive(Clone, Debug)]
pub struct Applied {
    pub action: HistoryAction,
    pub old_status: Option<RequestStatus>,
    pub new_status: RequestStatus,
    pub detail: String,
}

// ── Entry points (no prior status) ───────────────────────────────────

/// Direct creation by an authorized principal: the request enters `Created`
/// with the creator recorded as opener.
pub fn create_direct(request: &mut Request, creator: &Principal) -> Applied {
    request.status = RequestStatus::Created;
    request.anonymous = false;
    request.opened_by = Some(creator.id.clone());

    Applied {
        action: HistoryAction::Created,
        old_status: None,
        new_status: RequestStatus::Created,
        detail: format!("request created by {}", creator.id),
    }
}

/// Anonymous intake: no principal, no authorization. The request waits in
/// `PendingCreationApproval` until a Head or Admin approves it.
pub fn submit_anonymous(request: &mut Request) -> Applied {
    request.status = RequestStatus::PendingCreationApproval;
    request.anonymous = true;
    request.opened_by = None;

    Applied {
        action: HistoryAction::AnonymousSubmitted,
        old_status: None,
        new_status: RequestStatus::PendingCreationApproval,
        detail: "anonymous request submitted".to_string(),
    }
}

// ── Guarded transitions ──────────────────────────────────────────────

/// Approve an anonymous intake. The approver becomes the opener; the
/// anonymous flag is untouched.
pub fn approve_anonymous(request: &mut Request, approver: &Principal) -> UpkeepResult<Applied> {
    if !request.anonymous {
        return Err(UpkeepError::Validation(format!(
            "request {} is not anonymous",
            request.id
        )));
    }
    let old = guard(request, TransitionKind::ApproveAnonymous, RequestStatus::Created)?;

    request.status = RequestStatus::Created;
    request.opened_by = Some(approver.id.clone());

    Ok(Applied {
        action: HistoryAction::AnonymousApproved,
        old_status: Some(old),
        new_status: RequestStatus::Created,
        detail: format!("anonymous request approved by {}", approver.id),
    })
}

/// Move a `Created` request into `PendingApproval` on behalf of a freshly
/// built status-change request. Validates the evidence rules: a photo for
/// `Completed`, a reason for `Postponed`, nothing else accepted.
///
/// Pending-exclusivity (at most one unresolved status-change request per
/// request) is enforced by the store at commit time; this function only
/// sees a single change.
pub fn request_status_change(
    request: &mut Request,
    change: &StatusChangeRequest,
) -> UpkeepResult<Applied> {
    ensure_same_request(request, change)?;
    validate_evidence(change)?;
    let old = guard(
        request,
        TransitionKind::RequestStatusChange,
        RequestStatus::PendingApproval,
    )?;

    request.status = RequestStatus::PendingApproval;

    Ok(Applied {
        action: HistoryAction::StatusChangeRequested,
        old_status: Some(old),
        new_status: RequestStatus::PendingApproval,
        detail: format!(
            "{} requested status change to {}",
            change.requested_by, change.requested_status
        ),
    })
}

/// Approve a pending status-change request: the request lands on the
/// requested status, closed by the original requester. Resolves the
/// status-change request exactly once; a second review is a conflict.
pub fn review_approve(
    request: &mut Request,
    change: &mut StatusChangeRequest,
    reviewer: &Principal,
) -> UpkeepResult<Applied> {
    ensure_same_request(request, change)?;
    ensure_unresolved(change)?;
    let target = change.requested_status;
    let old = guard(request, TransitionKind::ReviewApprove, target)?;

    let now = Utc::now();
    change.review = Some(Review {
        reviewed_by: reviewer.id.clone(),
        reviewed_at: now,
        approved: true,
        rejection_reason: None,
        rejection_photo: None,
    });
    set_status(request, target, Some(change.requested_by.clone()));

    Ok(Applied {
        action: HistoryAction::StatusChangeApproved,
        old_status: Some(old),
        new_status: target,
        detail: format!("{} approved status change to {}", reviewer.id, target),
    })
}

/// Reject a pending status-change request: the request returns to `Created`
/// with the closure fields untouched (unset), and the rejection reason and
/// optional photo are recorded on the resolved change.
pub fn review_reject(
    request: &mut Request,
    change: &mut StatusChangeRequest,
    reviewer: &Principal,
    rejection_reason: Option<String>,
    rejection_photo: Option<AttachmentRef>,
) -> UpkeepResult<Applied> {
    ensure_same_request(request, change)?;
    ensure_unresolved(change)?;
    let old = guard(request, TransitionKind::ReviewReject, RequestStatus::Created)?;

    let detail = match &rejection_reason {
        Some(reason) => format!("{} rejected status change: {}", reviewer.id, reason),
        None => format!("{} rejected status change", reviewer.id),
    };

    change.review = Some(Review {
        reviewed_by: reviewer.id.clone(),
        reviewed_at: Utc::now(),
        approved: false,
        rejection_reason,
        rejection_photo,
    });
    set_status(request, RequestStatus::Created, None);

    Ok(Applied {
        action: HistoryAction::StatusChangeRejected,
        old_status: Some(old),
        new_status: RequestStatus::Created,
        detail,
    })
}

/// Directly set a request's status, bypassing the approval workflow.
/// Closure fields follow the target: set when landing on a closed status
/// (closed by the actor), cleared otherwise.
pub fn override_status(
    request: &mut Request,
    target: RequestStatus,
    actor: &Principal,
) -> UpkeepResult<Applied> {
    let old = guard(request, TransitionKind::OverrideStatus, target)?;

    set_status(request, target, Some(actor.id.clone()));

    Ok(Applied {
        action: HistoryAction::StatusChanged,
        old_status: Some(old),
        new_status: target,
        detail: format!("status directly changed to {} by {}", target, actor.id),
    })
}

/// Bring a postponed request back to work: `Postponed -> Created`, closure
/// fields cleared.
pub fn return_to_work(request: &mut Request, actor: &Principal) -> UpkeepResult<Applied> {
    let old = guard(request, TransitionKind::ReturnToWork, RequestStatus::Created)?;

    set_status(request, RequestStatus::Created, None);

    Ok(Applied {
        action: HistoryAction::ReturnedToWork,
        old_status: Some(old),
        new_status: RequestStatus::Created,
        detail: format!("{} returned the request to work", actor.id),
    })
}

// ── Guards & helpers ─────────────────────────────────────────────────

fn guard(
    request: &Request,
    kind: TransitionKind,
    to: RequestStatus,
) -> UpkeepResult<RequestStatus> {
    let from = request.status;
    if !permitted(Some(from), kind, to) {
        return Err(UpkeepError::Conflict(format!(
            "transition {kind:?} to {to} is not permitted from {from}"
        )));
    }
    Ok(from)
}

fn ensure_same_request(request: &Request, change: &StatusChangeRequest) -> UpkeepResult<()> {
    if change.request_id != request.id {
        return Err(UpkeepError::Validation(format!(
            "status-change request {} does not belong to request {}",
            change.id, request.id
        )));
    }
    Ok(())
}

fn ensure_unresolved(change: &StatusChangeRequest) -> UpkeepResult<()> {
    if !change.is_pending() {
        return Err(UpkeepError::Conflict(format!(
            "status-change request {} has already been reviewed",
            change.id
        )));
    }
    Ok(())
}

fn validate_evidence(change: &StatusChangeRequest) -> UpkeepResult<()> {
    match change.requested_status {
        RequestStatus::Completed => {
            if change.photo.is_none() {
                return Err(UpkeepError::Validation(
                    "a photo is required when requesting completed status".to_string(),
                ));
            }
        }
        RequestStatus::Postponed => {
            if change.reason.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(UpkeepError::Validation(
                    "a reason is required when requesting postponed status".to_string(),
                ));
            }
        }
        other => {
            return Err(UpkeepError::Validation(format!(
                "only completed or postponed may be requested, got {other}"
            )));
        }
    }
    Ok(())
}

/// The single writer of status + closure fields, keeping the invariant
/// `closed_at.is_some() == status.is_closed()` intact.
fn set_status(request: &mut Request, to: RequestStatus, closer: Option<PrincipalId>) {
    request.status = to;
    if to.is_closed() {
        request.closed_by = closer;
        request.closed_at = Some(Utc::now());
    } else {
        request.closed_by = None;
        request.closed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use upkeep_types::{Building, PrincipalId, RequestId, Role};

    fn principal(id: &str, role: Role) -> Principal {
        Principal::new(PrincipalId::new(id), role)
    }

    fn created_request() -> Request {
        let mut request = Request::new("flickering light", Building::new("north"));
        create_direct(&mut request, &principal("opener", Role::Specialist));
        request
    }

    fn pending_completed(request: &Request) -> StatusChangeRequest {
        StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Completed,
        )
        .with_photo(AttachmentRef::new("photo-1"))
    }

    fn pending_postponed(request: &Request) -> StatusChangeRequest {
        StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Postponed,
        )
        .with_reason("parts unavailable")
    }

    #[test]
    fn direct_creation_lands_on_created_with_opener() {
        let request = created_request();
        assert_eq!(request.status, RequestStatus::Created);
        assert_eq!(request.opened_by, Some(PrincipalId::new("opener")));
        assert!(!request.anonymous);
    }

    #[test]
    fn anonymous_intake_waits_for_approval() {
        let mut request = Request::new("graffiti", Building::new("north"));
        let applied = submit_anonymous(&mut request);
        assert_eq!(request.status, RequestStatus::PendingCreationApproval);
        assert!(request.anonymous);
        assert!(request.opened_by.is_none());
        assert_eq!(applied.action, HistoryAction::AnonymousSubmitted);
    }

    #[test]
    fn approving_anonymous_sets_approver_as_opener() {
        let mut request = Request::new("graffiti", Building::new("north"));
        submit_anonymous(&mut request);

        let head = principal("head", Role::Head);
        let applied = approve_anonymous(&mut request, &head).unwrap();
        assert_eq!(request.status, RequestStatus::Created);
        assert_eq!(request.opened_by, Some(head.id));
        assert!(request.anonymous, "anonymous flag stays set");
        assert_eq!(applied.old_status, Some(RequestStatus::PendingCreationApproval));
    }

    #[test]
    fn approving_a_non_anonymous_request_fails_validation() {
        let mut request = created_request();
        let result = approve_anonymous(&mut request, &principal("head", Role::Head));
        assert!(matches!(result, Err(UpkeepError::Validation(_))));
        assert_eq!(request.status, RequestStatus::Created);
    }

    #[test]
    fn completed_requires_a_photo() {
        let mut request = created_request();
        let change = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Completed,
        );
        assert!(matches!(
            request_status_change(&mut request, &change),
            Err(UpkeepError::Validation(_))
        ));
        assert_eq!(request.status, RequestStatus::Created);
    }

    #[test]
    fn postponed_requires_a_reason() {
        let mut request = created_request();
        let change = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Postponed,
        )
        .with_reason("   ");
        assert!(matches!(
            request_status_change(&mut request, &change),
            Err(UpkeepError::Validation(_))
        ));
    }

    #[test]
    fn only_closed_statuses_may_be_requested() {
        let mut request = created_request();
        let change = StatusChangeRequest::new(
            request.id.clone(),
            PrincipalId::new("worker"),
            RequestStatus::Created,
        );
        assert!(matches!(
            request_status_change(&mut request, &change),
            Err(UpkeepError::Validation(_))
        ));
    }

    #[test]
    fn approval_closes_with_the_original_requester() {
        let mut request = created_request();
        let mut change = pending_completed(&request);
        request_status_change(&mut request, &change).unwrap();

        let applied =
            review_approve(&mut request, &mut change, &principal("head", Role::Head)).unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.closed_by, Some(PrincipalId::new("worker")));
        assert!(request.closed_at.is_some());
        assert!(request.closure_consistent());
        assert!(!change.is_pending());
        assert_eq!(applied.new_status, RequestStatus::Completed);
    }

    #[test]
    fn rejection_returns_to_created_with_closure_unset() {
        let mut request = created_request();
        let mut change = pending_completed(&request);
        request_status_change(&mut request, &change).unwrap();

        review_reject(
            &mut request,
            &mut change,
            &principal("head", Role::Head),
            Some("photo is too dark".to_string()),
            None,
        )
        .unwrap();

        assert_eq!(request.status, RequestStatus::Created);
        assert!(request.closed_by.is_none());
        assert!(request.closed_at.is_none());
        let review = change.review.expect("resolved");
        assert!(!review.approved);
        assert_eq!(review.rejection_reason.as_deref(), Some("photo is too dark"));
    }

    #[test]
    fn second_review_of_a_resolved_change_is_a_conflict() {
        let mut request = created_request();
        let mut change = pending_postponed(&request);
        request_status_change(&mut request, &change).unwrap();

        let head = principal("head", Role::Head);
        review_approve(&mut request, &mut change, &head).unwrap();

        let before = request.clone();
        assert!(matches!(
            review_approve(&mut request, &mut change, &head),
            Err(UpkeepError::Conflict(_))
        ));
        assert!(matches!(
            review_reject(&mut request, &mut change, &head, None, None),
            Err(UpkeepError::Conflict(_))
        ));
        assert_eq!(request, before, "failed reviews mutate nothing");
    }

    #[test]
    fn return_to_work_is_only_valid_from_postponed() {
        let mut request = created_request();
        let actor = principal("head", Role::Head);
        assert!(matches!(
            return_to_work(&mut request, &actor),
            Err(UpkeepError::Conflict(_))
        ));

        override_status(&mut request, RequestStatus::Postponed, &actor).unwrap();
        return_to_work(&mut request, &actor).unwrap();
        assert_eq!(request.status, RequestStatus::Created);
        assert!(request.closed_at.is_none());
        assert!(request.closed_by.is_none());
    }

    #[test]
    fn reject_then_return_to_work_is_a_conflict() {
        // Round-trip from the spec: request completed, get rejected, and the
        // request is back in Created where return-to-work has no business.
        let mut request = created_request();
        let mut change = pending_completed(&request);
        request_status_change(&mut request, &change).unwrap();

        let head = principal("head", Role::Head);
        review_reject(&mut request, &mut change, &head, None, None).unwrap();
        assert_eq!(request.status, RequestStatus::Created);

        assert!(matches!(
            return_to_work(&mut request, &head),
            Err(UpkeepError::Conflict(_))
        ));
    }

    #[test]
    fn override_sets_and_clears_closure_fields() {
        let mut request = created_request();
        let admin = principal("admin", Role::Admin);

        override_status(&mut request, RequestStatus::Completed, &admin).unwrap();
        assert_eq!(request.closed_by, Some(admin.id.clone()));
        assert!(request.closed_at.is_some());

        // Completed is forward-only: no override back out of it.
        assert!(matches!(
            override_status(&mut request, RequestStatus::Created, &admin),
            Err(UpkeepError::Conflict(_))
        ));
    }

    #[test]
    fn completed_has_no_outgoing_transitions() {
        for (from, _, _) in TRANSITIONS {
            assert_ne!(*from, Some(RequestStatus::Completed));
        }
    }

    // ── Property: arbitrary operation sequences stay inside the table ──

    #[derive(Debug, Clone)]
    enum Op {
        Request(bool), // true = completed, false = postponed
        Approve,
        Reject,
        Override(RequestStatus),
        Return,
    }

    fn op_strategy() -> impl Strategy<Value = Vec<Op>> {
        let status = prop_oneof![
            Just(RequestStatus::PendingCreationApproval),
            Just(RequestStatus::Created),
            Just(RequestStatus::PendingApproval),
            Just(RequestStatus::Completed),
            Just(RequestStatus::Postponed),
        ];
        proptest::collection::vec(
            prop_oneof![
                any::<bool>().prop_map(Op::Request),
                Just(Op::Approve),
                Just(Op::Reject),
                status.prop_map(Op::Override),
                Just(Op::Return),
            ],
            0..24,
        )
    }

    proptest! {
        #[test]
        fn random_sequences_never_break_invariants(ops in op_strategy()) {
            let actor = principal("actor", Role::Admin);
            let mut request = created_request();
            let mut pending: Option<StatusChangeRequest> = None;

            for op in ops {
                let before = request.clone();
                let result = match op {
                    Op::Request(completed) => {
                        let change = if completed {
                            pending_completed(&request)
                        } else {
                            pending_postponed(&request)
                        };
                        // Mirror the orchestrator's pending-exclusivity guard.
                        if pending.as_ref().is_some_and(|c| c.is_pending()) {
                            Err(UpkeepError::Conflict("pending change exists".into()))
                        } else {
                            request_status_change(&mut request, &change).map(|applied| {
                                pending = Some(change);
                                applied
                            })
                        }
                    }
                    Op::Approve => match pending.as_mut() {
                        Some(change) => review_approve(&mut request, change, &actor),
                        None => Err(UpkeepError::NotFound("no change".into())),
                    },
                    Op::Reject => match pending.as_mut() {
                        Some(change) => review_reject(&mut request, change, &actor, None, None),
                        None => Err(UpkeepError::NotFound("no change".into())),
                    },
                    Op::Override(target) => override_status(&mut request, target, &actor),
                    Op::Return => return_to_work(&mut request, &actor),
                };

                prop_assert!(request.closure_consistent());
                if result.is_err() {
                    prop_assert_eq!(&request, &before, "failed transitions mutate nothing");
                }
            }
        }
    }
}

//! Pure notification targeting rules.
//!
//! `targets` maps (event, request, directory) to a deduplicated recipient
//! set, excluding the acting principal where the event is their own doing.
//! Delivery is somebody else's problem.

use serde::{Deserialize, Serialize};
use upkeep_types::{Principal, PrincipalId, Request, RequestStatus, Role};

/// A notifiable state change on a request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestEvent {
    /// A request became visible as `Created`, either directly or through
    /// anonymous-intake approval. `actor` is the creator/approver; `None`
    /// only when nobody attributable triggered it.
    Created { actor: Option<PrincipalId> },
    /// A worker asked to close the request.
    StatusChangeRequested { actor: PrincipalId },
    /// A reviewer approved the pending status-change request.
    StatusChangeApproved { new_status: RequestStatus },
    /// A reviewer rejected the pending status-change request.
    StatusChangeRejected { requester: PrincipalId },
    /// A postponed request came back to work.
    ReturnedToWork { actor: PrincipalId },
}

/// What the opaque notifier delivers per recipient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// Structured extras for the client (request id, deep link, action tag).
    pub data: serde_json::Value,
}

/// Compute the recipient set for an event.
///
/// Deduplicated, ordered as the directory is ordered, and never containing
/// the acting principal for self-attributable events.
pub fn targets(
    event: &RequestEvent,
    request: &Request,
    directory: &[Principal],
) -> Vec<PrincipalId> {
    let mut recipients: Vec<PrincipalId> = Vec::new();
    let mut push = |id: &PrincipalId| {
        if !recipients.contains(id) {
            recipients.push(id.clone());
        }
    };

    match event {
        RequestEvent::Created { actor } => {
            for principal in directory {
                let wanted = match principal.role {
                    Role::Admin => true,
                    Role::Head => heads_building(principal, request),
                    Role::Specialist | Role::Executor => works_scope(principal, request),
                };
                if wanted && Some(&principal.id) != actor.as_ref() {
                    push(&principal.id);
                }
            }
        }
        RequestEvent::StatusChangeRequested { actor } => {
            for principal in directory {
                let wanted = match principal.role {
                    Role::Admin => true,
                    Role::Head => heads_building(principal, request),
                    _ => false,
                };
                if wanted && principal.id != *actor {
                    push(&principal.id);
                }
            }
        }
        RequestEvent::StatusChangeApproved { new_status } => {
            for principal in directory {
                let wanted = match (new_status, principal.role) {
                    // Completion is broadcast to everyone working the scope;
                    // a postponement only concerns administrators.
                    (_, Role::Admin) => true,
                    (RequestStatus::Completed, Role::Head) => heads_building(principal, request),
                    (RequestStatus::Completed, Role::Specialist | Role::Executor) => {
                        works_scope(principal, request)
                    }
                    _ => false,
                };
                if wanted {
                    push(&principal.id);
                }
            }
        }
        RequestEvent::StatusChangeRejected { requester } => {
            push(requester);
            for principal in directory {
                if principal.role == Role::Admin {
                    push(&principal.id);
                }
            }
        }
        RequestEvent::ReturnedToWork { actor } => {
            for principal in directory {
                let wanted = match principal.role {
                    Role::Admin => true,
                    Role::Head => heads_building(principal, request),
                    Role::Specialist | Role::Executor => works_scope(principal, request),
                };
                if wanted && principal.id != *actor {
                    push(&principal.id);
                }
            }
        }
    }

    recipients
}

fn heads_building(principal: &Principal, request: &Request) -> bool {
    principal.building.as_ref() == Some(&request.building)
}

/// Specialists and executors are addressed only when the request carries a
/// department, and only on an exact building + department match. A request
/// without a department reaches none of them.
fn works_scope(principal: &Principal, request: &Request) -> bool {
    if principal.building.as_ref() != Some(&request.building) {
        return false;
    }
    match (&principal.department, &request.department) {
        (Some(theirs), Some(ours)) => theirs == ours,
        _ => false,
    }
}

/// Render the payload for an event.
pub fn payload_for(event: &RequestEvent, request: &Request) -> NotificationPayload {
    let (title, body, action) = match event {
        RequestEvent::Created { .. } => (
            "New maintenance request".to_string(),
            format!("\"{}\" was opened in {}", request.title, request.building),
            "request_created",
        ),
        RequestEvent::StatusChangeRequested { .. } => (
            "Status change awaiting review".to_string(),
            format!("\"{}\" has a status change to review", request.title),
            "status_change_requested",
        ),
        RequestEvent::StatusChangeApproved { new_status } => (
            "Status change approved".to_string(),
            format!("\"{}\" is now {}", request.title, new_status),
            "status_change_approved",
        ),
        RequestEvent::StatusChangeRejected { .. } => (
            "Status change rejected".to_string(),
            format!("the status change for \"{}\" was rejected", request.title),
            "status_change_rejected",
        ),
        RequestEvent::ReturnedToWork { .. } => (
            "Request returned to work".to_string(),
            format!("\"{}\" is back in work", request.title),
            "returned_to_work",
        ),
    };

    NotificationPayload {
        title,
        body,
        data: serde_json::json!({
            "request_id": request.id.to_string(),
            "url": format!("/requests/{}", request.id),
            "action": action,
        }),
    }
}

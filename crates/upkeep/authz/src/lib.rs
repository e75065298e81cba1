//! Upkeep Authz - the role-and-scope authorization engine
//!
//! One pure decision function evaluated before every state mutation.
//! Role-based branching lives here and nowhere else: callers hand in the
//! acting principal, a tagged [`Action`], and the target [`Scope`], and get
//! back either a [`Grant`] (with the possibly narrowed scope) or a denial.
//!
//! Rules are evaluated in precedence order - Admin, Head, Specialist,
//! Executor - and the first matching rule decides. No I/O, deterministic.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use upkeep_types::{Principal, Request, Role, Scope, UpkeepError, UpkeepResult};

/// Every operation the engine can rule on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Open a request directly (non-anonymous path).
    CreateRequest,
    /// Approve an anonymous intake into the working lifecycle.
    ApproveAnonymousRequest,
    /// Originate a status-change request (to Completed or Postponed).
    RequestStatusChange,
    /// Approve or reject a pending status-change request.
    ReviewStatusChange,
    /// Directly set a request's status, bypassing the approval workflow.
    OverrideStatus,
    /// Bring a postponed request back to work.
    ReturnToWork,
    /// Edit a request's descriptive fields. Moving a request between
    /// buildings is Admin-only.
    UpdateRequest { changes_building: bool },
    /// Add a photo attachment to a request.
    AttachPhoto,
    /// Remove a request entirely, history included.
    DeleteRequest,
    /// Read access; also the rule behind request list filtering.
    ViewRequest,
    /// Create or edit principals.
    ManageUsers,
}

/// A positive decision. `scope` is the effective scope the action must use:
/// for a Specialist creating a request, the department is forced to the
/// Specialist's own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub scope: Scope,
}

/// Decide whether `principal` may perform `action` against `scope`.
///
/// Pure and deterministic. Scope mismatches and role mismatches surface as
/// [`UpkeepError::Forbidden`]; a principal missing an attribute the rule
/// needs (Specialist without a department creating a request, a scoped role
/// without a building) surfaces as [`UpkeepError::Configuration`].
pub fn authorize(principal: &Principal, action: Action, scope: &Scope) -> UpkeepResult<Grant> {
    match principal.role {
        Role::Admin => Ok(Grant {
            scope: scope.clone(),
        }),
        Role::Head => authorize_head(principal, action, scope),
        Role::Specialist => authorize_specialist(principal, action, scope),
        Role::Executor => authorize_executor(principal, action, scope),
    }
}

fn authorize_head(principal: &Principal, action: Action, scope: &Scope) -> UpkeepResult<Grant> {
    let building = home_building(principal)?;
    if *building != scope.building {
        return Err(UpkeepError::Forbidden(format!(
            "head of {} cannot act on building {}",
            building, scope.building
        )));
    }

    match action {
        Action::UpdateRequest {
            changes_building: true,
        } => Err(UpkeepError::Forbidden(
            "only admins can change a request's building".to_string(),
        )),
        Action::RequestStatusChange => Err(UpkeepError::Forbidden(
            "only specialists and executors originate status-change requests".to_string(),
        )),
        Action::CreateRequest
        | Action::ApproveAnonymousRequest
        | Action::ReviewStatusChange
        | Action::OverrideStatus
        | Action::ReturnToWork
        | Action::UpdateRequest { .. }
        | Action::AttachPhoto
        | Action::DeleteRequest
        | Action::ViewRequest
        | Action::ManageUsers => Ok(Grant {
            scope: scope.clone(),
        }),
    }
}

fn authorize_specialist(
    principal: &Principal,
    action: Action,
    scope: &Scope,
) -> UpkeepResult<Grant> {
    check_department_scope(principal, scope)?;

    match action {
        Action::CreateRequest => {
            // Creation is forced into the specialist's own department.
            let department = principal.department.clone().ok_or_else(|| {
                UpkeepError::Configuration(
                    "specialist must have a department assigned".to_string(),
                )
            })?;
            Ok(Grant {
                scope: Scope {
                    building: scope.building.clone(),
                    department: Some(department),
                },
            })
        }
        Action::RequestStatusChange | Action::AttachPhoto | Action::ViewRequest => Ok(Grant {
            scope: scope.clone(),
        }),
        Action::ApproveAnonymousRequest
        | Action::ReviewStatusChange
        | Action::OverrideStatus
        | Action::ReturnToWork
        | Action::UpdateRequest { .. }
        | Action::DeleteRequest
        | Action::ManageUsers => Err(UpkeepError::Forbidden(format!(
            "specialists are not authorized for {action:?}"
        ))),
    }
}

fn authorize_executor(principal: &Principal, action: Action, scope: &Scope) -> UpkeepResult<Grant> {
    check_department_scope(principal, scope)?;

    match action {
        Action::RequestStatusChange | Action::AttachPhoto | Action::ViewRequest => Ok(Grant {
            scope: scope.clone(),
        }),
        _ => Err(UpkeepError::Forbidden(format!(
            "executors are not authorized for {action:?}"
        ))),
    }
}

/// Shared Specialist/Executor scope rule: same building, and when the
/// principal has a department it must match the target's.
fn check_department_scope(principal: &Principal, scope: &Scope) -> UpkeepResult<()> {
    let building = home_building(principal)?;
    if *building != scope.building {
        return Err(UpkeepError::Forbidden(format!(
            "not authorized for building {}",
            scope.building
        )));
    }
    if let Some(department) = &principal.department {
        if scope.department.as_ref() != Some(department) {
            return Err(UpkeepError::Forbidden(format!(
                "not authorized for department {:?}",
                scope.department
            )));
        }
    }
    Ok(())
}

fn home_building(principal: &Principal) -> UpkeepResult<&upkeep_types::Building> {
    principal.building.as_ref().ok_or_else(|| {
        UpkeepError::Configuration(format!(
            "{:?} principal {} has no building assigned",
            principal.role, principal.id
        ))
    })
}

/// Read-side scope filter: whether `principal` may see `request`.
///
/// Same scope rules as [`authorize`] with [`Action::ViewRequest`], without
/// the error detail; used to filter request listings.
pub fn visible_to(principal: &Principal, request: &Request) -> bool {
    authorize(principal, Action::ViewRequest, &request.scope()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use upkeep_types::{Building, Department, PrincipalId};

    fn building(name: &str) -> Building {
        Building::new(name)
    }

    fn admin() -> Principal {
        Principal::new(PrincipalId::new("admin"), Role::Admin)
    }

    fn head(b: &str) -> Principal {
        Principal::new(PrincipalId::new("head"), Role::Head).with_building(building(b))
    }

    fn specialist(b: &str, dept: Option<&str>) -> Principal {
        let principal =
            Principal::new(PrincipalId::new("spec"), Role::Specialist).with_building(building(b));
        match dept {
            Some(d) => principal.with_department(Department::new(d)),
            None => principal,
        }
    }

    fn executor(b: &str, dept: &str) -> Principal {
        Principal::new(PrincipalId::new("exec"), Role::Executor)
            .with_building(building(b))
            .with_department(Department::new(dept))
    }

    #[test]
    fn admin_is_allowed_everywhere() {
        let scope = Scope::building(building("anywhere"));
        for action in [
            Action::CreateRequest,
            Action::ReviewStatusChange,
            Action::OverrideStatus,
            Action::ReturnToWork,
            Action::UpdateRequest {
                changes_building: true,
            },
            Action::ManageUsers,
        ] {
            assert!(authorize(&admin(), action, &scope).is_ok(), "{action:?}");
        }
    }

    #[test]
    fn head_is_confined_to_own_building() {
        let own = Scope::building(building("north"));
        let other = Scope::building(building("south"));

        assert!(authorize(&head("north"), Action::ReviewStatusChange, &own).is_ok());
        assert!(matches!(
            authorize(&head("north"), Action::ReviewStatusChange, &other),
            Err(UpkeepError::Forbidden(_))
        ));
    }

    #[test]
    fn head_cannot_move_requests_between_buildings() {
        let scope = Scope::building(building("north"));
        assert!(authorize(
            &head("north"),
            Action::UpdateRequest {
                changes_building: false
            },
            &scope
        )
        .is_ok());
        assert!(matches!(
            authorize(
                &head("north"),
                Action::UpdateRequest {
                    changes_building: true
                },
                &scope
            ),
            Err(UpkeepError::Forbidden(_))
        ));
    }

    #[test]
    fn deletion_is_admin_or_building_head_territory() {
        let own = Scope::building(building("north"));
        let other = Scope::building(building("south"));

        assert!(authorize(&admin(), Action::DeleteRequest, &other).is_ok());
        assert!(authorize(&head("north"), Action::DeleteRequest, &own).is_ok());
        assert!(matches!(
            authorize(&head("north"), Action::DeleteRequest, &other),
            Err(UpkeepError::Forbidden(_))
        ));
        let own_it = Scope::building(building("north")).with_department(Department::new("IT"));
        assert!(matches!(
            authorize(&specialist("north", Some("IT")), Action::DeleteRequest, &own_it),
            Err(UpkeepError::Forbidden(_))
        ));
        assert!(matches!(
            authorize(&executor("north", "IT"), Action::DeleteRequest, &own_it),
            Err(UpkeepError::Forbidden(_))
        ));
    }

    #[test]
    fn head_cannot_originate_status_change_requests() {
        let scope = Scope::building(building("north"));
        assert!(matches!(
            authorize(&head("north"), Action::RequestStatusChange, &scope),
            Err(UpkeepError::Forbidden(_))
        ));
    }

    #[test]
    fn specialist_creation_is_forced_into_own_department() {
        let scope = Scope::building(building("north"));
        let grant = authorize(&specialist("north", Some("IT")), Action::CreateRequest, &scope)
            .expect("scope-matched specialist may create");
        assert_eq!(grant.scope.department, Some(Department::new("IT")));
    }

    #[test]
    fn specialist_without_department_cannot_create() {
        let scope = Scope::building(building("north"));
        assert!(matches!(
            authorize(&specialist("north", None), Action::CreateRequest, &scope),
            Err(UpkeepError::Configuration(_))
        ));
    }

    #[test]
    fn specialist_department_must_match_target() {
        let scope = Scope::building(building("north")).with_department(Department::new("HVAC"));
        assert!(matches!(
            authorize(
                &specialist("north", Some("IT")),
                Action::RequestStatusChange,
                &scope
            ),
            Err(UpkeepError::Forbidden(_))
        ));
    }

    #[test]
    fn specialist_without_department_sees_whole_building() {
        let scope = Scope::building(building("north")).with_department(Department::new("HVAC"));
        assert!(authorize(&specialist("north", None), Action::ViewRequest, &scope).is_ok());
    }

    #[test]
    fn executor_only_originates_status_changes() {
        let scope = Scope::building(building("north")).with_department(Department::new("IT"));
        let executor = executor("north", "IT");

        assert!(authorize(&executor, Action::RequestStatusChange, &scope).is_ok());
        for action in [
            Action::CreateRequest,
            Action::OverrideStatus,
            Action::ReviewStatusChange,
            Action::ReturnToWork,
        ] {
            assert!(
                matches!(
                    authorize(&executor, action, &scope),
                    Err(UpkeepError::Forbidden(_))
                ),
                "{action:?}"
            );
        }
    }

    #[test]
    fn scoped_role_without_building_is_a_configuration_error() {
        let principal = Principal::new(PrincipalId::new("h"), Role::Head);
        let scope = Scope::building(building("north"));
        assert!(matches!(
            authorize(&principal, Action::ViewRequest, &scope),
            Err(UpkeepError::Configuration(_))
        ));
    }

    #[test]
    fn visibility_follows_scope_rules() {
        let request = Request::new("broken lock", building("north"))
            .with_department(Department::new("IT"));

        assert!(visible_to(&admin(), &request));
        assert!(visible_to(&head("north"), &request));
        assert!(!visible_to(&head("south"), &request));
        assert!(visible_to(&executor("north", "IT"), &request));
        assert!(!visible_to(&executor("north", "HVAC"), &request));
    }
}

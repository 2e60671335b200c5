//! Access policy for session data and aggregation triggers.
//!
//! Every check here is evaluated per request. Nothing is cached between a
//! listing call and a single-screenshot fetch.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roles::{is_elevated, ROLE_DEPARTMENT_HEAD};
use crate::types::DbId;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: DbId,
    pub role: String,
}

impl Requester {
    pub fn new(user_id: DbId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }

    pub fn is_elevated(&self) -> bool {
        is_elevated(&self.role)
    }

    pub fn is_department_head(&self) -> bool {
        self.role == ROLE_DEPARTMENT_HEAD
    }
}

/// Directory view of an employee, read from the HR collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeProfile {
    pub employee_id: DbId,
    pub department_id: Option<DbId>,
    /// User id of the head of `department_id`, if any.
    pub department_head_id: Option<DbId>,
}

impl EmployeeProfile {
    /// Profile for an employee the directory does not know about.
    pub fn unassigned(employee_id: DbId) -> Self {
        Self {
            employee_id,
            department_id: None,
            department_head_id: None,
        }
    }
}

/// Whether `requester` may read data belonging to `owner`.
///
/// Allowed for the owner themself, elevated roles, and the head of the
/// owner's department.
pub fn can_view_employee(requester: &Requester, owner: &EmployeeProfile) -> bool {
    if requester.user_id == owner.employee_id || requester.is_elevated() {
        return true;
    }
    requester.is_department_head() && owner.department_head_id == Some(requester.user_id)
}

/// Fail closed with 403 unless [`can_view_employee`] allows access.
pub fn authorize_view(requester: &Requester, owner: &EmployeeProfile) -> Result<(), CoreError> {
    if can_view_employee(requester, owner) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(
            "Not allowed to access this employee's sessions".into(),
        ))
    }
}

/// Single-employee aggregation: self or elevated role.
pub fn authorize_aggregate(requester: &Requester, employee_id: DbId) -> Result<(), CoreError> {
    if requester.user_id == employee_id || requester.is_elevated() {
        Ok(())
    } else {
        Err(CoreError::Forbidden(
            "Only the employee or an administrator may aggregate these samples".into(),
        ))
    }
}

/// Which employees a bulk sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    All,
    /// Employees whose department is headed by this user.
    DepartmentOf(DbId),
}

impl SweepScope {
    pub fn includes(&self, profile: &EmployeeProfile) -> bool {
        match self {
            Self::All => true,
            Self::DepartmentOf(head_id) => profile.department_head_id == Some(*head_id),
        }
    }
}

/// Resolve the sweep scope for a `processAll` request.
pub fn sweep_scope_for(requester: &Requester) -> Result<SweepScope, CoreError> {
    if requester.is_elevated() {
        Ok(SweepScope::All)
    } else if requester.is_department_head() {
        Ok(SweepScope::DepartmentOf(requester.user_id))
    } else {
        Err(CoreError::Forbidden(
            "Bulk aggregation requires an administrator or department head".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

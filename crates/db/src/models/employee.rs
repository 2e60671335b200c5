//! Directory projection used for access checks.

use sqlx::FromRow;
use worktrace_core::access::EmployeeProfile;
use worktrace_core::types::DbId;

/// An employee joined with the head of their department.
#[derive(Debug, Clone, FromRow)]
pub struct EmployeeRow {
    pub employee_id: DbId,
    pub department_id: Option<DbId>,
    pub department_head_id: Option<DbId>,
}

impl From<EmployeeRow> for EmployeeProfile {
    fn from(row: EmployeeRow) -> Self {
        Self {
            employee_id: row.employee_id,
            department_id: row.department_id,
            department_head_id: row.department_head_id,
        }
    }
}

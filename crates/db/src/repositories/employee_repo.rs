//! Read-only access to the HR directory tables.

use sqlx::PgPool;
use worktrace_core::types::DbId;

use crate::models::employee::EmployeeRow;

pub struct EmployeeRepo;

impl EmployeeRepo {
    /// Load an employee with the head of their department.
    pub async fn find_profile(
        pool: &PgPool,
        employee_id: DbId,
    ) -> Result<Option<EmployeeRow>, sqlx::Error> {
        sqlx::query_as::<_, EmployeeRow>(
            "SELECT e.id AS employee_id, e.department_id, d.head_id AS department_head_id \
             FROM employees e \
             LEFT JOIN departments d ON d.id = e.department_id \
             WHERE e.id = $1",
        )
        .bind(employee_id)
        .fetch_optional(pool)
        .await
    }
}

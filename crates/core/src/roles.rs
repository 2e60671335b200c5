//! Well-known role name constants.
//!
//! These must match the role names issued by the identity provider in the
//! `role` claim of access tokens.

pub const ROLE_SUPER_ADMIN: &str = "super_admin";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_DEPARTMENT_HEAD: &str = "department_head";
pub const ROLE_EMPLOYEE: &str = "employee";

/// Roles that may read every employee's sessions.
pub const ELEVATED_ROLES: &[&str] = &[ROLE_SUPER_ADMIN, ROLE_ADMIN];

/// Whether `role` is one of the [`ELEVATED_ROLES`].
pub fn is_elevated(role: &str) -> bool {
    ELEVATED_ROLES.contains(&role)
}

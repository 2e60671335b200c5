//! Row structs for the session service tables.
//!
//! Each submodule maps one family of tables to `FromRow` structs and
//! converts them into the domain types of `worktrace-core`.

pub mod employee;
pub mod sample;
pub mod screenshot;
pub mod settings;
pub mod work_session;

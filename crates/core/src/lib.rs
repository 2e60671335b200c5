//! Domain logic for turning raw employee telemetry into work sessions.
//!
//! Everything in this crate is storage-agnostic: persistence goes through
//! the [`store::SessionStore`] trait, implemented by `worktrace-db` for
//! Postgres and by [`store::memory::InMemoryStore`] for tests.

pub mod access;
pub mod analytics;
pub mod error;
pub mod roles;
pub mod samples;
pub mod screenshot;
pub mod session;
pub mod settings;
pub mod store;
pub mod types;
pub mod windowing;

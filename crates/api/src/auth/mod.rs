//! Bearer-token verification.
//!
//! Tokens are issued by the external identity service; this crate only
//! verifies them.
//!
//! - [`jwt`] -- HS256 access-token validation (and generation for tooling/tests).

pub mod jwt;

//! Authentication module for Opsflow

#[cfg(test)]
mod edge_case_tests;
pub mod expiry;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod refresh;
pub mod service;
pub mod sessions;

pub use jwt::{AccessClaims, JwtManager, RefreshClaims};
pub use middleware::{require_admin, require_auth, AuthState, AuthUser, BearerToken};
pub use password::{hash_password, validate_password_strength, verify_password};
pub use service::{AuthOutcome, AuthService, RegisterOutcome, TokenPair, UserSummary};

// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Opsflow API Library
//!
//! This crate contains the API server components for Opsflow: credential
//! and session management, role-based authorization, the workflow store,
//! sandboxed workflow execution, the token-expiry push channel, and the
//! periodic cleanup task.

pub mod auth;
pub mod authz;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod execution;
pub mod routes;
pub mod state;
pub mod websocket;
pub mod workflows;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

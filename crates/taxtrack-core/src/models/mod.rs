//! Data models for the taxtrack REST API.
//!
//! - `AuthTokens`, `LoginRequest`, `RegisterRequest`, `AuthSession`, `User`:
//!   authentication payloads
//! - `TaxSummary`, `QuarterlyEstimate`: the dashboard summary
//! - `ApiEnvelope`: the `{ "data": ... }` wrapper every success body uses

pub mod auth;
pub mod tax;

pub use auth::{AuthSession, AuthTokens, LoginRequest, RefreshRequest, RegisterRequest, User};
pub use tax::{QuarterlyEstimate, TaxSummary};

use serde::{Deserialize, Serialize};

/// Success response wrapper: `{ "data": T }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

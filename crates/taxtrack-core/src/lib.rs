//! Core library for taxtrack.
//!
//! Provides the authenticated API client with transparent token refresh,
//! the session and token storage layer, REST models, dashboard data, and
//! display formatting helpers.

pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiRequest, ClientConfig, ErrorKind};
pub use auth::{Session, SessionEvent, TerminationReason};
pub use config::Config;
pub use dashboard::{load_dashboard, Dashboard};

//! REST API client module for the taxtrack backend.
//!
//! This module provides the `ApiClient` for communicating with the
//! taxtrack API, the `ApiRequest` descriptor it sends, and helpers for
//! turning errors into messages fit for the user.
//!
//! The API uses JWT bearer token authentication. Expired access tokens are
//! refreshed transparently through `POST /auth/refresh`.

pub mod client;
pub mod error;
pub mod message;
pub mod request;

pub use client::{ApiClient, ClientConfig};
pub use error::{ApiError, ErrorKind};
pub use message::{api_error_message, error_message, error_message_any, FALLBACK_ERROR_MESSAGE};
pub use request::{ApiRequest, Attempt};

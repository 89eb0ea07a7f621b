//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `Session`: access/refresh token ownership with a write-through cache
//!   and session lifecycle events
//! - `TokenStore`: persistent token storage (file, OS keychain, memory)

pub mod session;
pub mod store;

pub use session::{Session, SessionEvent, TerminationReason};
pub use store::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, StoreError, TokenKey, TokenStore,
};

//! The signed-in user's credentials and the events published as they change.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::store::{StoreError, TokenKey, TokenStore};
use crate::models::AuthTokens;

/// Buffered session events per subscriber before old ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A request was rejected and there was no refresh token to recover with
    MissingRefreshToken,
    /// The refresh endpoint rejected the refresh token (or could not be reached)
    RefreshRejected,
    /// The user logged out
    LoggedOut,
}

/// Notifications the session publishes to the hosting application.
///
/// `Terminated` replaces a hard redirect to the login screen: the host
/// decides whether to prompt, exit, or navigate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New credentials were issued by login or registration
    Started,
    /// Credentials were replaced by a refresh
    Refreshed,
    Terminated(TerminationReason),
}

enum CachedToken {
    Unloaded,
    Loaded(Option<String>),
}

/// Owns the credentials of the signed-in user.
///
/// The access token is cached in process and written through to the
/// persistent store on every change. The store is read back at most once,
/// on first access. The refresh token is never cached.
pub struct Session {
    store: Arc<dyn TokenStore>,
    access: RwLock<CachedToken>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session that hydrates lazily on first access.
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            access: RwLock::new(CachedToken::Unloaded),
            events,
        }
    }

    /// Create a session at app start, optionally hydrating from the store now.
    pub fn init(store: Arc<dyn TokenStore>, hydrate: bool) -> Result<Self, StoreError> {
        let session = Self::new(store);
        if hydrate {
            let token = session.access_token()?;
            debug!(has_token = token.is_some(), "Session hydrated");
        }
        Ok(session)
    }

    /// Current access token, from the cache or (first time only) the store.
    pub fn access_token(&self) -> Result<Option<String>, StoreError> {
        {
            let cached = self.access.read().unwrap_or_else(PoisonError::into_inner);
            if let CachedToken::Loaded(token) = &*cached {
                return Ok(token.clone());
            }
        }

        let mut cached = self.access.write().unwrap_or_else(PoisonError::into_inner);
        if let CachedToken::Loaded(token) = &*cached {
            return Ok(token.clone());
        }
        let token = self.store.get(TokenKey::Access)?;
        *cached = CachedToken::Loaded(token.clone());
        Ok(token)
    }

    /// Replace the access token in both the store and the cache.
    /// `None` clears both.
    pub fn set_access_token(&self, token: Option<&str>) -> Result<(), StoreError> {
        let mut cached = self.access.write().unwrap_or_else(PoisonError::into_inner);
        match token {
            Some(token) => self.store.set(TokenKey::Access, token)?,
            None => self.store.remove(TokenKey::Access)?,
        }
        *cached = CachedToken::Loaded(token.map(str::to_string));
        Ok(())
    }

    /// Current refresh token, always read from the store.
    pub fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(TokenKey::Refresh)
    }

    pub fn set_refresh_token(&self, token: Option<&str>) -> Result<(), StoreError> {
        match token {
            Some(token) => self.store.set(TokenKey::Refresh, token),
            None => self.store.remove(TokenKey::Refresh),
        }
    }

    /// Replace both credentials with a freshly issued pair.
    pub fn set_tokens(&self, tokens: &AuthTokens) -> Result<(), StoreError> {
        self.set_access_token(Some(&tokens.access_token))?;
        self.set_refresh_token(Some(&tokens.refresh_token))
    }

    /// Remove both credentials from the cache and the store.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.set_access_token(None)?;
        self.set_refresh_token(None)?;
        info!("Session cleared");
        Ok(())
    }

    /// True when an access token is held. Store errors count as signed out.
    pub fn is_authenticated(&self) -> bool {
        match self.access_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                false
            }
        }
    }

    /// True when either token is stored, including a refresh token left
    /// behind after the access token was dropped.
    pub fn has_credentials(&self) -> Result<bool, StoreError> {
        Ok(self.access_token()?.is_some() || self.refresh_token()?.is_some())
    }

    /// Receive session events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        // No subscribers is fine; the event is simply dropped
        let _ = self.events.send(event);
    }
}

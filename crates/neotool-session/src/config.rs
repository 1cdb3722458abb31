//! Session configuration.

use std::time::Duration;

use neotool_core::{
    UserId,
    types::{LoginData, TokenInfo},
};

/// Wait between failed attempts of every retry loop.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a [`crate::ConnectionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Forwarding id registered with the backend after every connect.
    ///
    /// Other clients address forwarded messages to this id.
    pub client_id: String,
    /// Initially focused liver.
    pub liver_uid: Option<UserId>,
    /// Credentials for a fresh login; anonymous when absent.
    pub login_data: Option<LoginData>,
    /// Token to resume with instead of logging in.
    ///
    /// Only the first connection uses it. Tokens are cleared on disconnect,
    /// and a rejected token falls back to a fresh login.
    pub token: Option<TokenInfo>,
    /// Fixed interval between retries of every loop.
    pub retry_interval: Duration,
}

impl SessionConfig {
    /// Configuration for `client_id` with everything else defaulted.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), ..Self::default() }
    }

    /// Set the initially focused liver.
    #[must_use]
    pub fn with_liver_uid(mut self, liver_uid: UserId) -> Self {
        self.liver_uid = Some(liver_uid);
        self
    }

    /// Set login credentials.
    #[must_use]
    pub fn with_login_data(mut self, login_data: LoginData) -> Self {
        self.login_data = Some(login_data);
        self
    }

    /// Set a token to resume with.
    #[must_use]
    pub fn with_token(mut self, token: TokenInfo) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            liver_uid: None,
            login_data: None,
            token: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

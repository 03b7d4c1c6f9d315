//! Bearer token sources for the hosting API.
//!
//! Token acquisition and refresh live outside this crate; a provider only
//! has to hand back a currently valid access token when a request is made.

use std::env;

use crate::remote::RemoteError;

/// Environment variable consulted when no token is passed explicitly
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Result<String, RemoteError>;
}

impl<T: CredentialProvider + ?Sized> CredentialProvider for Box<T> {
    fn bearer_token(&self) -> Result<String, RemoteError> {
        (**self).bearer_token()
    }
}

/// Token supplied up front
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Result<String, RemoteError> {
        non_empty(&self.0, "empty access token")
    }
}

/// Token read from an environment variable on every request
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(ACCESS_TOKEN_ENV)
    }
}

impl CredentialProvider for EnvToken {
    fn bearer_token(&self) -> Result<String, RemoteError> {
        let value = env::var(&self.var)
            .map_err(|_| RemoteError::Credentials(format!("{} is not set", self.var)))?;
        non_empty(&value, &format!("{} is empty", self.var))
    }
}

fn non_empty(token: &str, message: &str) -> Result<String, RemoteError> {
    let token = token.trim();
    if token.is_empty() {
        Err(RemoteError::Credentials(message.to_string()))
    } else {
        Ok(token.to_string())
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, Scope, ScopeRef, TokenType, TokenTypeRef};

/// An access credential as issued by an authority
///
/// The serialized shape matches a standard OAuth2 token endpoint response, so
/// an acquirer can deserialize a response body straight into this type.
/// Once acquired, a credential is never modified; a renewal publishes a new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    access_token: AccessToken,
    token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<Scope>,
    expires_in: u64,
}

impl Credential {
    /// Constructs a new credential
    pub fn new(
        access_token: impl Into<AccessToken>,
        token_type: impl Into<TokenType>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            scope: None,
            expires_in,
        }
    }

    /// Constructs a new `Bearer` credential
    pub fn bearer(access_token: impl Into<AccessToken>, expires_in: u64) -> Self {
        Self::new(access_token, TokenType::from_static("Bearer"), expires_in)
    }

    /// Attaches the scope granted to the credential
    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token type
    #[inline]
    pub fn token_type(&self) -> &TokenTypeRef {
        &self.token_type
    }

    /// Gets the granted scope, if reported
    #[inline]
    pub fn scope(&self) -> Option<&ScopeRef> {
        self.scope.as_deref()
    }

    /// Gets the lifetime reported by the authority, in seconds
    #[inline]
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Gets the lifetime reported by the authority
    #[inline]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }

    /// Formats the value of an `Authorization` header carrying this credential
    ///
    /// The value is the token type followed by a single space and the access token.
    pub fn authorization_value(&self) -> String {
        let mut value = String::with_capacity(
            self.token_type.as_str().len() + 1 + self.access_token.as_str().len(),
        );
        value.push_str(self.token_type.as_str());
        value.push(' ');
        value.push_str(self.access_token.as_str());
        value
    }
}

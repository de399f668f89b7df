//! A credential source that never changes

use std::convert::Infallible;

use async_trait::async_trait;

use super::CredentialAcquirer;
use crate::Credential;

/// A credential source that always yields the same credential
///
/// Useful for static configuration and for testing consumers of a manager.
#[derive(Clone, Debug)]
pub struct ConstCredentialSource {
    credential: Credential,
}

impl ConstCredentialSource {
    /// Constructs a source yielding `credential` on every acquisition
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    /// Constructs a source yielding a `Bearer` credential with a one hour lifetime
    pub fn bearer(access_token: impl Into<crate::AccessToken>) -> Self {
        Self::new(Credential::bearer(access_token, 3600))
    }
}

#[async_trait]
impl CredentialAcquirer for ConstCredentialSource {
    type Error = Infallible;

    async fn acquire(&mut self) -> Result<Credential, Self::Error> {
        Ok(self.credential.clone())
    }
}

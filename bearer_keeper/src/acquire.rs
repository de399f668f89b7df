//! Sources of credentials

use crate::Credential;
use async_trait::async_trait;
use std::error;

mod constant;

pub use constant::ConstCredentialSource;

/// An asynchronous source of credentials
///
/// The manager calls [`acquire`][CredentialAcquirer::acquire] once per generation and again
/// after every failure, so implementations must be safe to retry.
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    /// The error type returned in the event that acquiring a credential fails
    type Error: error::Error + Send + Sync + 'static;

    /// Acquires a fresh credential
    async fn acquire(&mut self) -> Result<Credential, Self::Error>;
}

#[async_trait]
impl<A: CredentialAcquirer + ?Sized> CredentialAcquirer for Box<A> {
    type Error = A::Error;

    async fn acquire(&mut self) -> Result<Credential, Self::Error> {
        (**self).acquire().await
    }
}

//! Background management of a single client-credentials access token
//!
//! A [`CredentialManager`] owns a background task that acquires a credential from a
//! [`CredentialAcquirer`][acquire::CredentialAcquirer], publishes it for any number of
//! concurrent readers, and renews it on a schedule so that callers are never handed a
//! credential that is about to expire. Callers never make token requests themselves;
//! they read the current credential or attach it to outgoing requests.
//!
//! # Lifecycle
//!
//! Each acquire-publish-wait cycle is a [`Generation`]. Before a generation's credential
//! is acquired, a fresh [`ReadinessGate`] is installed for it; publishing the credential
//! signals that gate, releasing anyone waiting on it.
//!
//! Renewal happens on a fixed interval by default (59 minutes, suiting one hour
//! credentials), independent of the lifetime the authority reports. Clearing the interval
//! renews a configurable buffer ahead of the reported expiry instead. See
//! [`ManagerConfig`] for the details.
//!
//! A failed acquisition is never fatal. The loop waits out a retry delay and tries again,
//! forever, and the previously published credential stays available in the meantime.
//!
//! ```
//! use std::time::Duration;
//!
//! use bearer_keeper::{acquire::ConstCredentialSource, CredentialManager, ManagerConfig};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), bearer_keeper::ConfigError> {
//! let config = ManagerConfig::default()
//!     .with_renewal_interval(Duration::from_secs(59 * 60))
//!     .on_renewed(|credential| {
//!         tracing::info!(expires_in = credential.expires_in(), "new credential");
//!     });
//!
//! let manager = CredentialManager::spawn(ConstCredentialSource::bearer("abc"), config)?;
//! manager.wait_until_ready().await;
//!
//! let mut request = http::Request::get("https://example.com").body(()).unwrap();
//! manager.apply_to(&mut request);
//! assert_eq!(request.headers()[http::header::AUTHORIZATION], "Bearer abc");
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `reqwest` (default): implements [`AuthorizeRequest`][request::AuthorizeRequest] for
//!   `reqwest::Request`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod acquire;
pub mod backoff;
mod braids;
mod config;
mod credential;
mod gate;
mod lifecycle;
mod manager;
pub mod request;
mod store;

pub use braids::*;
pub use config::{ConfigError, ManagerConfig, RenewalHook, Schedule};
pub use credential::Credential;
pub use gate::{Generation, ReadinessGate};
pub use manager::{CredentialHandle, CredentialManager, ManagerError};

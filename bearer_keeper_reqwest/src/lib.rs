//! Middleware to automatically attach a managed credential to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthorizationMiddleware`] in the middleware stack to use the
//! current credential held by a [`CredentialHandle`] for each outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required. Until the
//! manager has published its first credential, requests pass through
//! without an `Authorization` header.
//!
//! ```
//! use bearer_keeper::{acquire::ConstCredentialSource, CredentialManager, ManagerConfig};
//! use bearer_keeper_reqwest::AuthorizationMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let manager = CredentialManager::spawn(
//!     ConstCredentialSource::bearer("token"),
//!     ManagerConfig::default(),
//! )
//! .unwrap();
//! manager.wait_until_ready().await;
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthorizationMiddleware::new(manager.handle()))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add a credential only
//! conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that the credential is only sent to specific backends.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a credential to a request.
//!
//! ```
//! use bearer_keeper_reqwest::{AuthorizationMiddleware, ExactHostMatch, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//! # use bearer_keeper::{acquire::ConstCredentialSource, CredentialManager, ManagerConfig};
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let manager = CredentialManager::spawn(ConstCredentialSource::bearer("token"), ManagerConfig::default()).unwrap();
//!
//! AuthorizationMiddleware::new(manager.handle())
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")));
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bearer_keeper::{request::authorization_header, CredentialHandle};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that injects the managed credential into outgoing requests
#[derive(Clone, Debug)]
pub struct AuthorizationMiddleware<P> {
    credentials: CredentialHandle,
    predicate: P,
}

impl AuthorizationMiddleware<HttpsOnly> {
    /// Construct a new middleware from a credential handle
    ///
    /// By default, this middleware will only send the credential if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(credentials: CredentialHandle) -> Self {
        Self {
            credentials,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthorizationMiddleware<P> {
        AuthorizationMiddleware {
            credentials: self.credentials,
            predicate,
        }
    }
}

impl<P> AuthorizationMiddleware<P> {
    fn current_header_value(&self) -> Option<header::HeaderValue> {
        let credential = self.credentials.current()?;

        tracing::trace!(
            credential.generation = ?self.credentials.generation(),
            credential.token_type = credential.token_type().as_str(),
            credential.expires_in = credential.expires_in(),
            "obtained credential"
        );

        authorization_header(&credential)
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AuthorizationMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            match self.current_header_value() {
                Some(value) => {
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                None => {
                    tracing::debug!("no credential available, sending request without one");
                }
            }
        }

        next.run(req, extensions).await
    }
}

/// Only attach a credential if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach a credential if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url()
                        .host_str()
                        .unwrap_or("<value not valid utf-8>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}

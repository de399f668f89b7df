//! Attaching credentials to outgoing requests

use bytes::{BufMut, BytesMut};
use http::{header, HeaderMap, HeaderValue};

use crate::Credential;

/// An outgoing request that can carry an `Authorization` header
pub trait AuthorizeRequest {
    /// The request's mutable header map
    fn authorization_headers(&mut self) -> &mut HeaderMap;
}

impl AuthorizeRequest for HeaderMap {
    #[inline]
    fn authorization_headers(&mut self) -> &mut HeaderMap {
        self
    }
}

impl<B> AuthorizeRequest for http::Request<B> {
    #[inline]
    fn authorization_headers(&mut self) -> &mut HeaderMap {
        self.headers_mut()
    }
}

impl AuthorizeRequest for http::request::Parts {
    #[inline]
    fn authorization_headers(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
impl AuthorizeRequest for reqwest::Request {
    #[inline]
    fn authorization_headers(&mut self) -> &mut HeaderMap {
        self.headers_mut()
    }
}

/// Builds a sensitive `Authorization` header value for `credential`
///
/// Returns `None` if the token type or access token contain bytes that are not
/// permitted in a header value.
pub fn authorization_header(credential: &Credential) -> Option<HeaderValue> {
    let token_type = credential.token_type().as_str();
    let access_token = credential.access_token().as_str();

    let mut header_value = BytesMut::with_capacity(token_type.len() + 1 + access_token.len());
    header_value.put_slice(token_type.as_bytes());
    header_value.put_u8(b' ');
    header_value.put_slice(access_token.as_bytes());

    match HeaderValue::from_maybe_shared(header_value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!(
                token_type,
                "credential cannot be expressed as an authorization header value"
            );
            None
        }
    }
}

/// Sets the `Authorization` header of `request`, replacing any existing value
pub(crate) fn apply<R: AuthorizeRequest + ?Sized>(request: &mut R, credential: &Credential) -> bool {
    match authorization_header(credential) {
        Some(value) => {
            request
                .authorization_headers()
                .insert(header::AUTHORIZATION, value);
            true
        }
        None => false,
    }
}

use crate::error::BearerTokenError;
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::fmt;
use std::path::Path;

/// `Authorization: Bearer <token>` injected into requests that carry no
/// credentials of their own.
#[derive(Clone)]
pub struct BearerToken {
    header: HeaderValue,
}

impl BearerToken {
    pub fn load(path: &Path) -> Result<Self, BearerTokenError> {
        let raw = std::fs::read(path).map_err(|source| BearerTokenError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&raw).map_err(|e| match e {
            TokenValueError::Empty => BearerTokenError::Empty(path.to_path_buf()),
            TokenValueError::Invalid => BearerTokenError::InvalidHeaderValue(path.to_path_buf()),
        })
    }

    fn from_bytes(raw: &[u8]) -> Result<Self, TokenValueError> {
        let token = raw.trim_ascii();
        if token.is_empty() {
            return Err(TokenValueError::Empty);
        }

        let mut value = b"Bearer ".to_vec();
        value.extend_from_slice(token);
        let mut header = HeaderValue::from_bytes(&value).map_err(|_| TokenValueError::Invalid)?;
        header.set_sensitive(true);

        Ok(Self { header })
    }

    /// Adds the token unless an `Authorization` header is already present.
    /// Returns whether the header was added.
    pub fn inject(&self, headers: &mut HeaderMap) -> bool {
        if headers.contains_key(AUTHORIZATION) {
            return false;
        }
        headers.insert(AUTHORIZATION, self.header.clone());
        true
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

enum TokenValueError {
    Empty,
    Invalid,
}

use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::request::Request;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait CredentialsProvider: Send + Sync {
    /// `Ok(None)` means the call proceeds anonymously.
    fn credentials(&self) -> Result<Option<Credentials>, BoxError>;
}

#[derive(Clone, Debug)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn credentials(&self) -> Result<Option<Credentials>, BoxError> {
        Ok(Some(self.credentials.clone()))
    }
}

/// Request signing algorithm.
///
/// Signers read the signing time from [`Request::signing_time`], which applies the clock
/// offset corrected by the engine.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut Request, credentials: Option<&Credentials>) -> Result<(), BoxError>;

    /// Whether the signer still runs when no credentials were resolved.
    fn signs_anonymously(&self) -> bool {
        false
    }
}

pub trait SignerProvider: Send + Sync {
    fn signer(&self, request: &Request) -> Option<Arc<dyn Signer>>;
}

/// Hands out the same signer for every request.
#[derive(Clone)]
pub struct FixedSignerProvider {
    signer: Arc<dyn Signer>,
}

impl FixedSignerProvider {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }
}

impl SignerProvider for FixedSignerProvider {
    fn signer(&self, _request: &Request) -> Option<Arc<dyn Signer>> {
        Some(Arc::clone(&self.signer))
    }
}

impl fmt::Debug for FixedSignerProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("FixedSignerProvider").finish_non_exhaustive()
    }
}

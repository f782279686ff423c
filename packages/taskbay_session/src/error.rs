//! Error types for the auth endpoints and the token supplier.

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("no session tokens installed")]
    NotAuthenticated,

    /// The server answered with a definitive 4xx. For a refresh call this
    /// means the refresh token itself is no longer honored.
    #[error("auth request rejected by server (http {status})")]
    Rejected { status: u16 },

    /// Network-level failure or a 5xx: the request may succeed later.
    #[error("auth request failed: {0}")]
    Network(String),

    #[error("malformed auth response: {0}")]
    MalformedResponse(String),
}

impl SessionError {
    /// A fatal error means the session cannot recover by retrying: the
    /// refresh token was rejected and the user has to sign in again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

//! Session-token lifecycle for the Taskbay realtime client.
//!
//! Owns the access/refresh pair: durable storage, proactive refresh inside
//! a configurable margin, single-flight refresh collapsing, and rotation
//! notifications for the transports that authenticate with the token.

pub mod api;
pub mod error;
pub mod storage;
pub mod supplier;
pub mod token;

pub use api::{AuthApi, OauthLink};
pub use error::SessionError;
pub use storage::TokenStorage;
pub use supplier::{SessionEvent, TokenSupplier};
pub use token::{AccessToken, TokenPair};

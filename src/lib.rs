//! HomeWidget Rust Client
//!
//! A Rust client library for the HomeWidget backend API, with bearer-token
//! authorization, single-flight token refresh, retry-once semantics and a
//! session state machine driving authenticated/unauthenticated routing.

pub mod api_client;
pub mod error;
pub mod session;
pub mod token_store;
pub mod types;

pub use api_client::{ApiClient, ApiClientConfig, ConfigureOptions, RequestOptions, SessionHooks};
pub use error::{ApiBody, ClientError, Result};
pub use session::Session;
pub use token_store::{MemoryTokenStore, TokenStore};
pub use types::{Notice, Role, SessionStatus, TokenPair, UnauthorizedReason, UserRead};

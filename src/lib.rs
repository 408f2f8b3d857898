// Ticketing session - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use auth::SessionManager;
pub use error::{Result, SessionError};
pub use http_client::AuthorizedClient;

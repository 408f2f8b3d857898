// Authentication module
// Manages the credential set, silent refresh and the session API

pub mod access;
pub mod credentials;
mod manager;
pub mod refresh;
pub mod scheduler;
pub mod token;
pub mod types;

pub use credentials::{CredentialStorage, CredentialStore, MemoryStorage, SqliteStorage};
pub use manager::SessionManager;
pub use types::{AuthSession, LoginRequest, RegisterForm, SessionState, TokenPair, UserProfile};

//! Console Session Client
//!
//! Client-side session lifecycle for the operations console: persisted
//! access/refresh tokens, local expiry checks, silent refresh, inactivity
//! logout, and the authenticated REST client every other call goes through.

pub mod api;
pub mod config;
pub mod error;
pub mod inactivity;
pub mod refresh;
pub mod session;
pub mod token_store;
pub mod types;
pub mod validator;

pub use api::ApiClient;
pub use config::SessionConfig;
pub use error::{ClientError, Result};
pub use inactivity::{ActivityEvent, InactivityMonitor, MonitorPhase};
pub use refresh::RefreshCoordinator;
pub use session::{LogoutReason, Session, SessionManager};
pub use token_store::TokenStore;
pub use types::{AuthTokens, Role, RoleFlags, User};

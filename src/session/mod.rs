//! Cookie sessions: token storage, per-request identity resolution and the
//! `/auth` endpoints.

pub mod cookies;
pub mod filter;
pub mod handlers;

pub use cookies::{CookieSettings, SessionTokens};
pub use filter::{SessionFilter, apply_identity_headers, session_middleware};
pub use handlers::AuthState;

//! Authentication module (first-party session validation only)

pub mod session;

pub use session::{
    extract_token, session_auth_middleware, AuthContext, JwtVerifier, SessionClaims,
};

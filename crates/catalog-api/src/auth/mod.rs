//! Authentication
//!
//! - [`credentials`]: bcrypt hashing and random token generation
//! - [`validator`]: bearer-token validation with a short-lived cache
//! - [`oauth2`]: the token and revocation endpoints

pub mod credentials;
pub mod oauth2;
pub mod validator;

pub use validator::{Principal, TokenValidator};

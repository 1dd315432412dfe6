//! Authentication and authorization
//!
//! - JWT issuance and validation for the login gateway
//! - Argon2 password hashing
//! - Role-based policy for agreement operations

pub mod jwt;
pub mod password;
pub mod permissions;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use password::{hash_password, verify_password};
pub use permissions::{authorize, Action, Actor, Resource, Role};

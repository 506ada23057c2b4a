pub mod middleware;
pub mod tokens;

pub use tokens::{authenticate, AuthFailure, Identity};

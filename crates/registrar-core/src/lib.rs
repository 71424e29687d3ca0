//! registrar-core: shared team/member types and validation
//!
//! Kept free of I/O and of an async runtime dependency so it can be reused by
//! anything that needs to speak the same shapes as the server (a future admin
//! client, a test harness) without pulling in sqlx/axum/tokio.

pub mod errors;
pub mod types;
pub mod validation;

pub use errors::*;
pub use types::*;
pub use validation::*;

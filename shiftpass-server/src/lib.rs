//! ShiftPass domain server.
//!
//! Hands out registration tokens, binds device keys to employees, verifies
//! signed attendance requests and resolves which terminal at a register an
//! event happened on.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod registration;
pub mod replay;
pub mod resolver;
pub mod server;
pub mod storage;
pub mod verifier;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, AppState};
pub use storage::Storage;

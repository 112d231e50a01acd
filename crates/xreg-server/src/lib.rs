//! xreg Server - HTTP access to the metadata registry
//!
//! Every request runs as one transaction: the tree is loaded from the
//! storage backend, mutated by a core operation and its changes committed.

pub mod error;
pub mod routes;
pub mod server;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use routes::create_router;
pub use server::{run_server, ServerConfig, DEFAULT_LISTEN};
pub use service::{Action, RegistryService, Reply};

//! Webshop Backend
//!
//! Process supervisor for the webshop's network servers. The heavy lifting
//! (listener lifecycle, graceful shutdown, health propagation, panic
//! isolation) lives in `server-core`; this crate wires it together:
//!
//! - Loads and validates [`core_config::ServerConfig`] from the environment
//! - Initializes environment-aware tracing
//! - Runs the HTTP server (liveness, metrics, storefront routes) and the
//!   gRPC server (health, reflection) side by side
//! - Turns SIGINT/SIGTERM into coordinated teardown of both
//!
//! ## Modules
//!
//! - `server`: supervisor loop and teardown ordering
//! - `routes`: HTTP route table handed to the server

pub mod routes;
pub mod server;

// Re-export for convenience
pub use server::run;

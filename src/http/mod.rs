//! HTTP submission surface.
//!
//! Enabled by `http.enabled` in the configuration. Routes are fixed when the
//! server starts.

mod server;

pub use server::{HttpState, build_router, serve};

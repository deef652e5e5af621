//! HTTP surface for Shortcast.
//!
//! Serves the keep-alive health probe, the scheduler status view and the
//! manual trigger endpoint.

mod error;
mod routes;

pub use error::WebError;
pub use routes::{AppState, bind, create_router, serve, serve_on};

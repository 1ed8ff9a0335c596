//! Middlewares for the HTTP server.
//!
//! This module exposes tower [layers](tower::Layer) and axum middleware functions. See
//! [`make_app`](crate::server::make_app) for where they are registered.

mod handle_panic;
mod metrics;
mod trace;

pub use self::handle_panic::*;
pub use self::metrics::*;
pub use self::trace::*;

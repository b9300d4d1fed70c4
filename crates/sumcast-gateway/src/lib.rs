//! HTTP gateway streaming sumcast events to subscribers.
//!
//! [`Gateway`] serves the event log over SSE with ordered admission
//! control (token, IP allow-list, UA allow-list, per-IP rate window,
//! global cap), per-connection throttling, and a resync endpoint for
//! clients that fell behind.

pub mod admission;
pub mod config;
pub mod error;
pub mod server;
pub mod stream;

pub use admission::{AdmissionControl, Admitted, ConnectionLimiter, Rejection};
pub use config::{GatewayConfig, RateSpec};
pub use error::{GatewayError, Result};
pub use server::{create_router, AppState, Gateway};
pub use stream::EventStream;

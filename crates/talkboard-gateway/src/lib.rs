//! HTTP gateway for the Talkboard pipeline.
//!
//! Exposes each pipeline stage as its own JSON endpoint (transcribe, plan,
//! symbol search and filter, interpret, speak), plus `/api/suggest` for a
//! full plan, retrieve and rank run under the per-session guard.

pub mod error;
pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{router, start_gateway};
pub use state::GatewayState;

//! myocast - EMG armband capture service.
//!
//! Wires the capture core from `myocapture` to an axum server: JSON control
//! routes for patients and recording sessions, and a WebSocket live feed.

pub mod live;
pub mod runtime;
pub mod telemetry;
pub mod web;

pub use live::LiveFeed;
pub use runtime::Runtime;
pub use web::{router, WebState};

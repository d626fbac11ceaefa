//! HTTP entry point of the bridge
//!
//! One POST route runs a turn and streams its events back as NDJSON. Two
//! companion routes deliver UI action results and cancel turns in flight.

pub mod error;
pub mod ndjson;
pub mod rest;
pub mod turn_tracker;
pub mod types;

pub use error::AppError;
pub use rest::{AppState, create_router};
pub use turn_tracker::{ActiveTurn, TurnTracker};
pub use types::*;

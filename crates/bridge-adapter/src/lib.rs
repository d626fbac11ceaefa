//! Agent adapters
//!
//! [`AgUiAdapter`] speaks the AG-UI protocol (JSON request, server-sent event
//! response) to a remote agent. [`ScriptedAdapter`] replays a fixed script
//! and is used by tests and local development.

pub mod agui;
pub mod error;
pub mod http;
pub mod scripted;

pub use error::AdapterError;
pub use http::AgUiAdapter;
pub use scripted::{ScriptStats, ScriptStep, ScriptedAdapter};

//! Client state binder for the advisor bridge
//!
//! Binds a UI to one agent conversation through the bridge: sends turns,
//! keeps the shared state and the transcript in sync with what the agent
//! streams, and answers the UI actions the agent calls.
//!
//! ```no_run
//! use bridge_client::StateBinder;
//! use serde_json::json;
//!
//! # async fn run() -> bridge_client::Result<()> {
//! let binder = StateBinder::subscribe(
//!     "http://localhost:3000/api/copilotkit",
//!     "investment_advisor_team",
//!     json!({"holdings": []}),
//! )?;
//! binder.send_message("How is Tesla doing?").await?;
//! println!("{}", binder.live_state().value());
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod decode;
pub mod error;

pub use binder::{ActionFn, StateBinder, TurnOutcome};
pub use decode::FrameDecoder;
pub use error::{ClientError, Result};

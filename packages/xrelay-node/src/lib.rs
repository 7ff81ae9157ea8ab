//! XRelay Node
//!
//! Off-chain half of the relay. Watchers poll each source chain for
//! `LogMessagePublished` events, the orchestrator walks every envelope
//! through the relay state machine, and the executor delivers it to the
//! destination messenger contract.
//!
//! The binary in `main.rs` wires these together; the library surface exists
//! so the flow tests under `tests/` can drive the same code against
//! in-memory doubles.

pub mod api;
pub mod config;
pub mod db;
pub mod executor;
pub mod lcd_client;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod watchers;

pub use config::Config;
pub use executor::{classify_rejection, MessengerExecutor, MessengerQuerier, RelayExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use store::{EnvelopeStore, MemoryStore, PgStore, Watermark};
pub use types::{
    EnvelopeState, ExecutionReceipt, RelayAttempt, RelayOutcome, TrackedEnvelope,
    TransitionError,
};
pub use watchers::{SourceWatcher, WatcherEvent, WatcherManager};

//! XRelay Messenger Contract
//!
//! Destination-side endpoint of the relay. Relayers submit
//! `RelayMessage { message }`; the contract rejects replays of the same
//! `(source_chain, sender, sequence)`, resolves the asset through its token
//! registry, and records the ledger entry together with the balance credit.
//!
//! ## Modules
//!
//! - `contract` - Entry points (instantiate, execute, query, migrate)
//! - `execute/` - Execute message handlers (relay, registry, admin)
//! - `query` - Query handlers
//! - `payload` - Transfer payload and address decoding
//! - `state` - Storage layout
//! - `msg` - Message types
//! - `error` - Error types

pub mod contract;
pub mod error;
pub mod execute;
pub mod msg;
pub mod payload;
pub mod query;
pub mod state;

pub use crate::error::ContractError;

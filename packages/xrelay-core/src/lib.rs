//! XRelay Core: Shared Cross-Chain Relay Library
//!
//! This crate provides the chain-agnostic pieces shared by the relay node and
//! the messenger contract test-suite:
//!
//! - **Types** - `CrossChainMessage`, `Envelope`, `MessageKey`, `SourceRef`
//! - **Payload** - ABI codec for the token-transfer payload (topic 0)
//! - **Validation** - topic handler registry and per-sender sequence soft check
//! - **Registry** - token mapping registry and its cached client
//! - **EVM Module** - `LogMessagePublished` decoding and the source-chain poller

pub mod error;
pub mod hash;
pub mod payload;
pub mod registry;
pub mod types;
pub mod validation;

pub mod evm;

pub use error::{DecodeError, RegistryError, ValidationError};
pub use hash::message_id;
pub use payload::{TransferPayload, TRANSFER_PAYLOAD_LEN};
pub use registry::{CachedTokenRegistry, TokenMappingSource, TokenRegistry};
pub use types::{CrossChainMessage, Envelope, MessageKey, SourceRef, Topic, TokenMapping};
pub use validation::{EnvelopeValidator, TopicHandler, TransferHandler};

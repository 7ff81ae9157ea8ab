//! EVM source-chain support
//!
//! - `events` - `LogMessagePublished` binding and the receipt decoder
//! - `source` - polling client that turns block ranges into receipts

pub mod events;
pub mod source;

pub use events::{group_into_receipts, EventDecoder, LogMessagePublished, ReceiptLog, SourceReceipt};
pub use source::{EvmSource, SourceChain};

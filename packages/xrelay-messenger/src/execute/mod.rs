//! Execute message handlers.
//!
//! - `relay` - RelayMessage: replay check, token resolution, record + credit
//! - `registry` - RegisterToken
//! - `admin` - relayer set and pause switch

mod admin;
mod registry;
mod relay;

pub use admin::{execute_add_relayer, execute_pause, execute_remove_relayer, execute_unpause};
pub use registry::execute_register_token;
pub use relay::execute_relay_message;

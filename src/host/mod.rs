//! Host-facing command contract and stdio bridge for UI shells.

pub mod channel;
pub mod contract;
pub mod stdio;

pub use channel::{HostCommandClient, HostCommandServer, command_channel};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use stdio::run_stdio_bridge;

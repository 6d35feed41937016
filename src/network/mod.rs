// Peer synchronization protocol

pub mod message;
pub mod node;

pub use message::{InvKind, Message, COMMAND_WIDTH, PROTOCOL_VERSION};
pub use node::Node;

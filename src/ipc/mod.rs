//! IPC server: the control channel's socket front end

pub mod protocol;
pub mod server;

pub use protocol::{parse_reply, serialize_message, Message, Reply};
pub use server::IpcServer;

//! IPC module for instance-to-instance messages

mod protocol;

pub use protocol::{encode_frame, read_message, write_message, InstanceMessage, MAX_MESSAGE_LEN};

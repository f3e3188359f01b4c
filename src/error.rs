use std::{error, fmt};

/// Resource-exhaustion and protocol errors that close (not merely fail) a
/// client. These never bubble past the owning client task; see
/// `manager::client_task`.
#[derive(Debug, Eq, PartialEq)]
pub enum ClientError {
    /// No newline found after filling the 4096-byte inbound buffer.
    LineTooLong,
    /// `cmd_list_size` exceeded `max_command_list_size` during accumulation.
    CommandListOverflow,
    /// A command arrived while idle, other than the literal `noidle`.
    ProtocolViolation,
}

impl error::Error for ClientError {}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ClientError::LineTooLong => "inbound line exceeded the buffer without a newline",
            ClientError::CommandListOverflow => "command list exceeded max_command_list_size",
            ClientError::ProtocolViolation => "command received while idle",
        };
        f.write_str(msg)
    }
}

use thiserror::Error;

/// Everything that can go wrong while driving the adapter.
///
/// Recoverable conditions (timeouts, malformed frames, dropped events)
/// never show up here; they are reported as
/// [LogMessage](crate::LogMessage)s and the affected loop just runs its
/// next iteration.
#[derive(Debug, Error)]
pub enum CecError {
    /// The serial port could not be opened.
    #[error("could not open the serial port: {0}")]
    PortUnavailable(#[from] serialport::Error),

    /// The adapter did not answer a ping in time.
    #[error("the adapter did not respond")]
    NoAdapterResponse,

    /// The firmware refused the last command.
    #[error("the adapter rejected the command")]
    Rejected,

    /// The firmware took the frame, but no device on the bus acked it.
    #[error("the destination did not acknowledge the transmission")]
    NotAcked,

    /// No frame arrived within the given time.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The connection was closed, by [close](crate::CecAdapter::close) or
    /// by a fatal serial error.
    #[error("the adapter connection is closed")]
    Closed,

    /// [open](crate::CecAdapter::open) on a connection that is already up.
    #[error("the adapter connection is already open")]
    AlreadyOpen,

    /// The serial port failed mid-operation. The link closes itself.
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

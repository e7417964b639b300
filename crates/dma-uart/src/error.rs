//! Caller-visible error types
//!
//! Only argument and timeout failures reach a caller. Ring overflow, line
//! errors and unexpected event kinds happen in interrupt context, are handled
//! there and at most logged.

/// Errors returned by the consumer-facing channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// Empty buffer, or a request the ring buffer can never satisfy.
    /// Checked before any side effect.
    InvalidArgument,
    /// Not enough data (or the transmitter did not drain) before the deadline.
    /// Nothing was consumed; the call may be retried.
    Timeout,
    /// [`Channel::init`](crate::Channel::init) was called on a running channel.
    AlreadyRunning,
    /// The hardware port rejected the request.
    Hardware,
}

#[cfg(feature = "std")]
impl std::error::Error for SerialError {}

impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid serial buffer or size"),
            Self::Timeout => write!(f, "Serial operation timeout"),
            Self::AlreadyRunning => write!(f, "Serial channel already initialised"),
            Self::Hardware => write!(f, "Serial hardware error"),
        }
    }
}

/// Errors reported by a [`SerialPort`](crate::SerialPort) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// The peripheral did not become ready before the deadline
    Timeout,
    /// The DMA stream could not be (re)configured
    Dma,
    /// The peripheral is busy with another transfer
    Busy,
}

impl From<PortError> for SerialError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Timeout => Self::Timeout,
            PortError::Dma | PortError::Busy => Self::Hardware,
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PortError {}

impl core::fmt::Display for PortError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Serial port timeout"),
            Self::Dma => write!(f, "Serial DMA configuration error"),
            Self::Busy => write!(f, "Serial port busy"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn port_timeout_stays_a_timeout() {
        assert_eq!(SerialError::from(PortError::Timeout), SerialError::Timeout);
        assert_eq!(SerialError::from(PortError::Dma), SerialError::Hardware);
        assert_eq!(SerialError::from(PortError::Busy), SerialError::Hardware);
    }

    #[test]
    fn display_messages_are_distinct() {
        let msgs = [
            SerialError::InvalidArgument.to_string(),
            SerialError::Timeout.to_string(),
            SerialError::AlreadyRunning.to_string(),
            SerialError::Hardware.to_string(),
        ];
        for (i, a) in msgs.iter().enumerate() {
            for b in msgs.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}

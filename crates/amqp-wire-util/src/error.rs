use thiserror::Error;

/// The shared error taxonomy for the wire engine and its byte
/// transports.
///
/// Every variant carries the historical negative integer code it
/// replaces (via [`WireError::code`]), so code migrated from an
/// integer-return-code API can still match on the old numbering
/// without the rest of the crate ever handling errors as raw ints.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("allocation failed")]
    NoMemory,
    #[error("malformed AMQP frame")]
    BadAmqpData,
    #[error("monotonic clock failure")]
    TimerFailure,
    #[error("transport-level failure")]
    SocketError,
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("TLS session setup or I/O failed")]
    SslError,
    #[error("body source exhausted before declared length")]
    UnexpectedState,
    #[error("invalid parameter")]
    InvalidParameter,
}

impl WireError {
    /// The historical negative integer code this variant replaces.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::NoMemory => -1,
            Self::BadAmqpData => -2,
            Self::TimerFailure => -3,
            Self::SocketError => -4,
            Self::ConnectionClosed => -5,
            Self::SslError => -6,
            Self::UnexpectedState => -7,
            Self::InvalidParameter => -8,
        }
    }
}

pub type WireResult<T> = Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            WireError::NoMemory,
            WireError::BadAmqpData,
            WireError::TimerFailure,
            WireError::SocketError,
            WireError::ConnectionClosed,
            WireError::SslError,
            WireError::UnexpectedState,
            WireError::InvalidParameter,
        ];
        for e in all {
            assert!(e.code() < 0);
        }
        let mut codes: Vec<i32> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}

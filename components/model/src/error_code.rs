use std::fmt::{self, Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Kafka protocol error codes produced by the fetch path.
///
/// Only the subset the fetch engine can emit is listed. Numeric values match the Kafka
/// protocol so the response encoder can write them verbatim.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i16)]
pub enum ErrorCode {
    UnknownServerError = -1,

    #[default]
    None = 0,

    OffsetOutOfRange = 1,

    UnknownTopicOrPartition = 3,

    NotLeaderForPartition = 6,

    RequestTimedOut = 7,

    InvalidRequest = 42,

    FetchSessionIdNotFound = 70,

    InvalidFetchSessionEpoch = 71,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        *self == ErrorCode::None
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let code: i16 = (*self).into();
        write!(f, "{:?}({})", self, code)
    }
}

impl std::error::Error for ErrorCode {}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::ErrorCode;

    #[test]
    fn test_wire_values() {
        assert_eq!(0i16, ErrorCode::None.into());
        assert_eq!(6i16, ErrorCode::NotLeaderForPartition.into());
        assert_eq!(71i16, ErrorCode::InvalidFetchSessionEpoch.into());
        assert_eq!(ErrorCode::FetchSessionIdNotFound, ErrorCode::try_from(70i16).unwrap());
        assert!(ErrorCode::try_from(12345i16).is_err());
    }

    #[test]
    fn test_default_is_none() {
        assert!(ErrorCode::default().is_ok());
        assert!(ErrorCode::OffsetOutOfRange.is_err());
        assert_eq!("OffsetOutOfRange(1)", ErrorCode::OffsetOutOfRange.to_string());
    }

    #[test]
    fn test_boxed_error() {
        fn read() -> Result<(), Box<dyn Error>> {
            let timed_out: Result<(), ErrorCode> = Err(ErrorCode::RequestTimedOut);
            timed_out?;
            Ok(())
        }
        let e = read().err().map(|e| e.to_string());
        assert_eq!(Some("RequestTimedOut(7)".to_owned()), e);
    }
}

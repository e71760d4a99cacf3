use failure::Fail;

/// Status codes understood by the device framework.
pub mod codes {
    pub const TIMEOUT: i32 = -1;
    pub const STREAM_ERROR: i32 = -2;
    pub const CORRUPTION: i32 = -3;
    pub const OVERFLOW: i32 = -4;
    pub const NOT_SUPPORTED: i32 = -5;
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Fail)]
pub enum Error {
    #[fail(display = "timed out waiting for samples")]
    Timeout,

    #[fail(display = "ring buffer overflowed, samples were dropped")]
    Overflow,

    #[fail(
        display = "invalid stream format '{}', only CS8, CS16 and CF32 are supported (CS8 is native)",
        _0
    )]
    InvalidFormat(String),

    #[fail(display = "invalid channel selection {:?}, only channel 0 exists", _0)]
    InvalidChannelSelection(Vec<usize>),

    #[fail(display = "device is receive only")]
    WrongDirection,

    #[fail(display = "invalid argument {}: {}", name, reason)]
    InvalidArgument { name: String, reason: String },

    #[fail(display = "{} failed: {}", op, reason)]
    Hardware { op: &'static str, reason: String },

    #[fail(display = "no matching device: {}", _0)]
    NotFound(String),

    #[fail(display = "device {} is already open", _0)]
    AlreadyOpen(u32),

    #[fail(display = "no stream is set up with this handle")]
    NoStream,

    #[fail(display = "a stream is already set up on this device")]
    StreamBusy,

    #[fail(display = "buffer handle {} is not acquired", _0)]
    InvalidHandle(usize),

    #[fail(display = "buffer handle {} must be released first", _0)]
    HandleOutstanding(usize),

    #[fail(display = "{} is not supported", _0)]
    NotSupported(&'static str),
}

impl Error {
    pub fn hardware<E: std::fmt::Debug>(op: &'static str, err: E) -> Error {
        Error::Hardware {
            op,
            reason: format!("{:?}", err),
        }
    }

    pub fn invalid_argument<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Error {
        Error::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Negative status code reported to the framework for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Timeout => codes::TIMEOUT,
            Error::Overflow => codes::OVERFLOW,
            Error::NotSupported(_) => codes::NOT_SUPPORTED,
            Error::Hardware { .. } => codes::CORRUPTION,
            _ => codes::STREAM_ERROR,
        }
    }

    /// Timeouts and overflows leave the stream running; the caller may read again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_conditions_map_to_framework_codes() {
        assert_eq!(Error::Timeout.code(), codes::TIMEOUT);
        assert_eq!(Error::Overflow.code(), codes::OVERFLOW);
        assert_eq!(Error::NotSupported("bias tee").code(), codes::NOT_SUPPORTED);
        assert_eq!(Error::WrongDirection.code(), codes::STREAM_ERROR);
    }

    #[test]
    fn only_timeout_and_overflow_are_recoverable() {
        assert!(Error::Timeout.is_recoverable());
        assert!(Error::Overflow.is_recoverable());
        assert!(!Error::InvalidFormat("CU8".into()).is_recoverable());
        assert!(!Error::hardware("open", -1).is_recoverable());
    }

    #[test]
    fn hardware_errors_carry_the_operation() {
        let err = Error::hardware("set_center_freq", ());
        assert_eq!(err.to_string(), "set_center_freq failed: ()");
    }
}

use thiserror::Error;

/**
    Errors raised by encoder backends and their building blocks.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("output queue is full with {0} units waiting to be drained")]
    OutputFull(usize),

    #[error("input surface has been released")]
    SurfaceReleased,

    #[error("encoder has been released")]
    Released,
}

impl CodecError {
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Type alias for results that may return a [`CodecError`].
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(CodecError::codec("x").to_string().starts_with("codec error:"));
        assert!(
            CodecError::invalid_data("x")
                .to_string()
                .starts_with("invalid data:")
        );
        assert!(
            CodecError::unsupported_format("x")
                .to_string()
                .starts_with("unsupported format:")
        );
        assert!(
            CodecError::invalid_state("x")
                .to_string()
                .starts_with("invalid state:")
        );
    }
}

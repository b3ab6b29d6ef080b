use thiserror::Error;

/// Error kinds a driver call can fail with, mapped 1:1 onto gRPC status codes at the service
/// boundary so the dispatcher never has to leak implementation details to the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("method not implemented")]
    NotImplemented,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("driver call timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl From<DriverError> for tonic::Status {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::NotImplemented => tonic::Status::unimplemented("method not implemented"),
            DriverError::InvalidArgument(message) => tonic::Status::invalid_argument(message),
            DriverError::Timeout => tonic::Status::deadline_exceeded("driver call timed out"),
            DriverError::Other(message) => tonic::Status::unknown(message),
        }
    }
}

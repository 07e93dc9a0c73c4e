//! Errors raised by the security layer.
use thiserror::Error;

/// Lifecycle stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registration,
    Initialization,
    CryptoEngine,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Registration => "registration",
            Stage::Initialization => "initialization",
            Stage::CryptoEngine => "crypto engine",
        }
    }
}

/// Security layer error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("node already registered")]
    AlreadyRegistered,
    #[error("node already initialized")]
    AlreadyInitialized,
    #[error("node not initialized")]
    NotInitialized,
    #[error("node must be registered first")]
    RegistrationRequired,
    #[error("key store already initialized")]
    KeyStoreAlreadyInitialized,
    #[error("key store not found")]
    KeyStoreNotFound,
    #[error("key store not open")]
    KeyStoreNotOpen,
    #[error("invalid passphrase")]
    InvalidPassphrase,
    #[error("key already stored: {0}")]
    KeyAlreadyStored(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid certificate: {0}")]
    InvalidCertificate(&'static str),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("operation not supported by a {0} node")]
    NotSupported(&'static str),
    #[error("certificate authority unavailable")]
    CertificateAuthorityUnavailable,
    #[error("certificate authority: {0}")]
    CertificateAuthority(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("crypto engine construction panicked")]
    EnginePoisoned,
    #[error("{} failed: {source}", .stage.as_str())]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Crypto(#[from] ledger_crypto::Error),
}

impl Error {
    /// Annotate the error with the lifecycle stage it was raised in.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            err @ Error::Stage { .. } => err,
            err => Error::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The error with any stage annotation removed.
    pub fn kind(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.kind(),
            err => err,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<cbor::DecodeError> for Error {
    fn from(err: cbor::DecodeError) -> Self {
        Error::Storage(format!("malformed entry: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_annotation() {
        let err = Error::CertificateAuthorityUnavailable.at(Stage::Registration);
        assert_eq!(
            err.to_string(),
            "registration failed: certificate authority unavailable"
        );
        assert_eq!(err.kind(), &Error::CertificateAuthorityUnavailable);

        // Annotating twice keeps the innermost stage.
        let err = err.at(Stage::Initialization);
        assert!(err.to_string().starts_with("registration"));
    }
}

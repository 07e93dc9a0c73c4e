//! Cryptographic primitives of the ledger node security layer.
//!
//! The crate provides the building blocks everything else is built on:
//!
//! * hashing and HMAC under one process-wide hash algorithm ([`hash`]),
//! * AES-CBC with PKCS#7 padding ([`aes`]),
//! * Ed25519 signatures used by certificates ([`signature`]),
//! * pluggable asymmetric and stream cipher service-provider interfaces
//!   together with their concrete algorithm families ([`spi`]).
pub use cbor;

#[macro_use]
pub mod bytes;
pub mod aes;
pub mod error;
pub mod hash;
pub mod signature;
pub mod spi;

pub use error::Error;

//! Identity and cryptographic security layer of a ledger node.
//!
//! A node first registers with a certificate authority, which persists its
//! enrollment material into an encrypted key store, and is then initialized,
//! which loads that material and brings up the crypto engine. Only an
//! initialized node hands out certificate handlers, transaction handlers and
//! state encryptors.
pub mod bootstrap;
pub mod ca;
pub mod certificate;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuse;
pub mod handler;
pub mod keystore;
pub mod logger;
pub mod node;
pub mod state;
pub mod transaction;

pub use ledger_crypto as crypto;

pub use self::{
    config::{NodeConfig, Settings},
    error::Error,
    node::{Node, NodeType},
};

//! Chaincode transactions.
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, RngCore};
use rustc_hex::ToHex;

use crate::{
    crypto::{hash::Hash, signature::Signature},
    error::Error,
};

/// Signature context of transactions.
pub const TRANSACTION_SIGNATURE_CONTEXT: &[u8] = b"ledger-security/transaction: tx";

/// Length of the transaction nonce.
pub const NONCE_LENGTH: usize = 32;

/// Transaction type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, cbor::Encode, cbor::Decode)]
#[repr(u32)]
pub enum TransactionType {
    /// Invalid transaction that should never be explicitly set.
    Invalid = 0,
    /// Chaincode deployment.
    ChaincodeDeploy = 1,
    /// Chaincode invocation.
    ChaincodeExecute = 2,
    /// Read-only chaincode query.
    ChaincodeQuery = 3,
}

impl Default for TransactionType {
    fn default() -> Self {
        TransactionType::Invalid
    }
}

/// Confidentiality level of a transaction payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, cbor::Encode, cbor::Decode)]
#[repr(u32)]
pub enum ConfidentialityLevel {
    /// Payload is in the clear.
    Public = 0,
    /// Payload is encrypted to the validators.
    Confidential = 1,
}

impl Default for ConfidentialityLevel {
    fn default() -> Self {
        ConfidentialityLevel::Public
    }
}

/// What a transaction asks of a chaincode.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct ChaincodeSpec {
    pub chaincode_id: String,
    pub payload: Vec<u8>,
    pub confidentiality: ConfidentialityLevel,
}

impl ChaincodeSpec {
    pub fn new(chaincode_id: &str, payload: &[u8]) -> Self {
        Self {
            chaincode_id: chaincode_id.to_owned(),
            payload: payload.to_vec(),
            confidentiality: ConfidentialityLevel::Public,
        }
    }

    /// Mark the payload as confidential.
    pub fn confidential(mut self) -> Self {
        self.confidentiality = ConfidentialityLevel::Confidential;
        self
    }
}

/// A signed chaincode transaction envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct Transaction {
    pub tx_type: TransactionType,
    pub uuid: String,
    pub chaincode_id: String,
    pub payload: Vec<u8>,
    pub confidentiality: ConfidentialityLevel,
    pub nonce: Vec<u8>,
    /// Serialized certificate of the signer.
    pub cert: Vec<u8>,
    pub timestamp: u64,
    /// Result key of a confidential query, encrypted to the validators.
    #[cbor(optional)]
    pub result_key: Vec<u8>,
    pub signature: Signature,
}

impl Transaction {
    /// Unsigned transaction for the given spec.
    pub fn new(tx_type: TransactionType, spec: &ChaincodeSpec, uuid: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            tx_type,
            uuid: uuid.to_owned(),
            chaincode_id: spec.chaincode_id.clone(),
            payload: spec.payload.clone(),
            confidentiality: spec.confidentiality,
            timestamp,
            ..Default::default()
        }
    }

    /// Bytes covered by the transaction signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = Signature::default();
        cbor::to_vec(unsigned)
    }

    /// Value uniquely naming the (certificate, transaction) pair.
    pub fn binding(&self) -> Hash {
        Hash::digest_bytes_list(&[self.cert.as_slice(), self.nonce.as_slice()])
    }

    /// Hash of the whole transaction.
    pub fn hash(&self) -> Hash {
        Hash::digest_bytes(&cbor::to_vec(self.clone()))
    }

    pub fn is_confidential(&self) -> bool {
        self.confidentiality == ConfidentialityLevel::Confidential
    }

    /// Check that every field required before signature verification is set.
    pub fn check_structure(&self) -> Result<(), Error> {
        if self.tx_type == TransactionType::Invalid {
            return Err(Error::InvalidTransaction("invalid type"));
        }
        if self.uuid.is_empty() {
            return Err(Error::InvalidTransaction("missing uuid"));
        }
        if self.chaincode_id.is_empty() {
            return Err(Error::InvalidTransaction("missing chaincode id"));
        }
        if self.nonce.len() != NONCE_LENGTH {
            return Err(Error::InvalidTransaction("invalid nonce"));
        }
        if self.cert.is_empty() {
            return Err(Error::InvalidTransaction("missing certificate"));
        }
        Ok(())
    }
}

/// Generate a random transaction nonce.
pub fn generate_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generate a random transaction identifier.
pub fn generate_uuid() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    raw.to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding() {
        let spec = ChaincodeSpec::new("mycc", b"init");
        let mut tx = Transaction::new(TransactionType::ChaincodeDeploy, &spec, "uuid-1");
        tx.cert = b"cert".to_vec();
        tx.nonce = generate_nonce();

        let binding = tx.binding();
        assert_eq!(binding, tx.clone().binding());

        let mut other = tx.clone();
        other.nonce = generate_nonce();
        assert_ne!(binding, other.binding());

        // The signature does not take part in the signed bytes.
        let mut signed = tx.clone();
        signed.signature = Signature([7u8; 64]);
        assert_eq!(signed.signing_bytes(), tx.signing_bytes());
    }

    #[test]
    fn test_check_structure() {
        let spec = ChaincodeSpec::new("mycc", b"args");
        let mut tx = Transaction::new(TransactionType::ChaincodeExecute, &spec, &generate_uuid());
        assert_eq!(
            tx.check_structure(),
            Err(Error::InvalidTransaction("invalid nonce"))
        );

        tx.nonce = generate_nonce();
        tx.cert = vec![1];
        assert!(tx.check_structure().is_ok());

        tx.tx_type = TransactionType::Invalid;
        assert_eq!(
            tx.check_structure(),
            Err(Error::InvalidTransaction("invalid type"))
        );
        assert_ne!(generate_uuid(), generate_uuid());
    }
}

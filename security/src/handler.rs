//! Certificate and transaction handlers.
use std::{fmt, sync::Arc};

use crate::{
    certificate::Certificate,
    crypto::{
        hash::Hash,
        signature::{PrivateKey, Signature, Signer},
        spi::AsymmetricCipherSpi,
    },
    engine::{Engine, MESSAGE_SIGNATURE_CONTEXT},
    error::Error,
    transaction::{generate_nonce, ChaincodeSpec, Transaction, TransactionType},
};

/// Signs and verifies on behalf of one certificate.
///
/// The private key never leaves the handler. Handlers are reusable and each
/// may hand out any number of one-shot [`TransactionHandler`]s.
pub struct CertificateHandler<S: AsymmetricCipherSpi> {
    engine: Arc<Engine<S>>,
    certificate: Certificate,
    key: PrivateKey,
}

impl<S: AsymmetricCipherSpi> Clone for CertificateHandler<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            certificate: self.certificate.clone(),
            key: self.key.clone(),
        }
    }
}

impl<S: AsymmetricCipherSpi> fmt::Debug for CertificateHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateHandler")
            .field("kind", &self.certificate.kind())
            .field("certificate", &self.certificate.hash())
            .finish_non_exhaustive()
    }
}

impl<S: AsymmetricCipherSpi> CertificateHandler<S> {
    pub(crate) fn new(engine: Arc<Engine<S>>, certificate: Certificate, key: PrivateKey) -> Self {
        Self {
            engine,
            certificate,
            key,
        }
    }

    /// Serialized certificate.
    pub fn get_certificate(&self) -> Vec<u8> {
        self.certificate.to_vec()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Sign a message with the certificate key.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, Error> {
        self.engine.ensure_active()?;
        Ok(self.key.sign(MESSAGE_SIGNATURE_CONTEXT, msg)?)
    }

    /// Verify a message signature under the certificate key.
    pub fn verify(&self, signature: &Signature, msg: &[u8]) -> Result<(), Error> {
        self.engine.verify(self.certificate.public_key(), signature, msg)
    }

    /// Bind a fresh transaction to this certificate.
    pub fn new_transaction_handler(&self) -> Result<TransactionHandler<S>, Error> {
        self.engine.ensure_active()?;

        let nonce = generate_nonce();
        let cert = self.get_certificate();
        let binding = Hash::digest_bytes_list(&[cert.as_slice(), nonce.as_slice()]);
        Ok(TransactionHandler {
            handler: self.clone(),
            nonce,
            binding,
        })
    }
}

/// Builds exactly one transaction for a certificate.
pub struct TransactionHandler<S: AsymmetricCipherSpi> {
    handler: CertificateHandler<S>,
    nonce: Vec<u8>,
    binding: Hash,
}

impl<S: AsymmetricCipherSpi> TransactionHandler<S> {
    pub fn get_certificate_handler(&self) -> &CertificateHandler<S> {
        &self.handler
    }

    /// Value unique to the (certificate, transaction) pair.
    pub fn get_binding(&self) -> Hash {
        self.binding
    }

    fn build(
        self,
        tx_type: TransactionType,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.handler.engine.new_transaction(
            tx_type,
            spec,
            uuid,
            &self.handler.certificate,
            &self.handler.key,
            &self.nonce,
        )
    }

    pub fn new_chaincode_deploy_transaction(
        self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.build(TransactionType::ChaincodeDeploy, spec, uuid)
    }

    pub fn new_chaincode_execute(
        self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.build(TransactionType::ChaincodeExecute, spec, uuid)
    }

    pub fn new_chaincode_query(
        self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.build(TransactionType::ChaincodeQuery, spec, uuid)
    }
}

//! Peer and validator surface.
use std::sync::Arc;

use crate::{
    crypto::{hash::Hash, signature::Signature, spi::AsymmetricCipherSpi},
    engine::Engine,
    error::Error,
    state::StateEncryptor,
    transaction::Transaction,
};

use super::{Node, NodeType};

impl<S: AsymmetricCipherSpi> Node<S> {
    fn peer_engine(&self) -> Result<Arc<Engine<S>>, Error> {
        if self.get_type() == NodeType::Client {
            return Err(Error::NotSupported(NodeType::Client.as_str()));
        }
        self.engine()
    }

    /// Identifier of the peer, the hash of its enrollment certificate.
    pub fn get_id(&self) -> Result<Hash, Error> {
        Ok(self.peer_engine()?.ecert().hash())
    }

    pub fn get_enrollment_id(&self) -> Result<String, Error> {
        Ok(self.peer_engine()?.enrollment_id().to_owned())
    }

    /// Sign a message with the enrollment key.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, Error> {
        self.peer_engine()?.sign(msg)
    }

    /// Verify a message signature.
    ///
    /// With no `vk_id` the signature is checked against the peer's own
    /// enrollment key, otherwise against the enrollment certificate whose
    /// hash is `vk_id`.
    pub fn verify(
        &self,
        vk_id: Option<&[u8]>,
        signature: &Signature,
        msg: &[u8],
    ) -> Result<(), Error> {
        let engine = self.peer_engine()?;
        match vk_id {
            None => engine.verify(engine.ecert().public_key(), signature, msg),
            Some(id) => {
                let id = Hash::try_from(id)
                    .map_err(|_| Error::InvalidParameter("malformed verification key id"))?;
                let ecert = engine.fetch_ecert(&id)?;
                engine.verify(ecert.public_key(), signature, msg)
            }
        }
    }

    /// Binding of a transaction to its certificate.
    pub fn get_transaction_binding(&self, tx: &Transaction) -> Result<Hash, Error> {
        self.peer_engine()?;
        Ok(tx.binding())
    }

    /// Check a transaction's structure, certificate and signature.
    pub fn transaction_pre_validation(&self, tx: &Transaction) -> Result<Transaction, Error> {
        self.peer_engine()?.verify_transaction(tx)?;
        Ok(tx.clone())
    }

    /// Validate a transaction and prepare a copy of it for execution.
    ///
    /// Validators resolve confidential payloads; plain peers pass the
    /// transaction through as is.
    pub fn transaction_pre_execution(&self, tx: &Transaction) -> Result<Transaction, Error> {
        let engine = self.peer_engine()?;
        engine.verify_transaction(tx)?;

        let mut prepared = tx.clone();
        if self.get_type() == NodeType::Validator && tx.is_confidential() {
            prepared.payload = engine.decrypt_payload(&tx.payload)?;
        }
        Ok(prepared)
    }

    /// State encryptor of a (deploy, execute) transaction pair.
    pub fn get_state_encryptor(
        &self,
        deploy_tx: &Transaction,
        execute_tx: &Transaction,
    ) -> Result<StateEncryptor, Error> {
        if self.get_type() != NodeType::Validator {
            return Err(Error::NotSupported(self.get_type().as_str()));
        }
        self.engine()?.state_encryptor(deploy_tx, execute_tx)
    }

    /// Encrypt a query result for the client that submitted `query_tx`.
    pub fn encrypt_query_result(
        &self,
        query_tx: &Transaction,
        result: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if self.get_type() != NodeType::Validator {
            return Err(Error::NotSupported(self.get_type().as_str()));
        }
        self.engine()?.encrypt_query_result(query_tx, result)
    }
}

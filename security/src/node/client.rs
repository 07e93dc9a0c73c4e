//! Transaction submission surface, available to every node type.
use crate::{
    crypto::spi::AsymmetricCipherSpi,
    error::Error,
    handler::{CertificateHandler, TransactionHandler},
    transaction::{ChaincodeSpec, Transaction},
};

use super::Node;

impl<S: AsymmetricCipherSpi> Node<S> {
    /// Handler bound to the enrollment certificate.
    pub fn get_enrollment_certificate_handler(&self) -> Result<CertificateHandler<S>, Error> {
        let engine = self.engine()?;
        let (ecert, ekey) = (engine.ecert().clone(), engine.ekey().clone());
        Ok(CertificateHandler::new(engine, ecert, ekey))
    }

    /// Handler bound to the next unused transaction certificate carrying the
    /// given attributes.
    pub fn get_tcert_handler_next(
        &self,
        attributes: &[String],
    ) -> Result<CertificateHandler<S>, Error> {
        let engine = self.engine()?;
        let (tcert, key) = engine.next_tcert(attributes)?;
        Ok(CertificateHandler::new(engine, tcert, key))
    }

    /// Handler bound to a serialized transaction certificate previously
    /// issued to this node.
    pub fn get_tcert_handler_from_der(&self, der: &[u8]) -> Result<CertificateHandler<S>, Error> {
        let engine = self.engine()?;
        let (tcert, key) = engine.tcert_from_der(der)?;
        Ok(CertificateHandler::new(engine, tcert, key))
    }

    /// Handlers bound to the next `count` unused transaction certificates.
    pub fn get_next_tcerts(
        &self,
        count: usize,
        attributes: &[String],
    ) -> Result<Vec<CertificateHandler<S>>, Error> {
        let engine = self.engine()?;
        Ok(engine
            .next_tcerts(count, attributes)?
            .into_iter()
            .map(|(tcert, key)| CertificateHandler::new(engine.clone(), tcert, key))
            .collect())
    }

    fn next_transaction_handler(&self) -> Result<TransactionHandler<S>, Error> {
        self.get_tcert_handler_next(&[])?.new_transaction_handler()
    }

    /// Deploy a chaincode, signed with a fresh transaction certificate.
    pub fn new_chaincode_deploy_transaction(
        &self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.next_transaction_handler()?
            .new_chaincode_deploy_transaction(spec, uuid)
    }

    /// Invoke a chaincode, signed with a fresh transaction certificate.
    pub fn new_chaincode_execute(
        &self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.next_transaction_handler()?
            .new_chaincode_execute(spec, uuid)
    }

    /// Query a chaincode, signed with a fresh transaction certificate.
    pub fn new_chaincode_query(
        &self,
        spec: &ChaincodeSpec,
        uuid: &str,
    ) -> Result<Transaction, Error> {
        self.next_transaction_handler()?
            .new_chaincode_query(spec, uuid)
    }

    /// Decrypt the result of a query this node submitted.
    ///
    /// Results of public queries are returned unchanged.
    pub fn decrypt_query_result(
        &self,
        query_tx: &Transaction,
        result: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.engine()?.decrypt_query_result(query_tx, result)
    }
}

//! Crypto engine of an initialized node.
//!
//! The engine owns everything the node loaded from its key store together
//! with the bound cipher provider. It is built exactly once per node and
//! shared read-only afterwards; the only mutable parts are the transaction
//! certificate pool and the enrollment certificate cache.
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use slog::{debug, info, Logger};
use zeroize::Zeroizing;

use crate::{
    ca::{
        CertificateAuthority, TCertRequest, MAX_TCERT_BATCH, TCERT_REQUEST_SIGNATURE_CONTEXT,
    },
    certificate::{derive_tcert_key, Authorities, Certificate, TrustPools},
    config::NodeConfig,
    crypto::{
        hash::{self, Hash},
        signature::{PrivateKey, PublicKey, Signature, Signer},
        spi::{AsymmetricCipher, AsymmetricCipherSpi},
    },
    error::Error,
    keystore::{KeyKind, KeyStore},
    logger::get_logger,
    node::NodeType,
    state::StateEncryptor,
    transaction::{ChaincodeSpec, Transaction, TransactionType, TRANSACTION_SIGNATURE_CONTEXT},
};

/// Signature context of plain messages signed by node identities.
pub const MESSAGE_SIGNATURE_CONTEXT: &[u8] = b"ledger-security/node: message";

const STATE_MASTER_KEY_CONTEXT: &[u8] = b"ledger-security/engine: state master key";
const STATE_PAIR_KEY_CONTEXT: &[u8] = b"ledger-security/engine: state pair key";
const QUERY_RESULT_KEY_CONTEXT: &[u8] = b"ledger-security/engine: query result key";

/// Chain key material persisted on registration.
#[derive(Clone, Default, cbor::Encode, cbor::Decode)]
pub struct ChainKeyMaterial {
    pub tcert_owner_key: Vec<u8>,
    pub chain_public_key: Vec<u8>,
    #[cbor(optional)]
    pub chain_private_key: Option<Vec<u8>>,
}

/// Enrollment material loaded from the key store.
pub struct Material {
    pub ecert: Certificate,
    pub ekey: PrivateKey,
    pub chain: ChainKeyMaterial,
    pub authorities: Authorities,
    pub tls_certificate: Option<Certificate>,
}

impl Material {
    /// Load the material from an open key store.
    ///
    /// Fails with [`Error::RegistrationRequired`] if the node never completed
    /// its registration.
    pub fn load(keystore: &KeyStore) -> Result<Self, Error> {
        let ecert = keystore
            .load_key(KeyKind::EnrollmentCertificate)?
            .ok_or(Error::RegistrationRequired)?;
        let ecert = Certificate::from_bytes(&ecert)?;

        let ekey = Zeroizing::new(
            keystore
                .load_key(KeyKind::EnrollmentKey)?
                .ok_or_else(|| Error::Storage("missing enrollment key".to_owned()))?,
        );
        let ekey = PrivateKey::from_bytes(&ekey)?;
        if &ekey.public_key() != ecert.public_key() {
            return Err(Error::Storage(
                "enrollment key does not match its certificate".to_owned(),
            ));
        }

        let chain = keystore
            .load_key(KeyKind::ChainKey)?
            .ok_or_else(|| Error::Storage("missing chain key".to_owned()))?;
        let chain = cbor::from_slice(&Zeroizing::new(chain))?;

        let authorities = keystore
            .load_key(KeyKind::TrustAnchors)?
            .ok_or_else(|| Error::Storage("missing trust anchors".to_owned()))?;
        let authorities = cbor::from_slice(&authorities)?;

        let tls_certificate = keystore
            .load_key(KeyKind::TlsCertificate)?
            .map(|cert| Certificate::from_bytes(&cert))
            .transpose()?;

        Ok(Self {
            ecert,
            ekey,
            chain,
            authorities,
            tls_certificate,
        })
    }
}

type TCertQueue = VecDeque<(Certificate, PrivateKey)>;

/// Crypto engine bound to one cipher provider.
pub struct Engine<S: AsymmetricCipherSpi> {
    logger: Logger,
    config: NodeConfig,
    spi: S,
    ca: Arc<dyn CertificateAuthority>,
    keystore: Arc<KeyStore>,
    pools: TrustPools,
    ecert: Certificate,
    ekey: PrivateKey,
    tls_certificate: Option<Certificate>,
    tcert_owner_key: Zeroizing<Vec<u8>>,
    chain_public_key: S::PublicKey,
    chain_private_key: Option<S::PrivateKey>,
    state_master_key: Option<Zeroizing<Vec<u8>>>,
    /// Unused transaction certificates keyed by their sorted attributes.
    tcerts: Mutex<HashMap<Vec<String>, TCertQueue>>,
    ecert_cache: Mutex<HashMap<Hash, Certificate>>,
    /// Pairs whose state key is in the key store, least recently used first.
    state_keys: Mutex<VecDeque<Hash>>,
    active: AtomicBool,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: AsymmetricCipherSpi> Engine<S> {
    /// Bring up the engine from the loaded material.
    pub fn new(
        spi: S,
        config: NodeConfig,
        ca: Arc<dyn CertificateAuthority>,
        keystore: Arc<KeyStore>,
        material: Material,
    ) -> Result<Self, Error> {
        let logger = get_logger("security/engine");

        let pools = TrustPools::from_authorities(&material.authorities)?;
        pools.verify_enrollment(&material.ecert)?;
        if let Some(tls) = &material.tls_certificate {
            pools.verify_tls(tls)?;
        }

        let chain = material.chain;
        let chain_public_key = spi.deserialize_public_key(&chain.chain_public_key)?;
        let chain_private_key = chain
            .chain_private_key
            .as_ref()
            .map(|sk| spi.deserialize_private_key(sk))
            .transpose()?;

        // Validators derive the state master key from the chain key.
        let state_master_key = match config.node_type {
            NodeType::Validator => {
                let sk = chain
                    .chain_private_key
                    .as_ref()
                    .ok_or(Error::InvalidParameter("validator requires the chain private key"))?;
                Some(Zeroizing::new(hash::hmac(sk, STATE_MASTER_KEY_CONTEXT)?))
            }
            NodeType::Client | NodeType::Peer => None,
        };
        let state_keys: Vec<Hash> = match keystore.load_key(KeyKind::StateKeyIndex)? {
            Some(raw) => cbor::from_slice(&raw)?,
            None => Vec::new(),
        };

        info!(logger, "Crypto engine initialized";
            "spi" => spi.name(),
            "node_type" => config.node_type.as_str(),
            "name" => &config.name,
        );

        Ok(Self {
            logger,
            config,
            spi,
            ca,
            keystore,
            pools,
            ecert: material.ecert,
            ekey: material.ekey,
            tls_certificate: material.tls_certificate,
            tcert_owner_key: Zeroizing::new(chain.tcert_owner_key.clone()),
            chain_public_key,
            chain_private_key,
            state_master_key,
            tcerts: Mutex::new(HashMap::new()),
            ecert_cache: Mutex::new(HashMap::new()),
            state_keys: Mutex::new(state_keys.into()),
            active: AtomicBool::new(true),
        })
    }

    /// Fail with [`Error::NotInitialized`] once the engine was shut down.
    pub fn ensure_active(&self) -> Result<(), Error> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Shut the engine down and drop pooled certificates.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            lock(&self.tcerts).clear();
            lock(&self.ecert_cache).clear();
            info!(self.logger, "Crypto engine shut down"; "name" => &self.config.name);
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn pools(&self) -> &TrustPools {
        &self.pools
    }

    /// Enrollment identifier the node registered with.
    pub fn enrollment_id(&self) -> &str {
        &self.ecert.body.subject
    }

    pub fn ecert(&self) -> &Certificate {
        &self.ecert
    }

    pub fn ekey(&self) -> &PrivateKey {
        &self.ekey
    }

    pub fn tls_certificate(&self) -> Option<&Certificate> {
        self.tls_certificate.as_ref()
    }

    /// Sign a message with the enrollment key.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, Error> {
        self.ensure_active()?;
        Ok(self.ekey.sign(MESSAGE_SIGNATURE_CONTEXT, msg)?)
    }

    /// Verify a message signature under the given key.
    pub fn verify(&self, pk: &PublicKey, signature: &Signature, msg: &[u8]) -> Result<(), Error> {
        self.ensure_active()?;
        signature
            .verify(pk, MESSAGE_SIGNATURE_CONTEXT, msg)
            .map_err(|_| Error::InvalidSignature)
    }

    fn refill_tcerts(&self, attributes: &[String], queue: &mut TCertQueue) -> Result<(), Error> {
        let count = u32::try_from(self.config.tcert_batch_size)
            .unwrap_or(MAX_TCERT_BATCH)
            .min(MAX_TCERT_BATCH);
        let request = TCertRequest {
            enrollment_id: self.enrollment_id().to_owned(),
            count,
            attributes: attributes.to_vec(),
            timestamp: now(),
        };
        let signature = self
            .ekey
            .sign(TCERT_REQUEST_SIGNATURE_CONTEXT, &cbor::to_vec(request.clone()))?;

        let tcerts = self.ca.request_tcerts(&request, &signature)?;
        for tcert in tcerts {
            let key = self.own_tcert_key(&tcert)?;
            if !tcert.has_attributes(attributes) {
                return Err(Error::InvalidCertificate("missing requested attributes"));
            }
            queue.push_back((tcert, key));
        }

        info!(self.logger, "Refilled transaction certificate pool";
            "count" => queue.len(),
            "attributes" => attributes.join(","),
        );

        Ok(())
    }

    /// Validate a transaction certificate and derive its private key.
    fn own_tcert_key(&self, tcert: &Certificate) -> Result<PrivateKey, Error> {
        self.pools.verify_transaction(tcert)?;

        let key = derive_tcert_key(&self.tcert_owner_key, tcert.body.serial, &tcert.body.nonce)?;
        if &key.public_key() != tcert.public_key() {
            return Err(Error::InvalidCertificate("tcert key mismatch"));
        }
        Ok(key)
    }

    fn take_tcert(
        &self,
        attributes: &[String],
        queue: &mut TCertQueue,
    ) -> Result<(Certificate, PrivateKey), Error> {
        if queue.is_empty() {
            self.refill_tcerts(attributes, queue)?;
        }
        queue.pop_front().ok_or_else(|| {
            Error::CertificateAuthority("empty transaction certificate batch".to_owned())
        })
    }

    /// Take the next unused transaction certificate carrying the attributes.
    pub fn next_tcert(&self, attributes: &[String]) -> Result<(Certificate, PrivateKey), Error> {
        let mut tcerts = self.next_tcerts(1, attributes)?;
        tcerts.pop().ok_or(Error::InvalidParameter("certificate count must be positive"))
    }

    /// Take the next `count` unused transaction certificates.
    ///
    /// Either all of them are handed out or the pool is left as it was.
    pub fn next_tcerts(
        &self,
        count: usize,
        attributes: &[String],
    ) -> Result<Vec<(Certificate, PrivateKey)>, Error> {
        self.ensure_active()?;
        if count == 0 {
            return Err(Error::InvalidParameter("certificate count must be positive"));
        }

        let mut attributes = attributes.to_vec();
        attributes.sort();
        attributes.dedup();

        let mut tcerts = lock(&self.tcerts);
        let queue = tcerts.entry(attributes.clone()).or_default();
        let mut taken = Vec::with_capacity(count);
        while taken.len() < count {
            match self.take_tcert(&attributes, queue) {
                Ok(tcert) => taken.push(tcert),
                Err(err) => {
                    while let Some(tcert) = taken.pop() {
                        queue.push_front(tcert);
                    }
                    return Err(err);
                }
            }
        }

        Ok(taken)
    }

    /// Bind to a serialized transaction certificate issued to this node.
    pub fn tcert_from_der(&self, der: &[u8]) -> Result<(Certificate, PrivateKey), Error> {
        self.ensure_active()?;

        let tcert = Certificate::from_bytes(der)?;
        let key = self.own_tcert_key(&tcert)?;
        Ok((tcert, key))
    }

    /// Encrypt a confidential payload to the validators.
    pub fn encrypt_payload(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = self
            .spi
            .new_asymmetric_cipher_from_public_key(&self.chain_public_key)?;
        Ok(cipher.process(payload)?)
    }

    /// Decrypt a confidential payload. Requires the chain private key.
    pub fn decrypt_payload(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let sk = self
            .chain_private_key
            .as_ref()
            .ok_or(Error::NotSupported(self.config.node_type.as_str()))?;
        let cipher = self.spi.new_asymmetric_cipher_from_private_key(sk)?;
        Ok(cipher.process(ciphertext)?)
    }

    /// Key of a confidential query result, known only to the submitter and,
    /// through the transaction, to the validators.
    fn query_result_key(&self, nonce: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut msg = QUERY_RESULT_KEY_CONTEXT.to_vec();
        msg.extend_from_slice(nonce);
        Ok(Zeroizing::new(hash::hmac_aes_truncated(
            &self.tcert_owner_key,
            &msg,
        )?))
    }

    fn check_query(query_tx: &Transaction) -> Result<(), Error> {
        if query_tx.tx_type != TransactionType::ChaincodeQuery {
            return Err(Error::InvalidTransaction("expected a query transaction"));
        }
        if query_tx.result_key.is_empty() {
            return Err(Error::InvalidTransaction("missing query result key"));
        }
        Ok(())
    }

    /// Encrypt the result of a query for its submitter.
    ///
    /// Results of public queries are returned as is. Requires the chain
    /// private key.
    pub fn encrypt_query_result(
        &self,
        query_tx: &Transaction,
        result: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.verify_transaction(query_tx)?;
        if !query_tx.is_confidential() {
            return Ok(result.to_vec());
        }
        Self::check_query(query_tx)?;

        let key = Zeroizing::new(self.decrypt_payload(&query_tx.result_key)?);
        StateEncryptor::new(&key)?.encrypt(result)
    }

    /// Decrypt the result of a query this node submitted.
    pub fn decrypt_query_result(
        &self,
        query_tx: &Transaction,
        result: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.ensure_active()?;
        if !query_tx.is_confidential() {
            return Ok(result.to_vec());
        }
        Self::check_query(query_tx)?;

        let key = self.query_result_key(&query_tx.nonce)?;
        StateEncryptor::new(&key)?.decrypt(result)
    }

    /// Fetch the enrollment certificate with the given hash.
    pub fn fetch_ecert(&self, id: &Hash) -> Result<Certificate, Error> {
        self.ensure_active()?;

        if *id == self.ecert.hash() {
            return Ok(self.ecert.clone());
        }
        if let Some(cert) = lock(&self.ecert_cache).get(id) {
            return Ok(cert.clone());
        }

        let cert = self.ca.fetch_enrollment_certificate(id)?;
        if cert.hash() != *id {
            return Err(Error::InvalidCertificate("enrollment certificate hash mismatch"));
        }
        self.pools.verify_enrollment(&cert)?;
        debug!(self.logger, "Fetched enrollment certificate"; "subject" => &cert.body.subject);

        lock(&self.ecert_cache).insert(*id, cert.clone());
        Ok(cert)
    }

    /// Build and sign a transaction.
    pub fn new_transaction(
        &self,
        tx_type: TransactionType,
        spec: &ChaincodeSpec,
        uuid: &str,
        cert: &Certificate,
        key: &PrivateKey,
        nonce: &[u8],
    ) -> Result<Transaction, Error> {
        self.ensure_active()?;

        let mut tx = Transaction::new(tx_type, spec, uuid);
        tx.nonce = nonce.to_vec();
        tx.cert = cert.to_vec();
        if tx.is_confidential() {
            tx.payload = self.encrypt_payload(&tx.payload)?;
            if tx_type == TransactionType::ChaincodeQuery {
                let result_key = self.query_result_key(nonce)?;
                tx.result_key = self.encrypt_payload(&result_key)?;
            }
        }
        tx.check_structure()?;
        tx.signature = key.sign(TRANSACTION_SIGNATURE_CONTEXT, &tx.signing_bytes())?;

        debug!(self.logger, "Created transaction";
            "uuid" => &tx.uuid,
            "chaincode" => &tx.chaincode_id,
            "confidential" => tx.is_confidential(),
        );

        Ok(tx)
    }

    /// Check a transaction's structure, certificate and signature.
    ///
    /// Returns the signer's certificate.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<Certificate, Error> {
        self.ensure_active()?;

        tx.check_structure()?;
        let cert = Certificate::from_bytes(&tx.cert)?;
        self.pools.verify_signer(&cert)?;
        tx.signature
            .verify(cert.public_key(), TRANSACTION_SIGNATURE_CONTEXT, &tx.signing_bytes())
            .map_err(|_| Error::InvalidSignature)?;

        Ok(cert)
    }

    /// Derive the state encryptor of a (deploy, execute) transaction pair.
    pub fn state_encryptor(
        &self,
        deploy_tx: &Transaction,
        execute_tx: &Transaction,
    ) -> Result<StateEncryptor, Error> {
        self.ensure_active()?;

        let master_key = self
            .state_master_key
            .as_ref()
            .ok_or(Error::NotSupported(self.config.node_type.as_str()))?;

        if deploy_tx.tx_type != TransactionType::ChaincodeDeploy {
            return Err(Error::InvalidTransaction("expected a deploy transaction"));
        }
        if !matches!(
            execute_tx.tx_type,
            TransactionType::ChaincodeExecute | TransactionType::ChaincodeQuery
        ) {
            return Err(Error::InvalidTransaction("expected an execute transaction"));
        }
        if deploy_tx.chaincode_id != execute_tx.chaincode_id {
            return Err(Error::InvalidTransaction("chaincode mismatch"));
        }
        self.verify_transaction(deploy_tx)?;
        self.verify_transaction(execute_tx)?;

        let pair_key = self.pair_key(master_key, &deploy_tx.binding(), &execute_tx.binding())?;

        StateEncryptor::new(&pair_key)
    }

    /// State key of a (deploy, execute) binding pair.
    ///
    /// At most `state_keys_capacity` keys stay in the key store. The least
    /// recently used ones are removed first and derived again on demand.
    fn pair_key(
        &self,
        master_key: &[u8],
        deploy_binding: &Hash,
        execute_binding: &Hash,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let pair = Hash::digest_bytes_list(&[deploy_binding.as_ref(), execute_binding.as_ref()]);
        let mut index = lock(&self.state_keys);

        if let Some(pos) = index.iter().position(|p| p == &pair) {
            if let Some(key) = self.keystore.load_key(KeyKind::StateKey(pair))? {
                index.remove(pos);
                index.push_back(pair);
                return Ok(Zeroizing::new(key));
            }
        }

        let mut msg = STATE_PAIR_KEY_CONTEXT.to_vec();
        msg.extend_from_slice(deploy_binding.as_ref());
        msg.extend_from_slice(execute_binding.as_ref());
        let key = Zeroizing::new(hash::hmac(master_key, &msg)?);

        let mut next: VecDeque<Hash> = index.iter().filter(|p| *p != &pair).copied().collect();
        next.push_back(pair);
        let excess = next.len().saturating_sub(self.config.state_keys_capacity);
        let evicted: Vec<Hash> = next.drain(..excess).collect();

        let encoded = cbor::to_vec(next.iter().copied().collect::<Vec<_>>());
        self.keystore.store_keys(&[
            (KeyKind::StateKey(pair), &key[..]),
            (KeyKind::StateKeyIndex, &encoded[..]),
        ])?;
        *index = next;

        for old in &evicted {
            self.keystore.remove_key(KeyKind::StateKey(*old))?;
        }
        if !evicted.is_empty() {
            debug!(self.logger, "Evicted state keys"; "count" => evicted.len());
        }

        Ok(key)
    }
}

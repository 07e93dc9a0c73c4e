//! Node identity.
//!
//! A node goes through `Unregistered -> Registered -> Initialized`. The
//! transitions are [`Node::register`] and [`Node::initialize`]; flags only
//! flip once a transition fully succeeded. [`Node::close`] makes the node
//! unusable for the rest of its life.
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use slog::{info, warn, Logger};
use zeroize::Zeroizing;

use crate::{
    ca::CertificateAuthority,
    certificate::TrustPools,
    config::{NodeConfig, Settings},
    crypto::{self, hash, spi::AsymmetricCipherSpi},
    engine::{ChainKeyMaterial, Engine, Material},
    error::{Error, Stage},
    fuse::Fuse,
    keystore::{FileStorage, KeyKind, KeyStore, KeyValue, MemoryStorage},
    logger::get_logger,
};

mod client;
mod peer;

/// Role of a node identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Submits transactions.
    Client,
    /// Relays and pre-validates transactions.
    Peer,
    /// Peer which also executes confidential transactions.
    Validator,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Client => "client",
            NodeType::Peer => "peer",
            NodeType::Validator => "validator",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type SpiConstructor<S> = dyn Fn() -> Result<S, crypto::Error> + Send + Sync;

/// Entries written during registration, in commit order.
const ENROLLMENT_ENTRIES: [KeyKind; 6] = [
    KeyKind::EnrollmentKey,
    KeyKind::ChainKey,
    KeyKind::TrustAnchors,
    KeyKind::TlsKey,
    KeyKind::TlsCertificate,
    KeyKind::EnrollmentCertificate,
];

/// A node identity bound to one cipher provider.
pub struct Node<S: AsymmetricCipherSpi> {
    logger: Logger,
    config: NodeConfig,
    ca: Arc<dyn CertificateAuthority>,
    keystore: Arc<KeyStore>,
    spi_constructor: Box<SpiConstructor<S>>,
    engine: Fuse<Arc<Engine<S>>>,
    /// Serializes registration and key store bring-up.
    lifecycle: Mutex<()>,
    registered: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl<S: AsymmetricCipherSpi> Node<S> {
    /// Create a node identity.
    ///
    /// The configuration of the identity is derived from the settings here
    /// and never reloaded. The cipher provider constructor runs at most once,
    /// during the first [`Node::initialize`].
    pub fn new<F>(
        node_type: NodeType,
        name: &str,
        settings: Arc<Settings>,
        ca: Arc<dyn CertificateAuthority>,
        spi_constructor: F,
    ) -> Result<Self, Error>
    where
        F: Fn() -> Result<S, crypto::Error> + Send + Sync + 'static,
    {
        let config = NodeConfig::load(&settings, node_type, name)?;
        hash::set_hash_algorithm(config.hash_algorithm)?;

        let storage: Arc<dyn KeyValue> = match &config.keystore_path {
            Some(path) => Arc::new(FileStorage::new(path)?),
            None => Arc::new(MemoryStorage::new()),
        };

        let keystore = Arc::new(KeyStore::with_kdf_params(storage, config.kdf_params));

        Ok(Self {
            logger: get_logger("security/node"),
            config,
            ca,
            keystore,
            spi_constructor: Box::new(spi_constructor),
            engine: Fuse::new(),
            lifecycle: Mutex::new(()),
            registered: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_not_closed(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// The crypto engine of an initialized node.
    pub(crate) fn engine(&self) -> Result<Arc<Engine<S>>, Error> {
        self.ensure_not_closed()?;
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        match self.engine.get() {
            Some(Ok(engine)) => {
                engine.ensure_active()?;
                Ok(engine)
            }
            _ => Err(Error::NotInitialized),
        }
    }

    pub fn get_type(&self) -> NodeType {
        self.config.node_type
    }

    pub fn get_name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Whether the identity completed registration, in this process or an
    /// earlier one.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
            || self.initialized.load(Ordering::SeqCst)
            || self
                .keystore
                .contains_key(KeyKind::EnrollmentCertificate)
                .unwrap_or(false)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Enroll the identity with the certificate authority and persist the
    /// enrollment material.
    pub fn register(
        &self,
        passphrase: &[u8],
        enrollment_id: &str,
        enrollment_secret: &str,
    ) -> Result<(), Error> {
        self.do_register(passphrase, enrollment_id, enrollment_secret)
            .map_err(|err| err.at(Stage::Registration))
    }

    fn do_register(
        &self,
        passphrase: &[u8],
        enrollment_id: &str,
        enrollment_secret: &str,
    ) -> Result<(), Error> {
        let _guard = self.lock_lifecycle();
        self.ensure_not_closed()?;

        match self.keystore.init(passphrase) {
            Ok(()) => {}
            Err(Error::KeyStoreAlreadyInitialized) => {
                // Left behind by an earlier, possibly failed, registration.
                self.keystore.open(passphrase)?;
            }
            Err(err) => return Err(err),
        }

        if self.registered.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRegistered);
        }
        if self.initialized.load(Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        if self.keystore.contains_key(KeyKind::EnrollmentCertificate)? {
            self.registered.store(true, Ordering::SeqCst);
            return Err(Error::AlreadyRegistered);
        }

        // Drop whatever an interrupted registration left uncommitted.
        for kind in ENROLLMENT_ENTRIES {
            self.keystore.remove_key(kind)?;
        }

        let enrollment = self
            .ca
            .enroll(self.config.node_type, enrollment_id, enrollment_secret)?;

        let pools = TrustPools::from_authorities(&enrollment.authorities)?;
        pools.verify_enrollment(&enrollment.certificate)?;
        if enrollment.certificate.public_key() != &enrollment.private_key.public_key() {
            return Err(Error::InvalidCertificate("enrollment key mismatch"));
        }
        if enrollment.certificate.body.subject != enrollment_id {
            return Err(Error::InvalidCertificate("enrollment subject mismatch"));
        }
        if let Some((tls_cert, _)) = &enrollment.tls {
            pools.verify_tls(tls_cert)?;
        }

        // Validators need the chain private key to process confidential
        // transactions.
        if self.config.node_type == NodeType::Validator && enrollment.chain_private_key.is_none()
        {
            return Err(Error::CertificateAuthority(
                "validator enrollment without chain private key".to_owned(),
            ));
        }

        let ekey = enrollment.private_key.to_bytes();
        let chain = Zeroizing::new(cbor::to_vec(ChainKeyMaterial {
            tcert_owner_key: enrollment.tcert_owner_key.to_vec(),
            chain_public_key: enrollment.chain_public_key.clone(),
            chain_private_key: enrollment.chain_private_key.as_ref().map(|sk| sk.to_vec()),
        }));
        let anchors = cbor::to_vec(enrollment.authorities.clone());
        let ecert = enrollment.certificate.to_vec();
        let tls = enrollment
            .tls
            .as_ref()
            .map(|(cert, key)| (cert.to_vec(), key.to_bytes()));

        let mut entries: Vec<(KeyKind, &[u8])> = vec![
            (KeyKind::EnrollmentKey, ekey.as_slice()),
            (KeyKind::ChainKey, chain.as_slice()),
            (KeyKind::TrustAnchors, anchors.as_slice()),
        ];
        if let Some((cert, key)) = &tls {
            entries.push((KeyKind::TlsKey, key.as_slice()));
            entries.push((KeyKind::TlsCertificate, cert.as_slice()));
        }
        // The enrollment certificate commits the registration.
        entries.push((KeyKind::EnrollmentCertificate, ecert.as_slice()));
        self.keystore.store_keys(&entries)?;

        self.registered.store(true, Ordering::SeqCst);
        info!(self.logger, "Node registered";
            "node_type" => self.config.node_type.as_str(),
            "name" => &self.config.name,
            "enrollment_id" => enrollment_id,
        );

        Ok(())
    }

    /// Load the enrollment material and bring up the crypto engine.
    pub fn initialize(&self, passphrase: &[u8]) -> Result<(), Error> {
        self.do_initialize(passphrase)
            .map_err(|err| err.at(Stage::Initialization))
    }

    fn do_initialize(&self, passphrase: &[u8]) -> Result<(), Error> {
        self.ensure_not_closed()?;
        if self.initialized.load(Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        let material = {
            let _guard = self.lock_lifecycle();
            self.ensure_not_closed()?;
            self.keystore.init_or_open(passphrase)?;
            Material::load(&self.keystore)?
        };

        let result = self.engine.get_or_run(|| {
            let spi = (self.spi_constructor)()?;
            let engine = Engine::new(
                spi,
                self.config.clone(),
                self.ca.clone(),
                self.keystore.clone(),
                material,
            )?;
            Ok(Arc::new(engine))
        });
        if let Err(err) = result {
            warn!(self.logger, "Crypto engine unavailable"; "err" => %err);
            return Err(err);
        }

        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!(self.logger, "Node initialized";
                "node_type" => self.config.node_type.as_str(),
                "name" => &self.config.name,
            );
        }

        Ok(())
    }

    /// Release the key store and pooled resources.
    ///
    /// Every operation fails with [`Error::NotInitialized`] afterwards.
    pub fn close(&self) {
        let _guard = self.lock_lifecycle();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(Ok(engine)) = self.engine.get() {
            engine.deactivate();
        }
        self.keystore.close();
        info!(self.logger, "Node closed"; "name" => &self.config.name);
    }

    /// Serialized TLS certificate of peers and validators.
    pub fn get_tls_certificate(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.engine()?.tls_certificate().map(|cert| cert.to_vec()))
    }
}

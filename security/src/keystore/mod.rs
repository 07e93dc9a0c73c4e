//! Encrypted key store.
//!
//! Every entry is sealed with Deoxys-II under a key derived from the
//! passphrase with Argon2id. The marker entry holds the passphrase salt, the
//! key derivation parameters and a sealed check value; its presence is the
//! durable "initialized" marker and the check value validates passphrases on
//! [`KeyStore::open`].
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use slog::{info, warn, Logger};
use zeroize::Zeroize;

use crate::{
    crypto::{
        hash::Hash,
        spi::{
            deoxysii::{DeoxysIISecretKey, DeoxysIISpi},
            StreamCipher, StreamCipherSpi,
        },
    },
    error::Error,
    logger::get_logger,
};

mod storage;

pub use self::storage::{FileStorage, KeyValue, MemoryStorage};

/// Check value sealed into the marker entry.
const CHECK_VALUE: &[u8] = b"ledger-security/keystore: check";

/// Storage key of the marker entry.
const MARKER_STORAGE_KEY: &[u8] = b"keystore_marker";
/// Prefix for storage keys of the entries.
const ENTRY_STORAGE_KEY_PREFIX: &[u8] = b"keystore_entry_";

/// Current marker format version.
const MARKER_VERSION: u16 = 2;
/// Length of the passphrase salt.
const SALT_LENGTH: usize = 32;
/// Length of the sealing key.
const SEALING_KEY_LENGTH: usize = 32;

/// Argon2id cost parameters of the passphrase key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct KdfParams {
    /// Memory size in KiB.
    pub memory_cost: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: Params::DEFAULT_M_COST,
            time_cost: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Check that the parameters are accepted by Argon2id.
    pub fn validate(&self) -> Result<(), Error> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(SEALING_KEY_LENGTH),
        )
        .map_err(|_| Error::InvalidParameter("invalid key derivation parameters"))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Kind of a key store entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Enrollment private key.
    EnrollmentKey,
    /// Enrollment certificate.
    EnrollmentCertificate,
    /// TLS private key.
    TlsKey,
    /// TLS certificate.
    TlsCertificate,
    /// Enrollment chain key material.
    ChainKey,
    /// Authorities the node trusts.
    TrustAnchors,
    /// Symmetric state key of a (deploy, execute) transaction pair.
    StateKey(Hash),
    /// Pairs with a stored state key, least recently used first.
    StateKeyIndex,
}

impl KeyKind {
    /// Whether an entry of this kind may be overwritten.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, KeyKind::StateKey(_) | KeyKind::StateKeyIndex)
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyKind::EnrollmentKey => "enrollment key",
            KeyKind::EnrollmentCertificate => "enrollment certificate",
            KeyKind::TlsKey => "tls key",
            KeyKind::TlsCertificate => "tls certificate",
            KeyKind::ChainKey => "chain key",
            KeyKind::TrustAnchors => "trust anchors",
            KeyKind::StateKey(_) => "state key",
            KeyKind::StateKeyIndex => "state key index",
        }
    }

    fn storage_key(&self) -> Vec<u8> {
        let mut key = ENTRY_STORAGE_KEY_PREFIX.to_vec();
        match self {
            KeyKind::EnrollmentKey => key.extend_from_slice(b"ekey"),
            KeyKind::EnrollmentCertificate => key.extend_from_slice(b"ecert"),
            KeyKind::TlsKey => key.extend_from_slice(b"tlskey"),
            KeyKind::TlsCertificate => key.extend_from_slice(b"tlscert"),
            KeyKind::ChainKey => key.extend_from_slice(b"chain"),
            KeyKind::TrustAnchors => key.extend_from_slice(b"anchors"),
            KeyKind::StateKey(pair) => {
                key.extend_from_slice(b"state_");
                key.extend_from_slice(pair.as_ref());
            }
            KeyKind::StateKeyIndex => key.extend_from_slice(b"state_index"),
        }
        key
    }
}

/// Marker entry.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
struct Marker {
    version: u16,
    salt: Vec<u8>,
    kdf: KdfParams,
    check: Vec<u8>,
}

/// Passphrase-protected key store of one node identity.
pub struct KeyStore {
    logger: Logger,
    storage: Arc<dyn KeyValue>,
    spi: DeoxysIISpi,
    /// Key derivation parameters of newly initialized stores.
    kdf: KdfParams,
    /// Sealing key, present while the store is open.
    key: Mutex<Option<DeoxysIISecretKey>>,
}

impl KeyStore {
    /// Create a key store on top of the given storage.
    pub fn new(storage: Arc<dyn KeyValue>) -> Self {
        Self::with_kdf_params(storage, KdfParams::default())
    }

    /// Create a key store that derives the sealing key of a new store with
    /// the given parameters. Existing stores keep the parameters they were
    /// initialized with.
    pub fn with_kdf_params(storage: Arc<dyn KeyValue>, kdf: KdfParams) -> Self {
        Self {
            logger: get_logger("security/keystore"),
            storage,
            spi: DeoxysIISpi::new(),
            kdf,
            key: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DeoxysIISecretKey>> {
        self.key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn derive_key(
        &self,
        kdf: &KdfParams,
        salt: &[u8],
        passphrase: &[u8],
    ) -> Result<DeoxysIISecretKey, Error> {
        let mut raw = [0u8; SEALING_KEY_LENGTH];
        if kdf
            .argon2()?
            .hash_password_into(passphrase, salt, &mut raw)
            .is_err()
        {
            raw.zeroize();
            return Err(Error::InvalidParameter("passphrase key derivation failed"));
        }

        let key = self.spi.new_secret_key(&raw);
        raw.zeroize();
        Ok(key?)
    }

    fn seal(&self, key: &DeoxysIISecretKey, slot: &[u8], value: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = self
            .spi
            .new_stream_cipher_for_encryption(key)?
            .with_additional_data(slot);
        Ok(cipher.process(value)?)
    }

    fn open_sealed(
        &self,
        key: &DeoxysIISecretKey,
        slot: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = self
            .spi
            .new_stream_cipher_for_decryption(key)?
            .with_additional_data(slot);
        Ok(cipher.process(sealed)?)
    }

    fn load_marker(&self) -> Result<Option<Marker>, Error> {
        let raw = self.storage.get(MARKER_STORAGE_KEY.to_vec())?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(cbor::from_slice(&raw)?))
    }

    fn do_init(
        &self,
        guard: &mut MutexGuard<'_, Option<DeoxysIISecretKey>>,
        passphrase: &[u8],
    ) -> Result<(), Error> {
        if self.load_marker()?.is_some() {
            return Err(Error::KeyStoreAlreadyInitialized);
        }

        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive_key(&self.kdf, &salt, passphrase)?;

        let marker = Marker {
            version: MARKER_VERSION,
            check: self.seal(&key, MARKER_STORAGE_KEY, CHECK_VALUE)?,
            kdf: self.kdf,
            salt,
        };
        self.storage
            .insert(MARKER_STORAGE_KEY.to_vec(), cbor::to_vec(marker))?;

        **guard = Some(key);
        info!(self.logger, "Key store initialized";
            "memory_cost" => self.kdf.memory_cost,
            "time_cost" => self.kdf.time_cost,
        );

        Ok(())
    }

    fn do_open(
        &self,
        guard: &mut MutexGuard<'_, Option<DeoxysIISecretKey>>,
        passphrase: &[u8],
    ) -> Result<(), Error> {
        let marker = self.load_marker()?.ok_or(Error::KeyStoreNotFound)?;
        if marker.version != MARKER_VERSION {
            return Err(Error::Storage(format!(
                "unsupported key store version {}",
                marker.version
            )));
        }

        let key = self.derive_key(&marker.kdf, &marker.salt, passphrase)?;
        match self.open_sealed(&key, MARKER_STORAGE_KEY, &marker.check) {
            Ok(check) if check == CHECK_VALUE => {}
            _ => {
                warn!(self.logger, "Rejected key store passphrase");
                return Err(Error::InvalidPassphrase);
            }
        }

        **guard = Some(key);
        info!(self.logger, "Key store opened");

        Ok(())
    }

    /// Create a new empty store encrypted under the passphrase and open it.
    pub fn init(&self, passphrase: &[u8]) -> Result<(), Error> {
        let mut guard = self.lock();
        self.do_init(&mut guard, passphrase)
    }

    /// Unlock an existing store.
    pub fn open(&self, passphrase: &[u8]) -> Result<(), Error> {
        let mut guard = self.lock();
        self.do_open(&mut guard, passphrase)
    }

    /// Open the store if it exists, initialize it otherwise.
    pub fn init_or_open(&self, passphrase: &[u8]) -> Result<(), Error> {
        let mut guard = self.lock();
        match self.load_marker()? {
            Some(_) => self.do_open(&mut guard, passphrase),
            None => self.do_init(&mut guard, passphrase),
        }
    }

    /// Whether the store was initialized, possibly by an earlier process.
    pub fn is_initialized(&self) -> Result<bool, Error> {
        let _guard = self.lock();
        Ok(self.load_marker()?.is_some())
    }

    /// Whether the store is currently open.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Store a single entry.
    pub fn store_key(&self, kind: KeyKind, value: &[u8]) -> Result<(), Error> {
        self.store_keys(&[(kind, value)])
    }

    /// Store a batch of entries in order.
    ///
    /// Write-once conflicts are checked for the whole batch before anything is
    /// written.
    pub fn store_keys(&self, entries: &[(KeyKind, &[u8])]) -> Result<(), Error> {
        let guard = self.lock();
        let key = guard.as_ref().ok_or(Error::KeyStoreNotOpen)?;

        for (kind, value) in entries {
            if value.is_empty() {
                return Err(Error::InvalidParameter("key store values must not be empty"));
            }
            if !kind.is_refreshable() && !self.storage.get(kind.storage_key())?.is_empty() {
                return Err(Error::KeyAlreadyStored(kind.name().to_owned()));
            }
        }

        for (kind, value) in entries {
            let slot = kind.storage_key();
            let sealed = self.seal(key, &slot, value)?;
            self.storage.insert(slot, sealed)?;
        }

        Ok(())
    }

    /// Load an entry, `None` if absent.
    pub fn load_key(&self, kind: KeyKind) -> Result<Option<Vec<u8>>, Error> {
        let guard = self.lock();
        let key = guard.as_ref().ok_or(Error::KeyStoreNotOpen)?;

        let slot = kind.storage_key();
        let sealed = self.storage.get(slot.clone())?;
        if sealed.is_empty() {
            return Ok(None);
        }

        let value = self
            .open_sealed(key, &slot, &sealed)
            .map_err(|_| Error::Storage(format!("corrupted {} entry", kind.name())))?;
        Ok(Some(value))
    }

    /// Remove an entry. Removing an absent entry is not an error.
    pub fn remove_key(&self, kind: KeyKind) -> Result<(), Error> {
        let guard = self.lock();
        if guard.is_none() {
            return Err(Error::KeyStoreNotOpen);
        }
        self.storage.insert(kind.storage_key(), Vec::new())?;

        Ok(())
    }

    /// Whether an entry of the given kind exists. Works on a closed store.
    pub fn contains_key(&self, kind: KeyKind) -> Result<bool, Error> {
        let _guard = self.lock();
        Ok(!self.storage.get(kind.storage_key())?.is_empty())
    }

    /// Forget the sealing key. Safe to call multiple times.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            info!(self.logger, "Key store closed");
        }
    }

    /// Close the store and erase everything in it.
    pub fn destroy(&self) -> Result<(), Error> {
        let mut guard = self.lock();
        *guard = None;
        self.storage.clear()?;
        info!(self.logger, "Key store destroyed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KDF: KdfParams = KdfParams {
        memory_cost: 64,
        time_cost: 1,
        parallelism: 1,
    };

    fn new_keystore() -> KeyStore {
        KeyStore::with_kdf_params(Arc::new(MemoryStorage::new()), TEST_KDF)
    }

    #[test]
    fn test_init_twice() {
        let ks = new_keystore();
        assert!(!ks.is_initialized().unwrap());

        ks.init(b"passphrase").unwrap();
        assert!(ks.is_initialized().unwrap());
        assert!(ks.is_open());
        assert_eq!(ks.init(b"passphrase"), Err(Error::KeyStoreAlreadyInitialized));
        assert_eq!(ks.init(b"other"), Err(Error::KeyStoreAlreadyInitialized));
    }

    #[test]
    fn test_open() {
        let storage: Arc<dyn KeyValue> = Arc::new(MemoryStorage::new());
        let ks = KeyStore::with_kdf_params(storage.clone(), TEST_KDF);
        assert_eq!(ks.open(b"passphrase"), Err(Error::KeyStoreNotFound));

        ks.init(b"passphrase").unwrap();
        ks.store_key(KeyKind::EnrollmentKey, b"secret key").unwrap();
        ks.close();
        ks.close();
        assert!(!ks.is_open());
        assert_eq!(ks.load_key(KeyKind::EnrollmentKey), Err(Error::KeyStoreNotOpen));

        let reopened = KeyStore::with_kdf_params(storage, TEST_KDF);
        assert_eq!(reopened.open(b"wrong"), Err(Error::InvalidPassphrase));
        assert!(!reopened.is_open());
        reopened.init_or_open(b"passphrase").unwrap();
        assert_eq!(
            reopened.load_key(KeyKind::EnrollmentKey).unwrap(),
            Some(b"secret key".to_vec())
        );
    }

    #[test]
    fn test_write_once() {
        let ks = new_keystore();
        ks.init_or_open(b"pw").unwrap();

        ks.store_key(KeyKind::EnrollmentKey, b"first").unwrap();
        assert_eq!(
            ks.store_key(KeyKind::EnrollmentKey, b"second"),
            Err(Error::KeyAlreadyStored("enrollment key".to_owned()))
        );
        assert_eq!(
            ks.load_key(KeyKind::EnrollmentKey).unwrap(),
            Some(b"first".to_vec())
        );

        // A conflicting batch writes nothing.
        assert!(ks
            .store_keys(&[
                (KeyKind::ChainKey, &b"chain"[..]),
                (KeyKind::EnrollmentKey, &b"third"[..]),
            ])
            .is_err());
        assert_eq!(ks.load_key(KeyKind::ChainKey).unwrap(), None);

        // State keys are refreshable.
        let pair = Hash::digest_bytes(b"pair");
        ks.store_key(KeyKind::StateKey(pair), b"one").unwrap();
        ks.store_key(KeyKind::StateKey(pair), b"two").unwrap();
        assert_eq!(
            ks.load_key(KeyKind::StateKey(pair)).unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(
            ks.load_key(KeyKind::StateKey(Hash::digest_bytes(b"other"))).unwrap(),
            None
        );

        assert!(KeyKind::StateKeyIndex.is_refreshable());
        assert!(!KeyKind::ChainKey.is_refreshable());
        assert!(ks.store_key(KeyKind::ChainKey, b"").is_err());

        // A removed write-once entry may be stored again.
        ks.remove_key(KeyKind::EnrollmentKey).unwrap();
        ks.remove_key(KeyKind::EnrollmentKey).unwrap();
        assert_eq!(ks.load_key(KeyKind::EnrollmentKey).unwrap(), None);
        ks.store_key(KeyKind::EnrollmentKey, b"fourth").unwrap();
    }

    #[test]
    fn test_swapped_entries_rejected() {
        let storage: Arc<dyn KeyValue> = Arc::new(MemoryStorage::new());
        let ks = KeyStore::with_kdf_params(storage.clone(), TEST_KDF);
        ks.init(b"pw").unwrap();
        ks.store_key(KeyKind::EnrollmentKey, b"ekey").unwrap();

        // Move the sealed enrollment key into the chain key slot.
        let sealed = storage.get(KeyKind::EnrollmentKey.storage_key()).unwrap();
        storage
            .insert(KeyKind::ChainKey.storage_key(), sealed)
            .unwrap();
        assert!(matches!(
            ks.load_key(KeyKind::ChainKey),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_kdf_params() {
        let storage: Arc<dyn KeyValue> = Arc::new(MemoryStorage::new());
        let kdf = KdfParams {
            memory_cost: 128,
            time_cost: 2,
            parallelism: 2,
        };
        let ks = KeyStore::with_kdf_params(storage.clone(), kdf);
        ks.init(b"passphrase").unwrap();
        ks.store_key(KeyKind::ChainKey, b"chain").unwrap();

        // The parameters and salt are kept in the marker.
        let raw = storage.get(MARKER_STORAGE_KEY.to_vec()).unwrap();
        let marker: Marker = cbor::from_slice(&raw).unwrap();
        assert_eq!(marker.version, MARKER_VERSION);
        assert_eq!(marker.kdf, kdf);
        assert_eq!(marker.salt.len(), SALT_LENGTH);

        // A store opens with its own parameters, whatever the opener uses.
        for opener in [TEST_KDF, KdfParams::default()] {
            let reopened = KeyStore::with_kdf_params(storage.clone(), opener);
            assert_eq!(reopened.open(b"wrong"), Err(Error::InvalidPassphrase));
            reopened.open(b"passphrase").unwrap();
            assert_eq!(
                reopened.load_key(KeyKind::ChainKey).unwrap(),
                Some(b"chain".to_vec())
            );
        }

        // The salt is per store.
        let other: Arc<dyn KeyValue> = Arc::new(MemoryStorage::new());
        KeyStore::with_kdf_params(other.clone(), kdf)
            .init(b"passphrase")
            .unwrap();
        let other_marker: Marker =
            cbor::from_slice(&other.get(MARKER_STORAGE_KEY.to_vec()).unwrap()).unwrap();
        assert_ne!(other_marker.salt, marker.salt);

        assert!(KdfParams::default().validate().is_ok());
        let invalid = KdfParams {
            memory_cost: 1,
            ..TEST_KDF
        };
        assert!(invalid.validate().is_err());
        assert_eq!(
            KeyStore::with_kdf_params(Arc::new(MemoryStorage::new()), invalid).init(b"pw"),
            Err(Error::InvalidParameter("invalid key derivation parameters"))
        );
    }

    #[test]
    fn test_destroy() {
        let ks = new_keystore();
        ks.init(b"pw").unwrap();
        ks.store_key(KeyKind::EnrollmentKey, b"ekey").unwrap();
        assert!(ks.contains_key(KeyKind::EnrollmentKey).unwrap());

        ks.destroy().unwrap();
        assert!(!ks.is_initialized().unwrap());
        assert!(!ks.contains_key(KeyKind::EnrollmentKey).unwrap());

        ks.init(b"new").unwrap();
        assert_eq!(ks.load_key(KeyKind::EnrollmentKey).unwrap(), None);
    }

    #[test]
    fn test_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ks =
                KeyStore::with_kdf_params(Arc::new(FileStorage::new(dir.path()).unwrap()), TEST_KDF);
            ks.init(b"pw").unwrap();
            ks.store_key(KeyKind::EnrollmentCertificate, b"cert").unwrap();
        }

        let ks = KeyStore::new(Arc::new(FileStorage::new(dir.path()).unwrap()));
        assert!(ks.is_initialized().unwrap());
        assert_eq!(ks.init(b"pw"), Err(Error::KeyStoreAlreadyInitialized));
        ks.open(b"pw").unwrap();
        assert_eq!(
            ks.load_key(KeyKind::EnrollmentCertificate).unwrap(),
            Some(b"cert".to_vec())
        );
    }
}

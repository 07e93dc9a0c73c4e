//! Security layer configuration.
use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{crypto::hash::HashAlgorithm, error::Error, keystore::KdfParams, node::NodeType};

/// Root directory of the key stores.
pub const CFG_CRYPTO_PATH: &str = "security.crypto.path";
/// Process-wide hash algorithm.
pub const CFG_HASH_ALGORITHM: &str = "security.hashAlgorithm";
/// Number of transaction certificates requested per refill.
pub const CFG_TCERT_BATCH_SIZE: &str = "security.tcert.batch.size";
/// Certificate authority location.
pub const CFG_CA_ADDRESS: &str = "security.ca.address";
/// Whether the transport uses TLS.
pub const CFG_TLS_ENABLED: &str = "peer.tls.enabled";
/// Argon2id memory size (KiB) of new key stores.
pub const CFG_KDF_MEMORY: &str = "security.keystore.kdf.memory";
/// Argon2id passes of new key stores.
pub const CFG_KDF_ITERATIONS: &str = "security.keystore.kdf.iterations";
/// Argon2id parallelism of new key stores.
pub const CFG_KDF_PARALLELISM: &str = "security.keystore.kdf.parallelism";
/// Number of state pair keys a validator keeps in its key store.
pub const CFG_STATE_KEYS_CAPACITY: &str = "security.state.keys.capacity";

/// Whether the security layer is enabled at all.
pub const CFG_SECURITY_ENABLED: &str = "security.enabled";
/// Whether transaction confidentiality is requested.
pub const CFG_SECURITY_PRIVACY: &str = "security.privacy";
/// Enrollment identifier used by the bootstrap.
pub const CFG_ENROLL_ID: &str = "security.enrollID";
/// Enrollment secret used by the bootstrap.
pub const CFG_ENROLL_SECRET: &str = "security.enrollSecret";
/// Key store passphrase used by the bootstrap.
pub const CFG_PASSPHRASE: &str = "security.passphrase";
/// Whether the peer acts as a validator.
pub const CFG_VALIDATOR_ENABLED: &str = "peer.validator.enabled";

/// Default transaction certificate refill size.
pub const DEFAULT_TCERT_BATCH_SIZE: usize = 200;
/// Default number of persisted state pair keys.
pub const DEFAULT_STATE_KEYS_CAPACITY: usize = 128;

/// An immutable key/value configuration snapshot.
///
/// Nested JSON objects are flattened into dotted keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    /// Build settings from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Settings(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Parse settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|err| Error::Configuration(err.to_string()))?;

        let mut settings = BTreeMap::new();
        flatten("", &value, &mut settings)?;
        Ok(Settings(settings))
    }

    /// Return a copy with the given key set.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, Error> {
        self.parse(key)
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, Error> {
        self.parse(key)
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, Error> {
        self.parse(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        self.get(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| Error::Configuration(format!("malformed value for {key}")))
            })
            .transpose()
    }
}

fn flatten(
    prefix: &str,
    value: &serde_json::Value,
    out: &mut BTreeMap<String, String>,
) -> Result<(), Error> {
    use serde_json::Value;

    let scalar = match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, value, out)?;
            }
            return Ok(());
        }
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => return Ok(()),
        Value::Array(_) => {
            return Err(Error::Configuration(format!(
                "arrays are not supported ({prefix})"
            )))
        }
    };

    if prefix.is_empty() {
        return Err(Error::Configuration("top-level value must be an object".into()));
    }
    out.insert(prefix.to_owned(), scalar);
    Ok(())
}

/// Configuration of a single node identity.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_type: NodeType,
    pub name: String,
    /// Key store directory; `None` keeps the key store in memory.
    pub keystore_path: Option<PathBuf>,
    pub hash_algorithm: HashAlgorithm,
    pub tcert_batch_size: usize,
    /// Passphrase key derivation parameters of a new key store.
    pub kdf_params: KdfParams,
    /// Number of state pair keys kept in the key store.
    pub state_keys_capacity: usize,
    pub ca_address: Option<String>,
    pub tls_enabled: bool,
}

impl NodeConfig {
    /// Derive the configuration of the given identity.
    pub fn load(settings: &Settings, node_type: NodeType, name: &str) -> Result<Self, Error> {
        if name.is_empty() {
            return Err(Error::Configuration("node name must not be empty".into()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Configuration(format!("invalid node name: {name}")));
        }

        let keystore_path = settings.get(CFG_CRYPTO_PATH).map(|root| {
            PathBuf::from(root)
                .join(node_type.as_str())
                .join(name)
                .join("ks")
        });

        let hash_algorithm = match settings.get(CFG_HASH_ALGORITHM) {
            Some(alg) => alg.parse()?,
            None => HashAlgorithm::default(),
        };

        let tcert_batch_size = settings
            .get_usize(CFG_TCERT_BATCH_SIZE)?
            .unwrap_or(DEFAULT_TCERT_BATCH_SIZE);
        if tcert_batch_size == 0 {
            return Err(Error::Configuration(format!(
                "{CFG_TCERT_BATCH_SIZE} must be positive"
            )));
        }

        let defaults = KdfParams::default();
        let kdf_params = KdfParams {
            memory_cost: settings.get_u32(CFG_KDF_MEMORY)?.unwrap_or(defaults.memory_cost),
            time_cost: settings
                .get_u32(CFG_KDF_ITERATIONS)?
                .unwrap_or(defaults.time_cost),
            parallelism: settings
                .get_u32(CFG_KDF_PARALLELISM)?
                .unwrap_or(defaults.parallelism),
        };
        kdf_params
            .validate()
            .map_err(|_| Error::Configuration("invalid key store kdf parameters".into()))?;

        let state_keys_capacity = settings
            .get_usize(CFG_STATE_KEYS_CAPACITY)?
            .unwrap_or(DEFAULT_STATE_KEYS_CAPACITY);
        if state_keys_capacity == 0 {
            return Err(Error::Configuration(format!(
                "{CFG_STATE_KEYS_CAPACITY} must be positive"
            )));
        }

        Ok(Self {
            node_type,
            name: name.to_owned(),
            keystore_path,
            hash_algorithm,
            tcert_batch_size,
            kdf_params,
            state_keys_capacity,
            ca_address: settings.get(CFG_CA_ADDRESS).map(str::to_owned),
            tls_enabled: settings.get_bool(CFG_TLS_ENABLED)?.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_flattens() {
        let settings = Settings::from_json(
            r#"{
                "security": {
                    "enabled": true,
                    "crypto": { "path": "/var/ledger" },
                    "tcert": { "batch": { "size": 10 } }
                },
                "peer": { "tls": { "enabled": false } }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.get_bool(CFG_SECURITY_ENABLED).unwrap(), Some(true));
        assert_eq!(settings.get(CFG_CRYPTO_PATH), Some("/var/ledger"));
        assert_eq!(settings.get_usize(CFG_TCERT_BATCH_SIZE).unwrap(), Some(10));
        assert_eq!(settings.get_bool(CFG_TLS_ENABLED).unwrap(), Some(false));
        assert_eq!(settings.get(CFG_ENROLL_ID), None);

        assert!(Settings::from_json("[1, 2]").is_err());
        assert!(Settings::from_json(r#"{"a": [1]}"#).is_err());
    }

    #[test]
    fn test_node_config() {
        let settings = Settings::from_pairs([(CFG_CRYPTO_PATH, "/tmp/ledger")]);
        let cfg = NodeConfig::load(&settings, NodeType::Validator, "vp0").unwrap();
        assert_eq!(
            cfg.keystore_path,
            Some(PathBuf::from("/tmp/ledger/validator/vp0/ks"))
        );
        assert_eq!(cfg.tcert_batch_size, DEFAULT_TCERT_BATCH_SIZE);
        assert_eq!(cfg.hash_algorithm, HashAlgorithm::Sha256);
        assert!(!cfg.tls_enabled);

        let cfg = NodeConfig::load(&Settings::default(), NodeType::Client, "alice").unwrap();
        assert_eq!(cfg.keystore_path, None);

        let bad = Settings::default().with(CFG_TCERT_BATCH_SIZE, "0");
        assert!(matches!(
            NodeConfig::load(&bad, NodeType::Client, "alice"),
            Err(Error::Configuration(_))
        ));
        let bad = Settings::default().with(CFG_TCERT_BATCH_SIZE, "many");
        assert!(NodeConfig::load(&bad, NodeType::Client, "alice").is_err());
        let bad = Settings::default().with(CFG_HASH_ALGORITHM, "MD5");
        assert!(matches!(
            NodeConfig::load(&bad, NodeType::Client, "alice"),
            Err(Error::Crypto(_))
        ));
        assert!(NodeConfig::load(&Settings::default(), NodeType::Peer, "../x").is_err());
        assert!(NodeConfig::load(&Settings::default(), NodeType::Peer, "").is_err());
    }

    #[test]
    fn test_key_store_settings() {
        let cfg = NodeConfig::load(&Settings::default(), NodeType::Validator, "vp0").unwrap();
        assert_eq!(cfg.kdf_params, KdfParams::default());
        assert_eq!(cfg.state_keys_capacity, DEFAULT_STATE_KEYS_CAPACITY);

        let settings = Settings::from_pairs([
            (CFG_KDF_MEMORY, "64"),
            (CFG_KDF_ITERATIONS, "1"),
            (CFG_STATE_KEYS_CAPACITY, "4"),
        ]);
        let cfg = NodeConfig::load(&settings, NodeType::Validator, "vp0").unwrap();
        assert_eq!(
            cfg.kdf_params,
            KdfParams {
                memory_cost: 64,
                time_cost: 1,
                parallelism: KdfParams::default().parallelism,
            }
        );
        assert_eq!(cfg.state_keys_capacity, 4);

        for (key, value) in [
            (CFG_KDF_MEMORY, "1"),
            (CFG_KDF_ITERATIONS, "0"),
            (CFG_KDF_PARALLELISM, "-1"),
            (CFG_STATE_KEYS_CAPACITY, "0"),
        ] {
            let bad = Settings::default().with(key, value);
            assert!(matches!(
                NodeConfig::load(&bad, NodeType::Validator, "vp0"),
                Err(Error::Configuration(_))
            ));
        }
    }
}

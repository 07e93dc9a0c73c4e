//! Hashing and message authentication.
//!
//! Two flavours live here. [`Hash`] is a fixed 32-byte SHA-512/256 digest used
//! wherever a stable identifier is needed (certificate hashes, signature
//! digests). The free functions [`hash`], [`hmac`] and friends use the
//! process-wide hash algorithm which is chosen once and can never change
//! afterwards.
use std::{fmt, str::FromStr, sync::OnceLock};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512, Sha512_256};

use crate::Error;

/// Length of the truncated HMAC used to derive AES keys.
pub const AES_TRUNCATED_LENGTH: usize = 32;

impl_bytes!(Hash, 32, "A 32-byte SHA-512/256 hash.");

impl Hash {
    /// Compute a digest of the passed slice of bytes.
    pub fn digest_bytes(data: &[u8]) -> Hash {
        let mut result = [0u8; 32];
        result[..].copy_from_slice(Sha512_256::digest(data).as_ref());

        Hash(result)
    }

    /// Compute a digest of the passed slices of bytes.
    pub fn digest_bytes_list(data: &[&[u8]]) -> Hash {
        let mut ctx = Sha512_256::new();
        for datum in data {
            ctx.update(datum);
        }

        let mut result = [0u8; 32];
        result[..].copy_from_slice(ctx.finalize().as_ref());

        Hash(result)
    }
}

/// Hash algorithm used by the crypto layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
    Sha512_256,
}

impl HashAlgorithm {
    /// Canonical name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA2-256",
            HashAlgorithm::Sha384 => "SHA2-384",
            HashAlgorithm::Sha512 => "SHA2-512",
            HashAlgorithm::Sha512_256 => "SHA2-512/256",
        }
    }

    /// Digest (and full HMAC tag) length in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sha512_256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA2-256" | "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA2-384" | "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA2-512" | "SHA512" => Ok(HashAlgorithm::Sha512),
            "SHA2-512/256" | "SHA512/256" => Ok(HashAlgorithm::Sha512_256),
            _ => Err(Error::UnsupportedHashAlgorithm(s.to_owned())),
        }
    }
}

static DEFAULT_HASH: OnceLock<HashAlgorithm> = OnceLock::new();

/// Fix the process-wide hash algorithm.
///
/// Succeeds if the algorithm was not fixed yet or is already fixed to the same
/// value. Any use of the default hash (including [`hash_algorithm`]) fixes it.
pub fn set_hash_algorithm(algorithm: HashAlgorithm) -> Result<(), Error> {
    let current = *DEFAULT_HASH.get_or_init(|| algorithm);
    if current != algorithm {
        return Err(Error::HashAlgorithmAlreadyConfigured(current.name()));
    }
    Ok(())
}

/// The process-wide hash algorithm.
pub fn hash_algorithm() -> HashAlgorithm {
    *DEFAULT_HASH.get_or_init(HashAlgorithm::default)
}

/// Hash the message using the process-wide hash algorithm.
pub fn hash(msg: &[u8]) -> Vec<u8> {
    match hash_algorithm() {
        HashAlgorithm::Sha256 => Sha256::digest(msg).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(msg).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(msg).to_vec(),
        HashAlgorithm::Sha512_256 => Sha512_256::digest(msg).to_vec(),
    }
}

macro_rules! new_mac {
    ($digest:ty, $key:expr, $msg:expr) => {{
        // HMAC accepts keys of any length.
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .map_err(|_| Error::InvalidKeyParameter)?;
        mac.update($msg);
        mac
    }};
}

/// HMAC of the message under the given key using the process-wide hash
/// algorithm.
pub fn hmac(key: &[u8], msg: &[u8]) -> Result<Vec<u8>, Error> {
    let tag = match hash_algorithm() {
        HashAlgorithm::Sha256 => new_mac!(Sha256, key, msg).finalize().into_bytes().to_vec(),
        HashAlgorithm::Sha384 => new_mac!(Sha384, key, msg).finalize().into_bytes().to_vec(),
        HashAlgorithm::Sha512 => new_mac!(Sha512, key, msg).finalize().into_bytes().to_vec(),
        HashAlgorithm::Sha512_256 => new_mac!(Sha512_256, key, msg)
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Ok(tag)
}

/// HMAC truncated to the first `truncation` bytes of the tag.
///
/// The truncation must satisfy `0 < truncation <= tag length`.
pub fn hmac_truncated(key: &[u8], msg: &[u8], truncation: usize) -> Result<Vec<u8>, Error> {
    if truncation == 0 || truncation > hash_algorithm().output_size() {
        return Err(Error::InvalidParameter("hmac truncation out of range"));
    }

    let mut tag = hmac(key, msg)?;
    tag.truncate(truncation);
    Ok(tag)
}

/// HMAC truncated to the length of an AES-256 key.
pub fn hmac_aes_truncated(key: &[u8], msg: &[u8]) -> Result<Vec<u8>, Error> {
    hmac_truncated(key, msg, AES_TRUNCATED_LENGTH)
}

/// Verify a full-length HMAC tag in constant time.
pub fn hmac_verify(key: &[u8], msg: &[u8], tag: &[u8]) -> Result<(), Error> {
    let result = match hash_algorithm() {
        HashAlgorithm::Sha256 => new_mac!(Sha256, key, msg).verify_slice(tag),
        HashAlgorithm::Sha384 => new_mac!(Sha384, key, msg).verify_slice(tag),
        HashAlgorithm::Sha512 => new_mac!(Sha512, key, msg).verify_slice(tag),
        HashAlgorithm::Sha512_256 => new_mac!(Sha512_256, key, msg).verify_slice(tag),
    };
    result.map_err(|_| Error::DecryptionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        assert_eq!(
            Hash::digest_bytes(&[]).0[..4],
            [0xc6, 0x72, 0xb8, 0xd1],
            "SHA-512/256 of the empty string"
        );
        assert_eq!(
            Hash::digest_bytes_list(&[&b""[..], &b""[..]]),
            Hash::digest_bytes(&[])
        );
        assert_eq!(
            Hash::digest_bytes_list(&[&b"foo"[..], &b"bar"[..]]),
            Hash::digest_bytes(b"foobar")
        );
    }

    #[test]
    fn test_hash_algorithm_is_immutable() {
        // Whatever the first use fixed stays fixed.
        let current = hash_algorithm();
        assert!(set_hash_algorithm(current).is_ok());

        let other = match current {
            HashAlgorithm::Sha384 => HashAlgorithm::Sha256,
            _ => HashAlgorithm::Sha384,
        };
        assert_eq!(
            set_hash_algorithm(other),
            Err(Error::HashAlgorithmAlreadyConfigured(current.name()))
        );
        assert_eq!(hash_algorithm(), current);
        assert_eq!(hash(b"message").len(), current.output_size());
    }

    #[test]
    fn test_hash_algorithm_names() {
        for alg in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
            HashAlgorithm::Sha512_256,
        ] {
            assert_eq!(alg.name().parse::<HashAlgorithm>(), Ok(alg));
        }
        assert!(matches!(
            "MD5".parse::<HashAlgorithm>(),
            Err(Error::UnsupportedHashAlgorithm(_))
        ));
    }

    #[test]
    fn test_hmac_truncated() {
        let key = b"hmac key";
        let msg = b"some message";
        let full = hmac(key, msg).unwrap();
        assert_eq!(full.len(), hash_algorithm().output_size());

        for n in 1..=full.len() {
            let truncated = hmac_truncated(key, msg, n).unwrap();
            assert_eq!(truncated.len(), n);
            assert_eq!(&full[..n], &truncated[..]);
        }

        assert_eq!(
            hmac_truncated(key, msg, 0),
            Err(Error::InvalidParameter("hmac truncation out of range"))
        );
        assert!(hmac_truncated(key, msg, full.len() + 1).is_err());
        assert_eq!(hmac_aes_truncated(key, msg).unwrap(), full[..32].to_vec());
    }

    #[test]
    fn test_hmac_verify() {
        let tag = hmac(b"key", b"msg").unwrap();
        assert!(hmac_verify(b"key", b"msg", &tag).is_ok());
        assert_eq!(
            hmac_verify(b"other key", b"msg", &tag),
            Err(Error::DecryptionError)
        );
        assert_eq!(
            hmac_verify(b"key", b"msg", &tag[..tag.len() - 1]),
            Err(Error::DecryptionError)
        );
    }
}

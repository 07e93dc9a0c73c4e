//! Certificates and certificate pools.
use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    crypto::{
        hash::{self, Hash},
        signature::{PrivateKey, PublicKey, Signature, Signer},
    },
    error::Error,
};

/// Signature context of certificate bodies.
pub const CERTIFICATE_SIGNATURE_CONTEXT: &[u8] = b"ledger-security/certificate: body";
/// Domain separation context of transaction certificate key derivation.
const TCERT_KEY_DERIVATION_CONTEXT: &[u8] = b"ledger-security/certificate: tcert key";

/// Certificate kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, cbor::Encode, cbor::Decode)]
#[repr(u32)]
pub enum CertificateKind {
    /// Invalid certificate that should never be explicitly set.
    Invalid = 0,
    /// Certificate authority.
    Authority = 1,
    /// Long-lived enrollment certificate (ECert).
    Enrollment = 2,
    /// Short-lived transaction certificate (TCert).
    Transaction = 3,
    /// Transport certificate.
    Tls = 4,
}

impl Default for CertificateKind {
    fn default() -> Self {
        CertificateKind::Invalid
    }
}

/// Signed part of a certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct CertificateBody {
    pub kind: CertificateKind,
    pub serial: u64,
    pub subject: String,
    pub public_key: PublicKey,
    pub attributes: Vec<String>,
    /// Hash of the issuing certificate, all zeros when self-signed.
    pub issuer: Hash,
    /// Key derivation nonce of transaction certificates.
    pub nonce: Vec<u8>,
}

/// A certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct Certificate {
    pub body: CertificateBody,
    pub signature: Signature,
}

impl Certificate {
    /// Issue a certificate. A `None` issuer makes it self-signed.
    pub fn issue(
        mut body: CertificateBody,
        issuer: Option<&Certificate>,
        signer: &dyn Signer,
    ) -> Result<Self, Error> {
        body.issuer = issuer.map(Certificate::hash).unwrap_or_default();
        let signature = signer.sign(CERTIFICATE_SIGNATURE_CONTEXT, &cbor::to_vec(body.clone()))?;

        Ok(Self { body, signature })
    }

    /// Decode a certificate from its serialized form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let cert: Certificate = cbor::from_slice(data)
            .map_err(|_| Error::InvalidCertificate("malformed encoding"))?;
        if cert.body.kind == CertificateKind::Invalid {
            return Err(Error::InvalidCertificate("invalid kind"));
        }
        if !cert.body.public_key.is_valid() {
            return Err(Error::InvalidCertificate("invalid public key"));
        }
        Ok(cert)
    }

    /// Serialized form of the certificate.
    pub fn to_vec(&self) -> Vec<u8> {
        cbor::to_vec(self.clone())
    }

    /// Hash of the serialized certificate.
    pub fn hash(&self) -> Hash {
        Hash::digest_bytes(&self.to_vec())
    }

    pub fn kind(&self) -> CertificateKind {
        self.body.kind
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.body.public_key
    }

    pub fn attributes(&self) -> &[String] {
        &self.body.attributes
    }

    /// Whether the certificate carries every one of the given attributes.
    pub fn has_attributes(&self, attributes: &[String]) -> bool {
        attributes.iter().all(|a| self.body.attributes.contains(a))
    }

    pub fn is_self_signed(&self) -> bool {
        self.body.issuer == Hash::default()
    }

    /// Verify the certificate signature under the issuer's key.
    pub fn verify_signature(&self, issuer_key: &PublicKey) -> Result<(), Error> {
        self.signature
            .verify(
                issuer_key,
                CERTIFICATE_SIGNATURE_CONTEXT,
                &cbor::to_vec(self.body.clone()),
            )
            .map_err(|_| Error::InvalidCertificate("bad issuer signature"))
    }
}

/// Derive the private key of a transaction certificate.
///
/// Only the holder of the owner key (and the CA which issued it) can link a
/// transaction certificate to its enrollment.
pub fn derive_tcert_key(owner_key: &[u8], serial: u64, nonce: &[u8]) -> Result<PrivateKey, Error> {
    let mut serial_bytes = [0u8; 8];
    BigEndian::write_u64(&mut serial_bytes, serial);

    let mut msg = Vec::with_capacity(TCERT_KEY_DERIVATION_CONTEXT.len() + 8 + nonce.len());
    msg.extend_from_slice(TCERT_KEY_DERIVATION_CONTEXT);
    msg.extend_from_slice(&serial_bytes);
    msg.extend_from_slice(nonce);

    let seed = zeroize::Zeroizing::new(hash::hmac_aes_truncated(owner_key, &msg)?);
    Ok(PrivateKey::from_bytes(&seed)?)
}

/// A set of trusted authority certificates.
#[derive(Clone, Debug, Default)]
pub struct CertificatePool {
    certs: HashMap<Hash, Certificate>,
}

impl CertificatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trusted authority.
    pub fn add(&mut self, cert: Certificate) {
        self.certs.insert(cert.hash(), cert);
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn get(&self, hash: &Hash) -> Option<&Certificate> {
        self.certs.get(hash)
    }

    /// Verify that the certificate was issued by an authority of the pool.
    pub fn verify(&self, cert: &Certificate) -> Result<(), Error> {
        let issuer = self
            .certs
            .get(&cert.body.issuer)
            .ok_or(Error::InvalidCertificate("unknown issuer"))?;
        if issuer.kind() != CertificateKind::Authority {
            return Err(Error::InvalidCertificate("issuer is not an authority"));
        }
        cert.verify_signature(issuer.public_key())
    }
}

/// Authorities handed out by the certificate authority on enrollment.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct Authorities {
    /// Self-signed root.
    pub root: Certificate,
    /// Enrollment certificate authority.
    pub eca: Certificate,
    /// Transaction certificate authority.
    pub tca: Certificate,
    /// TLS certificate authority.
    pub tlsca: Certificate,
}

/// Trusted certificate pools of a node. Read-only once built.
#[derive(Clone, Debug, Default)]
pub struct TrustPools {
    pub roots: CertificatePool,
    pub tls: CertificatePool,
    pub eca: CertificatePool,
    pub tca: CertificatePool,
}

impl TrustPools {
    /// Build the pools, checking every intermediate against the root.
    pub fn from_authorities(authorities: &Authorities) -> Result<Self, Error> {
        let root = &authorities.root;
        if root.kind() != CertificateKind::Authority || !root.is_self_signed() {
            return Err(Error::InvalidCertificate("root is not a self-signed authority"));
        }
        root.verify_signature(root.public_key())?;

        let mut pools = TrustPools::default();
        pools.roots.add(root.clone());

        for (cert, pool) in [
            (&authorities.eca, &mut pools.eca),
            (&authorities.tca, &mut pools.tca),
            (&authorities.tlsca, &mut pools.tls),
        ] {
            if cert.kind() != CertificateKind::Authority {
                return Err(Error::InvalidCertificate("intermediate is not an authority"));
            }
            pools.roots.verify(cert)?;
            pool.add(cert.clone());
        }

        Ok(pools)
    }

    /// Validate an enrollment certificate.
    pub fn verify_enrollment(&self, cert: &Certificate) -> Result<(), Error> {
        if cert.kind() != CertificateKind::Enrollment {
            return Err(Error::InvalidCertificate("not an enrollment certificate"));
        }
        self.eca.verify(cert)
    }

    /// Validate a transaction certificate.
    pub fn verify_transaction(&self, cert: &Certificate) -> Result<(), Error> {
        if cert.kind() != CertificateKind::Transaction {
            return Err(Error::InvalidCertificate("not a transaction certificate"));
        }
        self.tca.verify(cert)
    }

    /// Validate a TLS certificate.
    pub fn verify_tls(&self, cert: &Certificate) -> Result<(), Error> {
        if cert.kind() != CertificateKind::Tls {
            return Err(Error::InvalidCertificate("not a tls certificate"));
        }
        self.tls.verify(cert)
    }

    /// Validate a certificate that signs transactions.
    pub fn verify_signer(&self, cert: &Certificate) -> Result<(), Error> {
        match cert.kind() {
            CertificateKind::Enrollment => self.verify_enrollment(cert),
            CertificateKind::Transaction => self.verify_transaction(cert),
            _ => Err(Error::InvalidCertificate("certificate cannot sign transactions")),
        }
    }
}

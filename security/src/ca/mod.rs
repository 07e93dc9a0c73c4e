//! Certificate authority boundary.
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::{
    certificate::{Authorities, Certificate},
    crypto::{
        hash::Hash,
        signature::{PrivateKey, Signature},
    },
    error::Error,
    node::NodeType,
};

pub mod mock;

/// Signature context of transaction certificate requests.
pub const TCERT_REQUEST_SIGNATURE_CONTEXT: &[u8] = b"ledger-security/ca: tcert request";

/// Maximum number of transaction certificates handed out per request.
pub const MAX_TCERT_BATCH: u32 = 1000;

/// Transaction certificate request, signed with the enrollment key.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct TCertRequest {
    pub enrollment_id: String,
    pub count: u32,
    pub attributes: Vec<String>,
    pub timestamp: u64,
}

/// Material handed out by the certificate authority on enrollment.
pub struct Enrollment {
    /// Enrollment certificate.
    pub certificate: Certificate,
    /// Enrollment signing key.
    pub private_key: PrivateKey,
    /// Key transaction certificate keys are derived from.
    pub tcert_owner_key: Zeroizing<Vec<u8>>,
    /// Serialized chain public key, used to encrypt confidential payloads.
    pub chain_public_key: Vec<u8>,
    /// Serialized chain private key, handed out to validators only.
    pub chain_private_key: Option<Zeroizing<Vec<u8>>>,
    /// Transport certificate and key, for peers and validators.
    pub tls: Option<(Certificate, PrivateKey)>,
    /// Authorities the node should trust.
    pub authorities: Authorities,
}

/// Certificate authority interface.
pub trait CertificateAuthority: Send + Sync {
    /// Enroll an identity.
    ///
    /// Enrolling an already enrolled identity issues fresh material.
    fn enroll(
        &self,
        node_type: NodeType,
        enrollment_id: &str,
        enrollment_secret: &str,
    ) -> Result<Enrollment, Error>;

    /// Request a batch of transaction certificates.
    fn request_tcerts(
        &self,
        request: &TCertRequest,
        signature: &Signature,
    ) -> Result<Vec<Certificate>, Error>;

    /// Fetch the enrollment certificate with the given hash.
    fn fetch_enrollment_certificate(&self, id: &Hash) -> Result<Certificate, Error>;
}

impl<T: ?Sized + CertificateAuthority> CertificateAuthority for Arc<T> {
    fn enroll(
        &self,
        node_type: NodeType,
        enrollment_id: &str,
        enrollment_secret: &str,
    ) -> Result<Enrollment, Error> {
        CertificateAuthority::enroll(&**self, node_type, enrollment_id, enrollment_secret)
    }

    fn request_tcerts(
        &self,
        request: &TCertRequest,
        signature: &Signature,
    ) -> Result<Vec<Certificate>, Error> {
        CertificateAuthority::request_tcerts(&**self, request, signature)
    }

    fn fetch_enrollment_certificate(&self, id: &Hash) -> Result<Certificate, Error> {
        CertificateAuthority::fetch_enrollment_certificate(&**self, id)
    }
}

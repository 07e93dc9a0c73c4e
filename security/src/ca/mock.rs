//! Mock certificate authority which keeps everything in memory.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    certificate::{derive_tcert_key, Authorities, Certificate, CertificateBody, CertificateKind},
    crypto::{
        hash::Hash,
        signature::{PrivateKey, Signature},
        spi::{ecies::EciesSpi, AsymmetricCipherSpi, PrivateKey as _},
    },
    error::Error,
    node::NodeType,
};

use super::{
    CertificateAuthority, Enrollment, TCertRequest, MAX_TCERT_BATCH,
    TCERT_REQUEST_SIGNATURE_CONTEXT,
};

/// Length of the transaction certificate owner key.
const TCERT_OWNER_KEY_LENGTH: usize = 32;
/// Length of the transaction certificate key derivation nonce.
const TCERT_NONCE_LENGTH: usize = 16;

struct User {
    secret: String,
    attributes: Vec<String>,
}

struct Enrolled {
    ecert: Certificate,
    tcert_owner_key: Zeroizing<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    enrolled: HashMap<String, Enrolled>,
    ecerts: HashMap<Hash, Certificate>,
    serial: u64,
}

impl Inner {
    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }
}

/// Mock certificate authority.
pub struct MockCertificateAuthority {
    authorities: Authorities,
    eca_key: PrivateKey,
    tca_key: PrivateKey,
    tlsca_key: PrivateKey,
    chain_public_key: Vec<u8>,
    chain_private_key: Zeroizing<Vec<u8>>,
    available: AtomicBool,
    enroll_calls: AtomicUsize,
    tcert_calls: AtomicUsize,
    inner: Mutex<Inner>,
}

fn issue_authority(
    subject: &str,
    key: &PrivateKey,
    parent: Option<(&Certificate, &PrivateKey)>,
) -> Result<Certificate, Error> {
    let body = CertificateBody {
        kind: CertificateKind::Authority,
        subject: subject.to_owned(),
        public_key: key.public_key(),
        ..Default::default()
    };
    match parent {
        Some((cert, signer)) => Certificate::issue(body, Some(cert), signer),
        None => Certificate::issue(body, None, key),
    }
}

impl MockCertificateAuthority {
    /// Create a new mock certificate authority with a fresh chain key pair.
    pub fn new() -> Result<Self, Error> {
        let spi = EciesSpi::new();
        let chain_key = spi.new_default_private_key()?;
        let chain_public_key = spi.serialize_public_key(&chain_key.public_key())?;
        let chain_private_key = spi.serialize_private_key(&chain_key)?;

        Self::with_chain_key(chain_public_key, chain_private_key)
    }

    /// Create a new mock certificate authority handing out the given
    /// serialized chain key pair.
    pub fn with_chain_key(
        chain_public_key: Vec<u8>,
        chain_private_key: Vec<u8>,
    ) -> Result<Self, Error> {
        let root_key = PrivateKey::generate();
        let eca_key = PrivateKey::generate();
        let tca_key = PrivateKey::generate();
        let tlsca_key = PrivateKey::generate();

        let root = issue_authority("root", &root_key, None)?;
        let authorities = Authorities {
            eca: issue_authority("eca", &eca_key, Some((&root, &root_key)))?,
            tca: issue_authority("tca", &tca_key, Some((&root, &root_key)))?,
            tlsca: issue_authority("tlsca", &tlsca_key, Some((&root, &root_key)))?,
            root,
        };

        Ok(Self {
            authorities,
            eca_key,
            tca_key,
            tlsca_key,
            chain_public_key,
            chain_private_key: Zeroizing::new(chain_private_key),
            available: AtomicBool::new(true),
            enroll_calls: AtomicUsize::new(0),
            tcert_calls: AtomicUsize::new(0),
            inner: Mutex::new(Inner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an identity which may then enroll.
    pub fn register_user(&self, enrollment_id: &str, secret: &str, attributes: &[&str]) {
        self.lock().users.insert(
            enrollment_id.to_owned(),
            User {
                secret: secret.to_owned(),
                attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
            },
        );
    }

    /// Simulate an outage (or recovery) of the authority.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of enrollment requests received.
    pub fn enroll_calls(&self) -> usize {
        self.enroll_calls.load(Ordering::SeqCst)
    }

    /// Number of transaction certificate requests received.
    pub fn tcert_calls(&self) -> usize {
        self.tcert_calls.load(Ordering::SeqCst)
    }

    pub fn authorities(&self) -> Authorities {
        self.authorities.clone()
    }

    fn ensure_available(&self) -> Result<(), Error> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::CertificateAuthorityUnavailable);
        }
        Ok(())
    }
}

impl CertificateAuthority for MockCertificateAuthority {
    fn enroll(
        &self,
        node_type: NodeType,
        enrollment_id: &str,
        enrollment_secret: &str,
    ) -> Result<Enrollment, Error> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut inner = self.lock();
        let attributes = match inner.users.get(enrollment_id) {
            Some(user) if user.secret == enrollment_secret => user.attributes.clone(),
            _ => {
                return Err(Error::CertificateAuthority(
                    "invalid enrollment credentials".to_owned(),
                ))
            }
        };

        let private_key = PrivateKey::generate();
        let certificate = Certificate::issue(
            CertificateBody {
                kind: CertificateKind::Enrollment,
                serial: inner.next_serial(),
                subject: enrollment_id.to_owned(),
                public_key: private_key.public_key(),
                attributes,
                ..Default::default()
            },
            Some(&self.authorities.eca),
            &self.eca_key,
        )?;

        let mut tcert_owner_key = Zeroizing::new(vec![0u8; TCERT_OWNER_KEY_LENGTH]);
        OsRng.fill_bytes(&mut tcert_owner_key);

        let tls = match node_type {
            NodeType::Client => None,
            NodeType::Peer | NodeType::Validator => {
                let tls_key = PrivateKey::generate();
                let tls_cert = Certificate::issue(
                    CertificateBody {
                        kind: CertificateKind::Tls,
                        serial: inner.next_serial(),
                        subject: enrollment_id.to_owned(),
                        public_key: tls_key.public_key(),
                        ..Default::default()
                    },
                    Some(&self.authorities.tlsca),
                    &self.tlsca_key,
                )?;
                Some((tls_cert, tls_key))
            }
        };

        let chain_private_key = match node_type {
            NodeType::Validator => Some(self.chain_private_key.clone()),
            _ => None,
        };

        inner.ecerts.insert(certificate.hash(), certificate.clone());
        inner.enrolled.insert(
            enrollment_id.to_owned(),
            Enrolled {
                ecert: certificate.clone(),
                tcert_owner_key: tcert_owner_key.clone(),
            },
        );

        Ok(Enrollment {
            certificate,
            private_key,
            tcert_owner_key,
            chain_public_key: self.chain_public_key.clone(),
            chain_private_key,
            tls,
            authorities: self.authorities.clone(),
        })
    }

    fn request_tcerts(
        &self,
        request: &TCertRequest,
        signature: &Signature,
    ) -> Result<Vec<Certificate>, Error> {
        self.tcert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut inner = self.lock();
        let enrolled = inner
            .enrolled
            .get(&request.enrollment_id)
            .ok_or_else(|| Error::CertificateAuthority("unknown enrollment".to_owned()))?;

        signature
            .verify(
                enrolled.ecert.public_key(),
                TCERT_REQUEST_SIGNATURE_CONTEXT,
                &cbor::to_vec(request.clone()),
            )
            .map_err(|_| Error::InvalidSignature)?;

        if request.count == 0 || request.count > MAX_TCERT_BATCH {
            return Err(Error::InvalidParameter("tcert count out of range"));
        }
        if !enrolled.ecert.has_attributes(&request.attributes) {
            return Err(Error::CertificateAuthority(
                "attributes not granted".to_owned(),
            ));
        }

        let owner_key = enrolled.tcert_owner_key.clone();
        let mut tcerts = Vec::with_capacity(request.count as usize);
        for _ in 0..request.count {
            let serial = inner.next_serial();
            let mut nonce = vec![0u8; TCERT_NONCE_LENGTH];
            OsRng.fill_bytes(&mut nonce);

            let key = derive_tcert_key(&owner_key, serial, &nonce)?;
            tcerts.push(Certificate::issue(
                CertificateBody {
                    kind: CertificateKind::Transaction,
                    serial,
                    public_key: key.public_key(),
                    attributes: request.attributes.clone(),
                    nonce,
                    ..Default::default()
                },
                Some(&self.authorities.tca),
                &self.tca_key,
            )?);
        }

        Ok(tcerts)
    }

    fn fetch_enrollment_certificate(&self, id: &Hash) -> Result<Certificate, Error> {
        self.ensure_available()?;

        self.lock()
            .ecerts
            .get(id)
            .cloned()
            .ok_or_else(|| {
                Error::CertificateAuthority("unknown enrollment certificate".to_owned())
            })
    }
}

//! Security bootstrap of a peer process.
use std::sync::Arc;

use slog::{error, info};

use crate::{
    ca::CertificateAuthority,
    config::{
        Settings, CFG_ENROLL_ID, CFG_ENROLL_SECRET, CFG_PASSPHRASE, CFG_SECURITY_ENABLED,
        CFG_SECURITY_PRIVACY, CFG_VALIDATOR_ENABLED,
    },
    crypto::{self, spi::AsymmetricCipherSpi},
    error::Error,
    fuse::Fuse,
    logger::{get_logger, init_logger},
    node::{Node, NodeType},
};

/// Bring up the identity of a peer process from its settings.
///
/// Returns `None` when security is disabled, in which case privacy must not
/// be requested either. The identity is registered if
/// needed and then initialized; an identity registered by an earlier run is
/// reused.
pub fn start_security<S, F>(
    settings: Arc<Settings>,
    ca: Arc<dyn CertificateAuthority>,
    spi_constructor: F,
) -> Result<Option<Arc<Node<S>>>, Error>
where
    S: AsymmetricCipherSpi,
    F: Fn() -> Result<S, crypto::Error> + Send + Sync + 'static,
{
    init_logger(log::Level::Info);
    let logger = get_logger("security/bootstrap");

    let privacy = settings.get_bool(CFG_SECURITY_PRIVACY)?.unwrap_or(false);
    if !settings.get_bool(CFG_SECURITY_ENABLED)?.unwrap_or(false) {
        if privacy {
            error!(logger, "Privacy cannot be enabled because security is disabled");
            return Err(Error::Configuration(format!(
                "{CFG_SECURITY_PRIVACY} requires {CFG_SECURITY_ENABLED}"
            )));
        }
        info!(logger, "Security is disabled");
        return Ok(None);
    }

    let enrollment_id = settings
        .get(CFG_ENROLL_ID)
        .ok_or_else(|| Error::Configuration(format!("missing {CFG_ENROLL_ID}")))?
        .to_owned();
    // Only needed on the first run.
    let enrollment_secret = settings.get(CFG_ENROLL_SECRET).unwrap_or_default().to_owned();
    let passphrase = settings.get(CFG_PASSPHRASE).unwrap_or_default().to_owned();
    let node_type = if settings.get_bool(CFG_VALIDATOR_ENABLED)?.unwrap_or(false) {
        NodeType::Validator
    } else {
        NodeType::Peer
    };

    info!(logger, "Security is starting";
        "node_type" => node_type.as_str(),
        "privacy" => privacy,
        "enrollment_id" => &enrollment_id,
    );

    let node = Node::new(node_type, &enrollment_id, settings, ca, spi_constructor)?;
    match node.register(passphrase.as_bytes(), &enrollment_id, &enrollment_secret) {
        Ok(()) => {}
        Err(err) if err.kind() == &Error::AlreadyRegistered => {
            info!(logger, "Identity already registered"; "enrollment_id" => &enrollment_id);
        }
        Err(err) => {
            error!(logger, "Failed to register identity"; "err" => %err);
            return Err(err);
        }
    }

    if let Err(err) = node.initialize(passphrase.as_bytes()) {
        error!(logger, "Failed to initialize identity"; "err" => %err);
        return Err(err);
    }
    info!(logger, "Security is ready");

    Ok(Some(Arc::new(node)))
}

/// Runs the security bootstrap at most once and hands out its outcome.
pub struct SecurityHelper<S: AsymmetricCipherSpi, F> {
    settings: Arc<Settings>,
    ca: Arc<dyn CertificateAuthority>,
    spi_constructor: F,
    node: Fuse<Option<Arc<Node<S>>>>,
}

impl<S, F> SecurityHelper<S, F>
where
    S: AsymmetricCipherSpi,
    F: Fn() -> Result<S, crypto::Error> + Clone + Send + Sync + 'static,
{
    pub fn new(
        settings: Arc<Settings>,
        ca: Arc<dyn CertificateAuthority>,
        spi_constructor: F,
    ) -> Self {
        Self {
            settings,
            ca,
            spi_constructor,
            node: Fuse::new(),
        }
    }

    /// The node of this process, `None` when security is disabled.
    pub fn node(&self) -> Result<Option<Arc<Node<S>>>, Error> {
        self.node.get_or_run(|| {
            start_security(
                self.settings.clone(),
                self.ca.clone(),
                self.spi_constructor.clone(),
            )
        })
    }
}

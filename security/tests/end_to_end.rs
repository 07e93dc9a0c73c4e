use std::{fs, path::Path, sync::Arc};

use ledger_security::{
    bootstrap::start_security,
    ca::mock::MockCertificateAuthority,
    config::{
        CFG_CRYPTO_PATH, CFG_ENROLL_ID, CFG_ENROLL_SECRET, CFG_SECURITY_ENABLED,
        CFG_STATE_KEYS_CAPACITY, CFG_VALIDATOR_ENABLED,
    },
    crypto::{spi::ecies::EciesSpi, Error as CryptoError},
    transaction::{generate_uuid, ChaincodeSpec},
    Error, Node, NodeType, Settings,
};

fn new_node(
    ca: &Arc<MockCertificateAuthority>,
    node_type: NodeType,
    name: &str,
    secret: &str,
) -> Node<EciesSpi> {
    let node = Node::new(
        node_type,
        name,
        Arc::new(Settings::default()),
        ca.clone(),
        || Ok(EciesSpi::new()),
    )
    .unwrap();
    node.register(b"passphrase", name, secret).unwrap();
    assert!(node.is_registered());
    node.initialize(b"passphrase").unwrap();
    assert!(node.is_initialized());
    node
}

fn new_network() -> (
    Arc<MockCertificateAuthority>,
    Node<EciesSpi>,
    Node<EciesSpi>,
    Node<EciesSpi>,
) {
    let ca = Arc::new(MockCertificateAuthority::new().unwrap());
    ca.register_user("alice", "secret1", &["role=admin"]);
    ca.register_user("vp0", "vp0secret", &[]);
    ca.register_user("vp1", "vp1secret", &[]);

    let alice = new_node(&ca, NodeType::Client, "alice", "secret1");
    let validator = new_node(&ca, NodeType::Validator, "vp0", "vp0secret");
    let peer = new_node(&ca, NodeType::Peer, "vp1", "vp1secret");
    (ca, alice, validator, peer)
}

#[test]
fn test_transaction_certificates() {
    let (_, alice, _, _) = new_network();
    let admin = vec!["role=admin".to_owned()];

    let handlers = alice.get_next_tcerts(5, &admin).unwrap();
    assert_eq!(handlers.len(), 5);

    let certs: Vec<_> = handlers.iter().map(|h| h.get_certificate()).collect();
    for (i, cert) in certs.iter().enumerate() {
        assert!(!certs[i + 1..].contains(cert), "certificates must be distinct");
    }

    for (i, signer) in handlers.iter().enumerate() {
        let signature = signer.sign(b"transfer 10").unwrap();
        for (j, verifier) in handlers.iter().enumerate() {
            let result = verifier.verify(&signature, b"transfer 10");
            if i == j {
                assert_eq!(result, Ok(()));
            } else {
                assert_eq!(result, Err(Error::InvalidSignature));
            }
        }
    }

    // Transaction certificates do not reveal the enrollment identity.
    for handler in &handlers {
        assert!(handler.certificate().body.subject.is_empty());
    }
}

#[test]
fn test_confidential_transactions() {
    let (_, alice, validator, peer) = new_network();
    let spec = ChaincodeSpec::new("mycc", b"init a 100").confidential();

    let deploy = alice
        .new_chaincode_deploy_transaction(&spec, &generate_uuid())
        .unwrap();
    assert!(deploy.is_confidential());
    assert_ne!(deploy.payload, b"init a 100");

    // Only validators hold the chain private key.
    let prepared = validator.transaction_pre_execution(&deploy).unwrap();
    assert_eq!(prepared.payload, b"init a 100");
    assert_eq!(prepared.signature, deploy.signature);

    let relayed = peer.transaction_pre_execution(&deploy).unwrap();
    assert_eq!(relayed, deploy);
    assert_eq!(peer.transaction_pre_validation(&deploy).unwrap(), deploy);

    // Public transactions are untouched everywhere.
    let public = alice
        .new_chaincode_execute(&ChaincodeSpec::new("mycc", b"get a"), &generate_uuid())
        .unwrap();
    assert_eq!(
        validator.transaction_pre_execution(&public).unwrap(),
        public
    );

    let mut tampered = deploy.clone();
    tampered.payload[0] ^= 0xff;
    assert_eq!(
        validator.transaction_pre_execution(&tampered),
        Err(Error::InvalidSignature)
    );
}

#[test]
fn test_state_encryption() {
    let (_, alice, validator, peer) = new_network();
    let spec = ChaincodeSpec::new("mycc", b"args").confidential();

    let deploy = alice
        .new_chaincode_deploy_transaction(&spec, &generate_uuid())
        .unwrap();
    let execute = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();
    let other = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();

    let encryptor = validator.get_state_encryptor(&deploy, &execute).unwrap();
    let ciphertext = encryptor.encrypt(b"balance=100").unwrap();
    assert_ne!(ciphertext.as_slice(), b"balance=100");
    assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), b"balance=100");

    // The same pair always yields the same key.
    let again = validator.get_state_encryptor(&deploy, &execute).unwrap();
    assert_eq!(again.decrypt(&ciphertext).unwrap(), b"balance=100");

    // A different pair does not.
    let foreign = validator.get_state_encryptor(&deploy, &other).unwrap();
    assert_eq!(
        foreign.decrypt(&ciphertext),
        Err(Error::Crypto(CryptoError::DecryptionError))
    );

    assert!(matches!(
        validator.get_state_encryptor(&execute, &deploy),
        Err(Error::InvalidTransaction(_))
    ));
    let unrelated = alice
        .new_chaincode_execute(&ChaincodeSpec::new("othercc", b"args"), &generate_uuid())
        .unwrap();
    assert!(matches!(
        validator.get_state_encryptor(&deploy, &unrelated),
        Err(Error::InvalidTransaction(_))
    ));

    assert_eq!(
        peer.get_state_encryptor(&deploy, &execute).err(),
        Some(Error::NotSupported("peer"))
    );
    assert_eq!(
        alice.get_state_encryptor(&deploy, &execute).err(),
        Some(Error::NotSupported("client"))
    );
}

fn count_entries(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_state_keys_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Arc::new(MockCertificateAuthority::new().unwrap());
    ca.register_user("alice", "secret1", &[]);
    ca.register_user("vp0", "vp0secret", &[]);
    let alice = new_node(&ca, NodeType::Client, "alice", "secret1");

    let settings = Arc::new(Settings::from_pairs([
        (CFG_CRYPTO_PATH, dir.path().to_str().unwrap()),
        (CFG_STATE_KEYS_CAPACITY, "4"),
    ]));
    let new_validator = || {
        Node::new(
            NodeType::Validator,
            "vp0",
            settings.clone(),
            ca.clone(),
            || Ok(EciesSpi::new()),
        )
        .unwrap()
    };
    let validator = new_validator();
    validator.register(b"passphrase", "vp0", "vp0secret").unwrap();
    validator.initialize(b"passphrase").unwrap();

    let ks_dir = dir.path().join("validator").join("vp0").join("ks");
    let registered = count_entries(&ks_dir);

    let spec = ChaincodeSpec::new("mycc", b"args").confidential();
    let deploy = alice
        .new_chaincode_deploy_transaction(&spec, &generate_uuid())
        .unwrap();
    let first = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();
    let ciphertext = validator
        .get_state_encryptor(&deploy, &first)
        .unwrap()
        .encrypt(b"a=1")
        .unwrap();

    for _ in 0..20 {
        let execute = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();
        validator.get_state_encryptor(&deploy, &execute).unwrap();
    }
    // Four state keys and their index.
    assert_eq!(count_entries(&ks_dir), registered + 5);

    // An evicted pair derives the same key again.
    let again = validator.get_state_encryptor(&deploy, &first).unwrap();
    assert_eq!(again.decrypt(&ciphertext).unwrap(), b"a=1");
    assert_eq!(count_entries(&ks_dir), registered + 5);

    // The bound holds across restarts.
    validator.close();
    let validator = new_validator();
    validator.initialize(b"passphrase").unwrap();
    for _ in 0..10 {
        let execute = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();
        validator.get_state_encryptor(&deploy, &execute).unwrap();
    }
    assert_eq!(count_entries(&ks_dir), registered + 5);
    let again = validator.get_state_encryptor(&deploy, &first).unwrap();
    assert_eq!(again.decrypt(&ciphertext).unwrap(), b"a=1");
}

#[test]
fn test_query_results() {
    let (ca, alice, validator, peer) = new_network();
    ca.register_user("bob", "secret2", &[]);
    let bob = new_node(&ca, NodeType::Client, "bob", "secret2");

    let spec = ChaincodeSpec::new("mycc", b"get a").confidential();
    let query = alice.new_chaincode_query(&spec, &generate_uuid()).unwrap();
    assert!(!query.result_key.is_empty());

    let ciphertext = validator.encrypt_query_result(&query, b"a=100").unwrap();
    assert_ne!(ciphertext.as_slice(), b"a=100");
    assert_eq!(
        alice.decrypt_query_result(&query, &ciphertext).unwrap(),
        b"a=100"
    );

    // Only the submitter can read the result.
    assert_eq!(
        bob.decrypt_query_result(&query, &ciphertext),
        Err(Error::Crypto(CryptoError::DecryptionError))
    );
    assert_eq!(
        peer.encrypt_query_result(&query, b"a=100").err(),
        Some(Error::NotSupported("peer"))
    );

    let mut tampered = query.clone();
    tampered.result_key[0] ^= 0xff;
    assert_eq!(
        validator.encrypt_query_result(&tampered, b"a=100"),
        Err(Error::InvalidSignature)
    );

    // Public query results pass through.
    let public = alice
        .new_chaincode_query(&ChaincodeSpec::new("mycc", b"get a"), &generate_uuid())
        .unwrap();
    assert!(public.result_key.is_empty());
    assert_eq!(
        validator.encrypt_query_result(&public, b"a=100").unwrap(),
        b"a=100"
    );
    assert_eq!(
        alice.decrypt_query_result(&public, b"a=100").unwrap(),
        b"a=100"
    );

    // Confidential executions carry no result key.
    let execute = alice.new_chaincode_execute(&spec, &generate_uuid()).unwrap();
    assert!(execute.result_key.is_empty());
    assert!(matches!(
        validator.encrypt_query_result(&execute, b"a=100"),
        Err(Error::InvalidTransaction(_))
    ));
}

#[test]
fn test_peer_identities() {
    let (_, alice, validator, peer) = new_network();

    let signature = validator.sign(b"block 7").unwrap();
    let validator_id = validator.get_id().unwrap();
    peer.verify(Some(validator_id.as_ref()), &signature, b"block 7")
        .unwrap();
    assert_eq!(
        peer.verify(Some(validator_id.as_ref()), &signature, b"block 8"),
        Err(Error::InvalidSignature)
    );

    assert!(validator.get_tls_certificate().unwrap().is_some());
    assert!(peer.get_tls_certificate().unwrap().is_some());
    assert_eq!(alice.get_tls_certificate().unwrap(), None);
}

#[test]
fn test_bootstrap() {
    let ca = Arc::new(MockCertificateAuthority::new().unwrap());
    ca.register_user("vp0", "vp0secret", &[]);
    let settings = Arc::new(Settings::from_pairs([
        (CFG_SECURITY_ENABLED, "true"),
        (CFG_ENROLL_ID, "vp0"),
        (CFG_ENROLL_SECRET, "vp0secret"),
        (CFG_VALIDATOR_ENABLED, "true"),
    ]));

    let node = start_security(settings, ca.clone(), || Ok(EciesSpi::new()))
        .unwrap()
        .expect("security is enabled");
    assert_eq!(node.get_type(), NodeType::Validator);
    assert_eq!(node.get_enrollment_id().unwrap(), "vp0");
    assert!(node.is_initialized());
    assert_eq!(ca.enroll_calls(), 1);
}

//! Cluster credentials.

use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ignition_abstraction::GenerationError;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SignatureAlgorithm,
};

const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const CLIENT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A PEM certificate and its private key, as Talos documents carry them.
#[derive(Clone, PartialEq, Eq)]
pub struct PemPair {
    pub crt: String,
    pub key: String,
}

impl std::fmt::Debug for PemPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemPair").field("crt_len", &self.crt.len()).finish_non_exhaustive()
    }
}

impl PemPair {
    /// Base64 of the PEM certificate.
    pub fn crt_b64(&self) -> String {
        STANDARD.encode(&self.crt)
    }

    /// Base64 of the PEM key.
    pub fn key_b64(&self) -> String {
        STANDARD.encode(&self.key)
    }
}

/// A CA that can still sign.
struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(
        common_name: &str,
        organization: Option<&str>,
        alg: &'static SignatureAlgorithm,
    ) -> Result<Self, GenerationError> {
        let mut params = CertificateParams::new(vec![]).map_err(credentials)?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        if let Some(organization) = organization {
            params.distinguished_name.push(DnType::OrganizationName, organization);
        }
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = SystemTime::now();
        params.not_before = now.into();
        params.not_after = (now + CA_VALIDITY).into();

        let key = KeyPair::generate_for(alg).map_err(credentials)?;
        let cert = params.self_signed(&key).map_err(credentials)?;
        Ok(Self { cert, key })
    }

    fn pem(&self) -> PemPair {
        PemPair { crt: self.cert.pem(), key: self.key.serialize_pem() }
    }
}

/// Every credential one cluster needs.
#[derive(Clone)]
pub struct ClusterSecrets {
    pub cluster_id: String,
    pub cluster_secret: String,
    /// Machine join token.
    pub machine_token: String,
    /// Kubernetes bootstrap token.
    pub bootstrap_token: String,
    pub secretbox_secret: String,
    /// Talos API CA.
    pub os_ca: PemPair,
    pub kubernetes_ca: PemPair,
    pub aggregator_ca: PemPair,
    pub etcd_ca: PemPair,
    /// Service account signing key (PEM).
    pub service_account_key: String,
    /// `os:admin` client certificate for the talosconfig.
    pub admin: PemPair,
}

impl std::fmt::Debug for ClusterSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSecrets").field("cluster_id", &self.cluster_id).finish_non_exhaustive()
    }
}

impl ClusterSecrets {
    /// Generates a fresh set of credentials for `cluster_name`.
    pub fn generate(cluster_name: &str) -> Result<Self, GenerationError> {
        let os = Authority::new("talos", Some("talos"), &rcgen::PKCS_ED25519)?;
        let kubernetes = Authority::new("kubernetes", Some(cluster_name), &rcgen::PKCS_ECDSA_P256_SHA256)?;
        let aggregator = Authority::new("front-proxy", None, &rcgen::PKCS_ECDSA_P256_SHA256)?;
        let etcd = Authority::new("etcd", Some("etcd"), &rcgen::PKCS_ECDSA_P256_SHA256)?;
        let service_account = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(credentials)?;
        let admin = client_certificate(&os, "admin", "os:admin")?;

        Ok(Self {
            cluster_id: random_base64(32),
            cluster_secret: random_base64(32),
            machine_token: join_token(),
            bootstrap_token: join_token(),
            secretbox_secret: random_base64(32),
            os_ca: os.pem(),
            kubernetes_ca: kubernetes.pem(),
            aggregator_ca: aggregator.pem(),
            etcd_ca: etcd.pem(),
            service_account_key: service_account.serialize_pem(),
            admin,
        })
    }
}

fn client_certificate(ca: &Authority, common_name: &str, organization: &str) -> Result<PemPair, GenerationError> {
    let mut params = CertificateParams::new(vec![]).map_err(credentials)?;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name.push(DnType::OrganizationName, organization);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + CLIENT_VALIDITY).into();

    let key = KeyPair::generate_for(&rcgen::PKCS_ED25519).map_err(credentials)?;
    let cert = params.signed_by(&key, &ca.cert, &ca.key).map_err(credentials)?;
    Ok(PemPair { crt: cert.pem(), key: key.serialize_pem() })
}

/// A `[a-z0-9]{6}.[a-z0-9]{16}` token, the format kubeadm-style joins expect.
pub fn join_token() -> String {
    let mut rng = rand::thread_rng();
    let mut part = |len: usize| -> String {
        (&mut rng)
            .sample_iter(&Alphanumeric)
            .map(|c| (c as char).to_ascii_lowercase())
            .take(len)
            .collect()
    };
    let id = part(6);
    let secret = part(16);
    format!("{id}.{secret}")
}

fn random_base64(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    STANDARD.encode(bytes)
}

fn credentials(e: rcgen::Error) -> GenerationError {
    GenerationError::Credentials(e.to_string())
}

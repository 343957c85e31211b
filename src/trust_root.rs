//! Pinned trust material
//!
//! [`TrustRoot`] is the Sigstore `trusted_root.json`: the Fulcio certificate
//! authorities that issue signing certificates and the Rekor transparency
//! logs that countersign entries. It is parsed and validated once, then
//! shared read-only for the life of the process.
//!
//! [`VendorRoots`] pins the hardware vendors' root keys used for runtime
//! attestation.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use x509_cert::Certificate;

use crate::certs::{self, CertError, PublicKey};
use crate::error::{Error, Result};

/// AMD ARK (AMD Root Key) for Genoa processors
/// This is the SPKI (SubjectPublicKeyInfo) SHA-256 fingerprint of the ARK public key.
///
/// To regenerate this value:
/// ```bash
/// curl -s 'https://kds.amd.com/vcek/v1/Genoa/cert_chain' | \
///   openssl x509 -pubkey -noout | \
///   openssl pkey -pubin -outform DER | sha256sum
/// ```
pub const AMD_ARK_GENOA_SPKI_FINGERPRINT: &str =
    "429a69c9422aa258ee4d8db5fcda9c6470ef15f8cd5a9cebd6cbc7d90b863831";

/// SHA-256 of the AWS Nitro Enclaves Root-G1 certificate (DER)
pub const AWS_NITRO_ROOT_G1_FINGERPRINT: &str =
    "641a0321a3e244efe456463195d606317ed7cdcc3c1756e09893f3c68f79bb5b";

/// Sigstore public-good `trusted_root.json`, as distributed by its TUF
/// repository (`tuf-repo-cdn.sigstore.dev`)
pub const PUBLIC_GOOD_TRUSTED_ROOT: &[u8] = include_bytes!("../trust/trusted_root.json");

static GLOBAL: OnceLock<Arc<TrustRoot>> = OnceLock::new();

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrustedRoot {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    tlogs: Vec<RawTransparencyLog>,
    #[serde(default)]
    certificate_authorities: Vec<RawCertificateAuthority>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransparencyLog {
    #[serde(default)]
    base_url: String,
    public_key: RawPublicKey,
    log_id: RawLogId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPublicKey {
    raw_bytes: Option<String>,
    #[serde(default)]
    key_details: Option<String>,
    #[serde(default)]
    valid_for: Option<RawValidFor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogId {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCertificateAuthority {
    #[serde(default)]
    uri: String,
    cert_chain: RawCertChain,
    #[serde(default)]
    valid_for: Option<RawValidFor>,
}

#[derive(Debug, Deserialize)]
struct RawCertChain {
    #[serde(default)]
    certificates: Vec<RawCertificate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCertificate {
    raw_bytes: String,
}

#[derive(Debug, Deserialize)]
struct RawValidFor {
    start: Option<String>,
    end: Option<String>,
}

/// Interval during which a CA or log key may be relied on. Open ends are
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidityWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }

    fn parse(raw: Option<&RawValidFor>, context: &str) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let parse_time = |value: &Option<String>| -> Result<Option<DateTime<Utc>>> {
            value
                .as_deref()
                .map(|s| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| malformed(format!("{}: bad timestamp {:?}: {}", context, s, e)))
                })
                .transpose()
        };
        Ok(Self {
            start: parse_time(&raw.start)?,
            end: parse_time(&raw.end)?,
        })
    }
}

/// A Fulcio certificate authority
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub uri: String,
    /// Leaf-most first; the last certificate is self-signed.
    pub chain: Vec<Certificate>,
    pub valid_for: ValidityWindow,
}

impl CertificateAuthority {
    /// The certificate that directly issues signing certificates
    pub fn issuer(&self) -> &Certificate {
        &self.chain[0]
    }
}

/// A Rekor transparency log
#[derive(Debug, Clone)]
pub struct TransparencyLog {
    pub base_url: String,
    pub log_id: Vec<u8>,
    pub key: PublicKey,
    pub valid_for: ValidityWindow,
}

#[derive(Debug, Clone)]
pub struct TrustRoot {
    media_type: Option<String>,
    authorities: Vec<CertificateAuthority>,
    logs: Vec<TransparencyLog>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::TrustRootMalformed(msg.into())
}

fn decode_b64(value: &str, context: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| malformed(format!("{}: invalid base64: {}", context, e)))
}

impl TrustRoot {
    /// Parse and validate a `trusted_root.json` document.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let raw: RawTrustedRoot = serde_json::from_slice(bytes)
            .map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

        if raw.certificate_authorities.is_empty() {
            return Err(malformed("no certificate authorities"));
        }

        let authorities = raw
            .certificate_authorities
            .iter()
            .enumerate()
            .map(|(i, ca)| Self::parse_authority(i, ca))
            .collect::<Result<Vec<_>>>()?;

        let mut logs = Vec::new();
        for (i, tlog) in raw.tlogs.iter().enumerate() {
            if let Some(log) = Self::parse_log(i, tlog)? {
                logs.push(log);
            }
        }
        if logs.is_empty() {
            return Err(malformed("no usable transparency logs"));
        }

        tracing::debug!(
            authorities = authorities.len(),
            logs = logs.len(),
            "Loaded trust root"
        );

        Ok(Self {
            media_type: raw.media_type,
            authorities,
            logs,
        })
    }

    fn parse_authority(index: usize, raw: &RawCertificateAuthority) -> Result<CertificateAuthority> {
        let context = format!("certificateAuthorities[{}]", index);

        if raw.cert_chain.certificates.is_empty() {
            return Err(malformed(format!("{}: empty certificate chain", context)));
        }

        let chain = raw
            .cert_chain
            .certificates
            .iter()
            .map(|c| {
                let der = decode_b64(&c.raw_bytes, &context)?;
                certs::parse_certificate(&der)
                    .map_err(|e| malformed(format!("{}: bad certificate: {}", context, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        certs::verify_chain(&chain)
            .map_err(|e| malformed(format!("{}: broken chain: {}", context, e)))?;

        Ok(CertificateAuthority {
            uri: raw.uri.clone(),
            chain,
            valid_for: ValidityWindow::parse(raw.valid_for.as_ref(), &context)?,
        })
    }

    /// Logs with key types we cannot verify are skipped rather than rejected,
    /// so a newer trusted root still loads.
    fn parse_log(index: usize, raw: &RawTransparencyLog) -> Result<Option<TransparencyLog>> {
        let context = format!("tlogs[{}]", index);

        let raw_bytes = raw
            .public_key
            .raw_bytes
            .as_deref()
            .ok_or_else(|| malformed(format!("{}: missing public key", context)))?;
        let spki = decode_b64(raw_bytes, &context)?;

        let key = match PublicKey::from_spki_der(&spki) {
            Ok(PublicKey::Rsa(_)) | Err(CertError::UnsupportedKey(_)) => {
                tracing::warn!(
                    log = %raw.base_url,
                    key_details = ?raw.public_key.key_details,
                    "Skipping transparency log with unsupported key type"
                );
                return Ok(None);
            }
            Ok(key) => key,
            Err(e) => return Err(malformed(format!("{}: bad public key: {}", context, e))),
        };

        Ok(Some(TransparencyLog {
            base_url: raw.base_url.clone(),
            log_id: decode_b64(&raw.log_id.key_id, &context)?,
            key,
            valid_for: ValidityWindow::parse(raw.public_key.valid_for.as_ref(), &context)?,
        }))
    }

    /// Install the process-wide trust root. Fails if one is already installed.
    pub fn install(root: TrustRoot) -> Result<Arc<TrustRoot>> {
        let root = Arc::new(root);
        GLOBAL
            .set(Arc::clone(&root))
            .map_err(|_| Error::InvalidInput("a trust root is already installed".into()))?;
        Ok(root)
    }

    pub fn global() -> Option<Arc<TrustRoot>> {
        GLOBAL.get().cloned()
    }

    /// The Sigstore public-good trusted root shipped in `trust/trusted_root.json`.
    /// Does not touch the process-wide root.
    pub fn public_good() -> Result<TrustRoot> {
        Self::load(PUBLIC_GOOD_TRUSTED_ROOT)
    }

    /// The shipped public-good root, installed globally on first use. Returns
    /// the already installed root if there is one.
    pub fn embedded() -> Result<Arc<TrustRoot>> {
        if let Some(root) = Self::global() {
            return Ok(root);
        }
        let root = Self::public_good()?;
        Ok(Arc::clone(GLOBAL.get_or_init(|| Arc::new(root))))
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn certificate_authorities(&self) -> &[CertificateAuthority] {
        &self.authorities
    }

    pub fn transparency_logs(&self) -> &[TransparencyLog] {
        &self.logs
    }

    pub fn find_log(&self, log_id: &[u8]) -> Option<&TransparencyLog> {
        self.logs.iter().find(|log| log.log_id == log_id)
    }
}

/// Pinned hardware-vendor roots for runtime attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRoots {
    /// Accepted ARK SPKI fingerprints (hex SHA-256)
    pub amd_ark_spki: Vec<String>,
    /// Accepted Nitro root certificate fingerprints (hex SHA-256 of the DER)
    pub aws_nitro_root: Vec<String>,
}

impl Default for VendorRoots {
    fn default() -> Self {
        Self {
            amd_ark_spki: vec![AMD_ARK_GENOA_SPKI_FINGERPRINT.to_string()],
            aws_nitro_root: vec![AWS_NITRO_ROOT_G1_FINGERPRINT.to_string()],
        }
    }
}

impl VendorRoots {
    pub fn trusts_amd_ark(&self, spki_fingerprint: &str) -> bool {
        self.amd_ark_spki.iter().any(|fp| fp.eq_ignore_ascii_case(spki_fingerprint))
    }

    pub fn trusts_nitro_root(&self, cert_fingerprint: &str) -> bool {
        self.aws_nitro_root.iter().any(|fp| fp.eq_ignore_ascii_case(cert_fingerprint))
    }
}

//! Sigstore verification for code provenance
//!
//! Verifies that a content digest was produced by a GitHub repository's
//! release workflow:
//! 1. Verify the DSSE signature with the Fulcio signing certificate's key
//! 2. Verify the Rekor log entry against the trust root's log keys
//! 3. Chain the signing certificate to a trusted Fulcio CA at log time
//! 4. Check the certificate was issued to GitHub Actions for the repo
//! 5. Check the in-toto subject digest and extract the measurement

pub mod bundle;
pub mod rekor;
pub mod release;
pub mod statement;

pub use bundle::{parse_attestations, DsseEnvelope, SignedBundle, TlogEntry};
pub use statement::Statement;

use chrono::{DateTime, Utc};
use der::asn1::Utf8StringRef;
use der::Decode;
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::Certificate;

use crate::attestation::types::Measurement;
use crate::certs::{self, PublicKey};
use crate::error::{Error, Result};
use crate::trust_root::TrustRoot;
use statement::IN_TOTO_PAYLOAD_TYPE;

/// OIDC issuer for GitHub Actions workload identities
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

const GITHUB_URL: &str = "https://github.com/";

// Fulcio certificate extensions
const OIDC_ISSUER_V1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1");
const OIDC_ISSUER_V2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8");
const BUILD_SIGNER_URI: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.9");
const SOURCE_REPOSITORY_URI: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.12");

/// Workload identity recorded in a Fulcio certificate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerIdentity {
    pub issuer: Option<String>,
    pub source_repository: Option<String>,
    pub build_signer: Option<String>,
    pub san_uris: Vec<String>,
}

impl SignerIdentity {
    pub fn from_certificate(cert: &Certificate) -> Result<Self> {
        let mut identity = SignerIdentity::default();

        for ext in cert.tbs_certificate.extensions.iter().flatten() {
            let value = ext.extn_value.as_bytes();
            match ext.extn_id {
                // v1 stores the raw string; v2 wraps it in a UTF8String
                OIDC_ISSUER_V1 if identity.issuer.is_none() => {
                    identity.issuer = std::str::from_utf8(value).ok().map(str::to_string);
                }
                OIDC_ISSUER_V2 => identity.issuer = Some(utf8_extension(value, "issuer")?),
                BUILD_SIGNER_URI => {
                    identity.build_signer = Some(utf8_extension(value, "build signer URI")?)
                }
                SOURCE_REPOSITORY_URI => {
                    identity.source_repository = Some(utf8_extension(value, "source repository URI")?)
                }
                _ => {}
            }
        }

        let san = cert
            .tbs_certificate
            .get::<SubjectAltName>()
            .map_err(|e| Error::MalformedEvidence(format!("Invalid subjectAltName: {}", e)))?;
        if let Some((_, SubjectAltName(names))) = san {
            identity.san_uris = names
                .into_iter()
                .filter_map(|name| match name {
                    GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                    _ => None,
                })
                .collect();
        }

        Ok(identity)
    }

    /// `owner/name` of the repository the certificate was issued to
    pub fn repository(&self) -> Option<String> {
        let uri = self
            .source_repository
            .as_deref()
            .or_else(|| self.san_uris.iter().map(String::as_str).find(|u| u.starts_with(GITHUB_URL)))?;
        let path = uri.strip_prefix(GITHUB_URL)?;
        let mut parts = path.splitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                Some(format!("{}/{}", owner, name))
            }
            _ => None,
        }
    }

    /// Check the certificate came from GitHub Actions running in `expected_repo`.
    pub fn check(&self, expected_repo: &str) -> Result<()> {
        if self.issuer.as_deref() != Some(GITHUB_ACTIONS_ISSUER) {
            return Err(Error::ChainNotTrusted(format!(
                "Certificate not from GitHub Actions. Issuer: {}",
                self.issuer.as_deref().unwrap_or("<none>")
            )));
        }

        let expected_url = format!("{}{}", GITHUB_URL, expected_repo);
        let matches = match &self.source_repository {
            Some(uri) => *uri == expected_url,
            None => {
                let prefix = format!("{}/", expected_url);
                self.san_uris.iter().any(|uri| uri.starts_with(&prefix))
            }
        };

        if !matches {
            return Err(Error::RepoMismatch {
                expected: expected_repo.to_string(),
                actual: self.repository().unwrap_or_else(|| "<none>".to_string()),
            });
        }

        Ok(())
    }
}

fn utf8_extension(value: &[u8], name: &str) -> Result<String> {
    Utf8StringRef::from_der(value)
        .map(|s| s.to_string())
        .map_err(|e| Error::MalformedEvidence(format!("Invalid {} extension: {}", name, e)))
}

/// Compute DSSE Pre-Authentication Encoding (PAE)
///
/// PAE(type, body) = "DSSEv1" + SP + LEN(type) + SP + type + SP + LEN(body) + SP + body
/// Where:
///   SP = ASCII space (0x20)
///   LEN(s) = ASCII decimal encoding of the byte length of s
pub fn compute_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_bytes = payload_type.as_bytes();

    let mut pae = Vec::with_capacity(payload.len() + type_bytes.len() + 32);
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(type_bytes.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(type_bytes);
    pae.push(b' ');
    pae.extend_from_slice(payload.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);

    pae
}

/// Every envelope signature must verify over the PAE with the signing
/// certificate's key.
fn verify_dsse_signature(envelope: &DsseEnvelope, cert: &Certificate) -> Result<()> {
    let key = PublicKey::from_certificate(cert)
        .map_err(|e| Error::SignatureInvalid(format!("Unusable signing key: {}", e)))?;

    let pae = compute_pae(&envelope.payload_type, &envelope.payload);
    for signature in &envelope.signatures {
        key.verify_message(&pae, &signature.sig)
            .map_err(|e| Error::SignatureInvalid(format!("DSSE signature verification failed: {}", e)))?;
    }

    Ok(())
}

/// Chain the signing certificate to a trust-root CA that was valid when the
/// entry was logged.
fn verify_certificate_chain(trust_root: &TrustRoot, cert: &Certificate, at: DateTime<Utc>) -> Result<()> {
    certs::check_validity(cert, at)
        .map_err(|e| Error::ChainNotTrusted(format!("Signing certificate: {}", e)))?;

    let mut last_error = None;
    for ca in trust_root.certificate_authorities() {
        if !ca.valid_for.contains(at) {
            continue;
        }
        match certs::verify_issued_by(cert, ca.issuer()) {
            Ok(()) => {
                for link in &ca.chain {
                    certs::check_validity(link, at)
                        .map_err(|e| Error::ChainNotTrusted(format!("Fulcio CA {}: {}", ca.uri, e)))?;
                }
                tracing::debug!(ca = %ca.uri, "Signing certificate chains to trusted CA");
                return Ok(());
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(Error::ChainNotTrusted(match last_error {
        Some(e) => format!("Signing certificate not issued by a trusted CA: {}", e),
        None => format!("No trusted CA was valid at {}", at),
    }))
}

/// Verify `bundle` attests `expected_digest` for `expected_repo` and return
/// the measurement it carries.
pub fn verify_bundle(
    trust_root: &TrustRoot,
    bundle: &SignedBundle,
    expected_digest: &str,
    expected_repo: &str,
) -> Result<Measurement> {
    let cert = certs::parse_certificate(&bundle.signing_certificate)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse signing certificate: {}", e)))?;

    verify_dsse_signature(&bundle.envelope, &cert)?;

    let entry = bundle
        .tlog_entries
        .first()
        .ok_or_else(|| Error::MalformedEvidence("No transparency log entries in bundle".into()))?;
    let signed_at = rekor::verify_entry(trust_root, entry, &bundle.envelope)?;

    verify_certificate_chain(trust_root, &cert, signed_at)?;

    let identity = SignerIdentity::from_certificate(&cert)?;
    identity.check(expected_repo)?;

    if bundle.envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
        return Err(Error::MalformedEvidence(format!(
            "Unexpected payload type: {}",
            bundle.envelope.payload_type
        )));
    }
    let statement = Statement::parse(&bundle.envelope.payload)?;
    statement.check_subject_digest(expected_digest)?;

    let measurement = statement.measurement()?;

    tracing::info!(
        repo = expected_repo,
        workflow = identity.build_signer.as_deref().unwrap_or("<unknown>"),
        signed_at = %signed_at,
        "Verified code provenance"
    );

    Ok(measurement)
}

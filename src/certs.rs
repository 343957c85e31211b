//! X.509 helpers shared by the Sigstore and hardware verifiers
//!
//! Fingerprints hash the full SPKI (SubjectPublicKeyInfo) DER encoding, not
//! just the raw public key bytes, which matches how OpenSSL computes them.

use chrono::{DateTime, Utc};
use der::{Decode, Encode};
use sha2::{Digest, Sha256, Sha384};
use signature::hazmat::PrehashVerifier;
use x509_cert::der::oid::db::rfc4519::CN;
use x509_cert::der::oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ID_EC_PUBLIC_KEY, ID_RSASSA_PSS, RSA_ENCRYPTION,
    SECP_256_R_1, SECP_384_R_1,
};
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertError {
    #[error("invalid DER: {0}")]
    Der(String),

    #[error("unsupported public key algorithm {0}")]
    UnsupportedKey(ObjectIdentifier),

    #[error("unsupported signature algorithm {0}")]
    UnsupportedSignature(ObjectIdentifier),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("signature does not verify")]
    BadSignature,

    #[error("issuer of {0} does not match the next certificate's subject")]
    IssuerMismatch(String),

    #[error("{0} is not self-signed")]
    NotSelfSigned(String),

    #[error("{subject} is not valid at {at} (valid {not_before} to {not_after})")]
    OutsideValidity {
        subject: String,
        at: DateTime<Utc>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    },
}

impl From<der::Error> for CertError {
    fn from(e: der::Error) -> Self {
        CertError::Der(e.to_string())
    }
}

pub fn parse_certificate(der_bytes: &[u8]) -> Result<Certificate, CertError> {
    Ok(Certificate::from_der(der_bytes)?)
}

/// Hex SHA-256 of the certificate's SubjectPublicKeyInfo DER
pub fn spki_fingerprint(cert: &Certificate) -> Result<String, CertError> {
    let spki_der = cert.tbs_certificate.subject_public_key_info.to_der()?;
    Ok(hex::encode(Sha256::digest(&spki_der)))
}

/// Hex SHA-256 of the whole certificate DER
pub fn cert_fingerprint(cert_der: &[u8]) -> String {
    hex::encode(Sha256::digest(cert_der))
}

/// Common Name of an X.509 name, if present and printable
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == CN)
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(str::to_string)
}

/// Short label for error messages: the subject CN, or the full subject
pub fn describe(cert: &Certificate) -> String {
    common_name(&cert.tbs_certificate.subject)
        .unwrap_or_else(|| cert.tbs_certificate.subject.to_string())
}

/// Public key of a certificate, ready to verify signatures
#[derive(Debug, Clone)]
pub enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    Rsa(rsa::RsaPublicKey),
}

impl PublicKey {
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self, CertError> {
        let key_bytes = spki.subject_public_key.raw_bytes();

        match spki.algorithm.oid {
            ID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .ok_or_else(|| CertError::InvalidKey("missing curve".into()))?
                    .decode_as::<ObjectIdentifier>()
                    .map_err(|e| CertError::InvalidKey(format!("bad curve: {}", e)))?;
                match curve {
                    SECP_256_R_1 => p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                        .map(PublicKey::P256)
                        .map_err(|e| CertError::InvalidKey(e.to_string())),
                    SECP_384_R_1 => p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                        .map(PublicKey::P384)
                        .map_err(|e| CertError::InvalidKey(e.to_string())),
                    other => Err(CertError::UnsupportedKey(other)),
                }
            }
            RSA_ENCRYPTION | ID_RSASSA_PSS => {
                use rsa::pkcs1::DecodeRsaPublicKey;
                rsa::RsaPublicKey::from_pkcs1_der(key_bytes)
                    .map(PublicKey::Rsa)
                    .map_err(|e| CertError::InvalidKey(e.to_string()))
            }
            other => Err(CertError::UnsupportedKey(other)),
        }
    }

    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self, CertError> {
        Self::from_spki(&SubjectPublicKeyInfoOwned::from_der(spki_der)?)
    }

    pub fn from_certificate(cert: &Certificate) -> Result<Self, CertError> {
        Self::from_spki(&cert.tbs_certificate.subject_public_key_info)
    }

    /// Verify an ECDSA signature over `message`, hashed with the curve's
    /// native digest (SHA-256 for P-256, SHA-384 for P-384). Accepts DER or
    /// fixed-width `r || s` encodings.
    pub fn verify_message(&self, message: &[u8], signature: &[u8]) -> Result<(), CertError> {
        match self {
            PublicKey::P256(_) => self.verify_prehash(&Sha256::digest(message), signature),
            PublicKey::P384(_) => self.verify_prehash(&Sha384::digest(message), signature),
            PublicKey::Rsa(_) => Err(CertError::UnsupportedKey(RSA_ENCRYPTION)),
        }
    }

    fn verify_prehash(&self, prehash: &[u8], signature: &[u8]) -> Result<(), CertError> {
        match self {
            PublicKey::P256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_slice(signature))
                    .map_err(|e| CertError::InvalidSignature(e.to_string()))?;
                key.verify_prehash(prehash, &sig)
                    .map_err(|_| CertError::BadSignature)
            }
            PublicKey::P384(key) => {
                let sig = p384::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p384::ecdsa::Signature::from_slice(signature))
                    .map_err(|e| CertError::InvalidSignature(e.to_string()))?;
                key.verify_prehash(prehash, &sig)
                    .map_err(|_| CertError::BadSignature)
            }
            PublicKey::Rsa(_) => Err(CertError::UnsupportedKey(RSA_ENCRYPTION)),
        }
    }

    /// RSASSA-PSS with SHA-384, as used throughout the AMD KDS chain
    fn verify_rsa_pss(&self, message: &[u8], signature: &[u8]) -> Result<(), CertError> {
        use rsa::pss::{Signature, VerifyingKey};
        use rsa::signature::Verifier;

        let PublicKey::Rsa(key) = self else {
            return Err(CertError::UnsupportedKey(ID_EC_PUBLIC_KEY));
        };
        let verifying_key: VerifyingKey<Sha384> = VerifyingKey::new(key.clone());
        let sig = Signature::try_from(signature)
            .map_err(|e| CertError::InvalidSignature(e.to_string()))?;
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CertError::BadSignature)
    }
}

/// Verify that `issuer_key` produced the signature on `cert`.
pub fn verify_signed_by(cert: &Certificate, issuer_key: &PublicKey) -> Result<(), CertError> {
    let tbs = cert.tbs_certificate.to_der()?;
    let signature = cert.signature.raw_bytes();

    match cert.signature_algorithm.oid {
        ECDSA_WITH_SHA_256 => issuer_key.verify_prehash(&Sha256::digest(&tbs), signature),
        ECDSA_WITH_SHA_384 => issuer_key.verify_prehash(&Sha384::digest(&tbs), signature),
        ID_RSASSA_PSS => issuer_key.verify_rsa_pss(&tbs, signature),
        other => Err(CertError::UnsupportedSignature(other)),
    }
}

/// Verify that `issuer` issued `cert`: names link and the signature holds.
pub fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<(), CertError> {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(CertError::IssuerMismatch(describe(cert)));
    }
    verify_signed_by(cert, &PublicKey::from_certificate(issuer)?)
}

/// Verify a leaf-first chain: each certificate is issued by the next, and
/// the last one is self-signed.
pub fn verify_chain(chain: &[Certificate]) -> Result<(), CertError> {
    for pair in chain.windows(2) {
        verify_issued_by(&pair[0], &pair[1])?;
    }
    if let Some(root) = chain.last() {
        verify_issued_by(root, root).map_err(|e| match e {
            CertError::IssuerMismatch(name) => CertError::NotSelfSigned(name),
            other => other,
        })?;
    }
    Ok(())
}

pub fn validity_window(cert: &Certificate) -> (DateTime<Utc>, DateTime<Utc>) {
    let validity = &cert.tbs_certificate.validity;
    (
        DateTime::<Utc>::from(validity.not_before.to_system_time()),
        DateTime::<Utc>::from(validity.not_after.to_system_time()),
    )
}

pub fn check_validity(cert: &Certificate, at: DateTime<Utc>) -> Result<(), CertError> {
    let (not_before, not_after) = validity_window(cert);
    if at < not_before || at > not_after {
        return Err(CertError::OutsideValidity {
            subject: describe(cert),
            at,
            not_before,
            not_after,
        });
    }
    Ok(())
}

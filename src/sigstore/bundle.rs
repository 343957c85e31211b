//! Sigstore bundle parsing
//!
//! Accepts the GitHub attestations API response and the JSON form of a
//! Sigstore bundle (v0.1 through v0.3). Parsing decodes every base64 field up
//! front so verification works on the exact bytes that were signed.

use base64::Engine;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    #[serde(default)]
    attestations: Vec<AttestationEntry>,
}

#[derive(Debug, Deserialize)]
struct AttestationEntry {
    bundle: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBundle {
    #[serde(default)]
    media_type: String,
    verification_material: Option<RawVerificationMaterial>,
    dsse_envelope: Option<RawEnvelope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerificationMaterial {
    certificate: Option<RawRawBytes>,
    x509_certificate_chain: Option<RawCertificateChain>,
    #[serde(default)]
    tlog_entries: Vec<RawTlogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRawBytes {
    raw_bytes: String,
}

#[derive(Debug, Deserialize)]
struct RawCertificateChain {
    #[serde(default)]
    certificates: Vec<RawRawBytes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    payload: Option<String>,
    payload_type: Option<String>,
    #[serde(default)]
    signatures: Vec<RawSignature>,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    sig: Option<String>,
    #[serde(default)]
    keyid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTlogEntry {
    #[serde(deserialize_with = "int64")]
    log_index: i64,
    log_id: RawLogId,
    kind_version: RawKindVersion,
    #[serde(deserialize_with = "int64")]
    integrated_time: i64,
    inclusion_promise: Option<RawInclusionPromise>,
    canonicalized_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogId {
    key_id: String,
}

#[derive(Debug, Deserialize)]
struct RawKindVersion {
    kind: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInclusionPromise {
    signed_entry_timestamp: String,
}

/// Protobuf JSON writes int64 as a string; accept both forms.
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        String(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsseSignature {
    pub keyid: String,
    pub sig: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsseEnvelope {
    pub payload_type: String,
    /// Decoded payload, exactly as signed
    pub payload: Vec<u8>,
    pub signatures: Vec<DsseSignature>,
}

/// One Rekor transparency log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlogEntry {
    pub log_index: i64,
    pub log_id: Vec<u8>,
    pub kind: String,
    pub version: String,
    /// Seconds since the Unix epoch
    pub integrated_time: i64,
    pub signed_entry_timestamp: Option<Vec<u8>>,
    pub canonicalized_body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBundle {
    pub media_type: String,
    pub envelope: DsseEnvelope,
    /// DER of the Fulcio signing certificate
    pub signing_certificate: Vec<u8>,
    pub tlog_entries: Vec<TlogEntry>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedEvidence(msg.into())
}

fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| malformed(format!("{}: invalid base64: {}", field, e)))
}

/// Parse a GitHub attestations response and return its first bundle.
///
/// Only the first attestation is verified. Later entries for the same
/// digest (re-signed or from another builder) are ignored.
pub fn parse_attestations(raw: &[u8]) -> Result<SignedBundle> {
    let response: AttestationResponse = serde_json::from_slice(raw)
        .map_err(|e| malformed(format!("Failed to parse attestations response: {}", e)))?;

    if response.attestations.len() > 1 {
        tracing::warn!(
            count = response.attestations.len(),
            "Multiple attestations returned; verifying only the first"
        );
    }

    let entry = response
        .attestations
        .into_iter()
        .next()
        .ok_or_else(|| malformed("No attestations found"))?;
    let bundle = entry
        .bundle
        .ok_or_else(|| malformed("attestations[0]: missing bundle"))?;

    SignedBundle::from_value(bundle)
}

impl SignedBundle {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| malformed(format!("Failed to parse bundle: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawBundle = serde_json::from_value(value)
            .map_err(|e| malformed(format!("Failed to parse bundle: {}", e)))?;

        let envelope = raw
            .dsse_envelope
            .ok_or_else(|| malformed("No dsseEnvelope in bundle"))?;
        let material = raw
            .verification_material
            .ok_or_else(|| malformed("No verificationMaterial in bundle"))?;

        let payload_type = envelope
            .payload_type
            .ok_or_else(|| malformed("dsseEnvelope: missing payloadType"))?;
        let payload = decode_b64(
            envelope
                .payload
                .as_deref()
                .ok_or_else(|| malformed("dsseEnvelope: missing payload"))?,
            "dsseEnvelope.payload",
        )?;

        if envelope.signatures.is_empty() {
            return Err(malformed("dsseEnvelope: no signatures"));
        }
        let signatures = envelope
            .signatures
            .into_iter()
            .map(|s| {
                let sig = s
                    .sig
                    .as_deref()
                    .ok_or_else(|| malformed("dsseEnvelope.signatures: missing sig"))?;
                Ok(DsseSignature {
                    keyid: s.keyid,
                    sig: decode_b64(sig, "dsseEnvelope.signatures.sig")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // v0.3 carries a single certificate; earlier versions a leaf-first chain
        let cert_b64 = match (&material.certificate, &material.x509_certificate_chain) {
            (Some(cert), _) => &cert.raw_bytes,
            (None, Some(chain)) => {
                &chain
                    .certificates
                    .first()
                    .ok_or_else(|| malformed("x509CertificateChain: no certificates"))?
                    .raw_bytes
            }
            (None, None) => return Err(malformed("No certificate in bundle")),
        };
        let signing_certificate = decode_b64(cert_b64, "verificationMaterial.certificate")?;

        if material.tlog_entries.is_empty() {
            return Err(malformed("No transparency log entries in bundle"));
        }
        let tlog_entries = material
            .tlog_entries
            .into_iter()
            .map(|e| {
                Ok(TlogEntry {
                    log_index: e.log_index,
                    log_id: decode_b64(&e.log_id.key_id, "tlogEntries.logId.keyId")?,
                    kind: e.kind_version.kind,
                    version: e.kind_version.version,
                    integrated_time: e.integrated_time,
                    signed_entry_timestamp: e
                        .inclusion_promise
                        .map(|p| {
                            decode_b64(
                                &p.signed_entry_timestamp,
                                "tlogEntries.inclusionPromise.signedEntryTimestamp",
                            )
                        })
                        .transpose()?,
                    canonicalized_body: decode_b64(
                        &e.canonicalized_body,
                        "tlogEntries.canonicalizedBody",
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            media_type: raw.media_type,
            envelope: DsseEnvelope {
                payload_type,
                payload,
                signatures,
            },
            signing_certificate,
            tlog_entries,
        })
    }
}

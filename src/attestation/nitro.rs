//! AWS Nitro Enclaves attestation verification
//!
//! The document is a COSE_Sign1 structure whose payload is a CBOR map.
//! Verification flow:
//! 1. Decode the base64 body into COSE_Sign1 (tagged or untagged)
//! 2. Require ES384 in the protected header
//! 3. Build the chain leaf → cabundle (reversed) and check it ends at the
//!    pinned AWS root
//! 4. Verify the COSE signature with the leaf key
//! 5. Extract PCR0..PCR2 and the enclave's public key

use base64::Engine;
use chrono::{DateTime, Utc};
use coset::cbor::Value;
use coset::{iana, CborSerializable, CoseSign1, RegisteredLabelWithPrivate, TaggedCborSerializable};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use x509_cert::Certificate;

use super::types::{Measurement, PredicateType, Verification};
use crate::certs::{self, PublicKey};
use crate::error::{Error, Result};
use crate::trust_root::VendorRoots;

const PCR_LEN: usize = 48;
const REQUIRED_PCRS: [u64; 3] = [0, 1, 2];

/// Decoded Nitro attestation document. Fields are unverified until
/// [`verify`] succeeds.
#[derive(Debug, Clone)]
pub struct NitroDocument {
    pub module_id: String,
    pub digest: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub pcrs: BTreeMap<u64, Vec<u8>>,
    pub certificate: Vec<u8>,
    /// Root first
    pub cabundle: Vec<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    sign1: CoseSign1,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedEvidence(msg.into())
}

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
        .filter(|v| !v.is_null())
}

fn required<'a>(map: &'a [(Value, Value)], name: &str) -> Result<&'a Value> {
    field(map, name).ok_or_else(|| malformed(format!("Nitro document: missing {}", name)))
}

fn bytes_field(map: &[(Value, Value)], name: &str) -> Result<Option<Vec<u8>>> {
    match field(map, name) {
        None => Ok(None),
        Some(v) => v
            .as_bytes()
            .cloned()
            .map(Some)
            .ok_or_else(|| malformed(format!("Nitro document: {} is not a byte string", name))),
    }
}

fn text_field(map: &[(Value, Value)], name: &str) -> Result<String> {
    required(map, name)?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("Nitro document: {} is not text", name)))
}

impl NitroDocument {
    pub fn decode(body: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| malformed(format!("Base64 decode failed: {}", e)))?;

        let sign1 = CoseSign1::from_tagged_slice(&raw)
            .or_else(|_| CoseSign1::from_slice(&raw))
            .map_err(|e| malformed(format!("Invalid COSE_Sign1: {:?}", e)))?;

        let es384 = RegisteredLabelWithPrivate::Assigned(iana::Algorithm::ES384);
        if sign1.protected.header.alg.as_ref() != Some(&es384) {
            return Err(malformed(format!(
                "Unexpected COSE algorithm: {:?}",
                sign1.protected.header.alg
            )));
        }

        let payload = sign1
            .payload
            .as_deref()
            .ok_or_else(|| malformed("COSE_Sign1 has no payload"))?;
        let value: Value = coset::cbor::de::from_reader(payload)
            .map_err(|e| malformed(format!("Invalid CBOR payload: {}", e)))?;
        let map = value
            .as_map()
            .ok_or_else(|| malformed("Nitro document payload is not a map"))?;

        let timestamp = required(map, "timestamp")?
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| malformed("Nitro document: invalid timestamp"))?;

        let pcrs = required(map, "pcrs")?
            .as_map()
            .ok_or_else(|| malformed("Nitro document: pcrs is not a map"))?
            .iter()
            .map(|(k, v)| {
                let index = k
                    .as_integer()
                    .and_then(|i| u64::try_from(i).ok())
                    .ok_or_else(|| malformed("Nitro document: invalid PCR index"))?;
                let value = v
                    .as_bytes()
                    .cloned()
                    .ok_or_else(|| malformed(format!("Nitro document: PCR{} is not bytes", index)))?;
                Ok((index, value))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let certificate = bytes_field(map, "certificate")?
            .ok_or_else(|| malformed("Nitro document: missing certificate"))?;

        let cabundle = required(map, "cabundle")?
            .as_array()
            .ok_or_else(|| malformed("Nitro document: cabundle is not an array"))?
            .iter()
            .map(|v| {
                v.as_bytes()
                    .cloned()
                    .ok_or_else(|| malformed("Nitro document: cabundle entry is not bytes"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            module_id: text_field(map, "module_id")?,
            digest: text_field(map, "digest")?,
            timestamp,
            pcrs,
            certificate,
            cabundle,
            public_key: bytes_field(map, "public_key")?,
            user_data: bytes_field(map, "user_data")?,
            nonce: bytes_field(map, "nonce")?,
            sign1,
        })
    }

    fn pcr(&self, index: u64) -> Result<&[u8]> {
        let value = self
            .pcrs
            .get(&index)
            .ok_or_else(|| malformed(format!("Nitro document: missing PCR{}", index)))?;
        if value.len() != PCR_LEN {
            return Err(malformed(format!(
                "PCR{} has length {}, expected {}",
                index,
                value.len(),
                PCR_LEN
            )));
        }
        Ok(value)
    }
}

/// Verify a decoded document against the pinned AWS root, with every
/// certificate checked for validity at `now`.
pub fn verify(doc: &NitroDocument, roots: &VendorRoots, now: DateTime<Utc>) -> Result<Verification> {
    let leaf = verify_cert_chain(doc, roots, now)?;

    let key = PublicKey::from_certificate(&leaf)
        .map_err(|e| Error::ChainNotTrusted(format!("Invalid leaf public key: {}", e)))?;
    if !matches!(key, PublicKey::P384(_)) {
        return Err(Error::ChainNotTrusted("Leaf key is not P-384".into()));
    }
    doc.sign1
        .verify_signature(b"", |sig, data| key.verify_message(data, sig))
        .map_err(|e| Error::SignatureInvalid(format!("COSE signature verification failed: {}", e)))?;

    let registers = REQUIRED_PCRS
        .iter()
        .map(|&i| doc.pcr(i))
        .collect::<Result<Vec<_>>>()?;

    if registers[0].iter().all(|&b| b == 0) {
        return Err(malformed("PCR0 is all zeros, enclave is running in debug mode"));
    }

    let public_key = doc
        .public_key
        .as_ref()
        .ok_or_else(|| malformed("Nitro document: missing public_key"))?;

    let measurement = Measurement::from_bytes(PredicateType::AwsNitroEnclaveV1, &registers)?;
    tracing::debug!(module_id = %doc.module_id, "Verified Nitro attestation document");

    Ok(Verification {
        measurement,
        tls_public_key_fp: hex::encode(Sha256::digest(public_key)),
        hpke_public_key: None,
    })
}

/// Verify leaf → cabundle[n-1] → ... → cabundle[0] and return the leaf.
fn verify_cert_chain(doc: &NitroDocument, roots: &VendorRoots, now: DateTime<Utc>) -> Result<Certificate> {
    let root_der = doc
        .cabundle
        .first()
        .ok_or_else(|| malformed("Nitro document: empty cabundle"))?;

    let root_fingerprint = certs::cert_fingerprint(root_der);
    if !roots.trusts_nitro_root(&root_fingerprint) {
        return Err(Error::ChainNotTrusted(format!(
            "Nitro root certificate {} is not pinned",
            root_fingerprint
        )));
    }

    let chain = std::iter::once(&doc.certificate)
        .chain(doc.cabundle.iter().rev())
        .map(|der| {
            certs::parse_certificate(der)
                .map_err(|e| malformed(format!("Failed to parse Nitro certificate: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    for cert in &chain {
        certs::check_validity(cert, now).map_err(|e| Error::ChainNotTrusted(e.to_string()))?;
    }
    certs::verify_chain(&chain).map_err(|e| Error::ChainNotTrusted(e.to_string()))?;

    let mut chain = chain;
    Ok(chain.swap_remove(0))
}

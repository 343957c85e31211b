//! Rekor transparency log entry verification
//!
//! A bundle's log entry proves the signature was published. We check the
//! log's signed entry timestamp (SET) against the log key from the trust
//! root, then check that the logged body describes this envelope.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::bundle::{DsseEnvelope, TlogEntry};
use crate::error::{Error, Result};
use crate::trust_root::TrustRoot;

/// The document the log signs for a SET, serialized per RFC 8785
#[derive(Serialize)]
struct SignedEntryPayload {
    body: String,
    #[serde(rename = "integratedTime")]
    integrated_time: i64,
    #[serde(rename = "logID")]
    log_id: String,
    #[serde(rename = "logIndex")]
    log_index: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntryBody {
    kind: String,
    api_version: String,
    spec: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DsseSpec {
    payload_hash: HashValue,
    #[serde(default)]
    signatures: Vec<DsseSpecSignature>,
}

#[derive(Deserialize)]
struct DsseSpecSignature {
    signature: String,
}

#[derive(Deserialize)]
struct IntotoSpec {
    content: IntotoContent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntotoContent {
    payload_hash: HashValue,
}

#[derive(Deserialize)]
struct HashValue {
    algorithm: String,
    value: String,
}

/// Verify a log entry for `envelope` and return its integrated time.
pub fn verify_entry(
    trust_root: &TrustRoot,
    entry: &TlogEntry,
    envelope: &DsseEnvelope,
) -> Result<DateTime<Utc>> {
    let log = trust_root.find_log(&entry.log_id).ok_or_else(|| {
        Error::ChainNotTrusted(format!(
            "Transparency log {} is not in the trust root",
            hex::encode(&entry.log_id)
        ))
    })?;

    let integrated_time = DateTime::from_timestamp(entry.integrated_time, 0).ok_or_else(|| {
        Error::MalformedEvidence(format!("Invalid integrated time {}", entry.integrated_time))
    })?;

    if !log.valid_for.contains(integrated_time) {
        return Err(Error::ChainNotTrusted(format!(
            "Transparency log {} was not valid at {}",
            log.base_url, integrated_time
        )));
    }

    let set = entry
        .signed_entry_timestamp
        .as_deref()
        .ok_or_else(|| Error::SignatureInvalid("Log entry has no signed entry timestamp".into()))?;

    let payload = SignedEntryPayload {
        body: base64::engine::general_purpose::STANDARD.encode(&entry.canonicalized_body),
        integrated_time: entry.integrated_time,
        log_id: hex::encode(&entry.log_id),
        log_index: entry.log_index,
    };
    let canonical = serde_jcs::to_vec(&payload)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to canonicalize log entry: {}", e)))?;

    log.key
        .verify_message(&canonical, set)
        .map_err(|e| Error::SignatureInvalid(format!("Signed entry timestamp: {}", e)))?;

    verify_body(entry, envelope)?;

    tracing::debug!(
        log_index = entry.log_index,
        integrated_time = %integrated_time,
        "Verified transparency log entry"
    );

    Ok(integrated_time)
}

/// Check that the logged body records this envelope's payload (and, for
/// `dsse` entries, its signatures).
fn verify_body(entry: &TlogEntry, envelope: &DsseEnvelope) -> Result<()> {
    let body: LogEntryBody = serde_json::from_slice(&entry.canonicalized_body)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse log entry body: {}", e)))?;

    if body.kind != entry.kind {
        return Err(Error::SignatureInvalid(format!(
            "Log entry kind {} does not match body kind {}",
            entry.kind, body.kind
        )));
    }

    let payload_hash = match body.kind.as_str() {
        "dsse" => {
            let spec: DsseSpec = serde_json::from_value(body.spec).map_err(|e| {
                Error::MalformedEvidence(format!("Bad dsse {} entry: {}", body.api_version, e))
            })?;

            let logged: Vec<&str> = spec.signatures.iter().map(|s| s.signature.as_str()).collect();
            for sig in &envelope.signatures {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&sig.sig);
                if !logged.contains(&encoded.as_str()) {
                    return Err(Error::SignatureInvalid(
                        "Envelope signature is not recorded in the log entry".into(),
                    ));
                }
            }
            spec.payload_hash
        }
        "intoto" => {
            let spec: IntotoSpec = serde_json::from_value(body.spec).map_err(|e| {
                Error::MalformedEvidence(format!("Bad intoto {} entry: {}", body.api_version, e))
            })?;
            spec.content.payload_hash
        }
        other => {
            return Err(Error::MalformedEvidence(format!("Unsupported log entry kind: {}", other)));
        }
    };

    if payload_hash.algorithm != "sha256" {
        return Err(Error::MalformedEvidence(format!(
            "Unsupported payload hash algorithm: {}",
            payload_hash.algorithm
        )));
    }

    let actual = hex::encode(Sha256::digest(&envelope.payload));
    if !payload_hash.value.eq_ignore_ascii_case(&actual) {
        return Err(Error::SignatureInvalid(
            "Log entry does not cover this payload".into(),
        ));
    }

    Ok(())
}

//! In-toto provenance statement carried in the DSSE payload

use serde::Deserialize;
use std::collections::HashMap;

use crate::attestation::types::{Measurement, PredicateType};
use crate::error::{Error, Result};

pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub type_: String,
    pub subject: Vec<Subject>,
    pub predicate_type: String,
    #[serde(default)]
    pub predicate: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub name: String,
    pub digest: HashMap<String, String>,
}

#[derive(Deserialize)]
struct SnpPredicate {
    snp_measurement: String,
}

#[derive(Deserialize)]
struct MultiPlatformPredicate {
    snp_measurement: String,
    tdx_measurement: TdxRegisters,
}

#[derive(Deserialize)]
struct TdxRegisters {
    rtmr1: String,
    rtmr2: String,
}

#[derive(Deserialize)]
struct NitroPredicate {
    #[serde(rename = "PCR0")]
    pcr0: String,
    #[serde(rename = "PCR1")]
    pcr1: String,
    #[serde(rename = "PCR2")]
    pcr2: String,
}

fn predicate<T: serde::de::DeserializeOwned>(value: &serde_json::Value, kind: &str) -> Result<T> {
    T::deserialize(value)
        .map_err(|e| Error::MalformedEvidence(format!("Invalid {} predicate: {}", kind, e)))
}

impl Statement {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::MalformedEvidence(format!("Failed to parse statement: {}", e)))
    }

    /// Some subject must carry exactly `expected` as its SHA-256 digest.
    pub fn check_subject_digest(&self, expected: &str) -> Result<()> {
        let digests: Vec<&str> = self
            .subject
            .iter()
            .filter_map(|s| s.digest.get("sha256").map(String::as_str))
            .collect();

        if digests.iter().any(|d| *d == expected) {
            return Ok(());
        }

        Err(Error::DigestMismatch {
            expected: expected.to_string(),
            actual: if digests.is_empty() {
                "<none>".to_string()
            } else {
                digests.join(",")
            },
        })
    }

    pub fn measurement(&self) -> Result<Measurement> {
        let type_ = PredicateType::from_uri(&self.predicate_type);

        let registers = match type_ {
            PredicateType::SevGuestV2 => {
                let p: SnpPredicate = predicate(&self.predicate, "SEV-SNP")?;
                vec![p.snp_measurement]
            }
            PredicateType::SnpTdxMultiPlatformV1 => {
                let p: MultiPlatformPredicate = predicate(&self.predicate, "multi-platform")?;
                vec![p.snp_measurement, p.tdx_measurement.rtmr1, p.tdx_measurement.rtmr2]
            }
            PredicateType::AwsNitroEnclaveV1 => {
                let p: NitroPredicate = predicate(&self.predicate, "Nitro")?;
                vec![p.pcr0, p.pcr1, p.pcr2]
            }
            PredicateType::TdxGuestV2 | PredicateType::Unknown => {
                return Err(Error::MalformedEvidence(format!(
                    "Unsupported predicate type: {}",
                    self.predicate_type
                )));
            }
        };

        Measurement::new(type_, registers)
    }
}

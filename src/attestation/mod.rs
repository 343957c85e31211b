//! Runtime attestation
//!
//! An enclave serves `{ "format": <predicate URI>, "body": <base64> }` on its
//! well-known attestation path. Parsing is split in two steps:
//!
//! - [`parse`] reads the JSON envelope and checks the format is known
//! - [`AttestationDocument::decode`] turns the body into [`Evidence`]
//!
//! [`verify`] then checks the evidence against the pinned vendor roots:
//!
//! - AMD SEV-SNP: VCEK → ASK → ARK chain and the report signature, see [`sev`]
//! - AWS Nitro: COSE_Sign1 signature and the cabundle chain, see [`nitro`]

pub mod nitro;
pub mod sev;
pub mod types;

pub use types::{
    AttestationDocument, GroundTruth, Measurement, MeasurementError, PredicateType, Verification,
};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::trust_root::VendorRoots;
use nitro::NitroDocument;
use sev::{SevCollateral, SevReport};

/// Decoded, not yet verified, runtime evidence
#[derive(Debug, Clone)]
pub enum Evidence {
    SevSnp(SevReport),
    Nitro(NitroDocument),
}

/// Parse the attestation document served by an enclave.
pub fn parse(raw: &[u8]) -> Result<AttestationDocument> {
    let doc: AttestationDocument = serde_json::from_slice(raw)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse attestation document: {}", e)))?;

    if doc.format == PredicateType::Unknown {
        return Err(Error::UnsupportedFormat("Unknown attestation format".into()));
    }
    if doc.body.is_empty() {
        return Err(Error::MalformedEvidence("Attestation document has an empty body".into()));
    }

    Ok(doc)
}

impl AttestationDocument {
    pub fn decode(&self) -> Result<Evidence> {
        match self.format {
            // Multi-platform enclaves running on AMD hardware serve SNP reports
            PredicateType::SevGuestV2 | PredicateType::SnpTdxMultiPlatformV1 => {
                SevReport::decode(&self.body).map(Evidence::SevSnp)
            }
            PredicateType::AwsNitroEnclaveV1 => NitroDocument::decode(&self.body).map(Evidence::Nitro),
            PredicateType::TdxGuestV2 => Err(Error::UnsupportedFormat(
                "TDX runtime attestation is not supported".into(),
            )),
            PredicateType::Unknown => Err(Error::UnsupportedFormat("Unknown attestation format".into())),
        }
    }
}

/// Verify decoded evidence. SEV-SNP needs its KDS collateral; Nitro carries
/// its own chain and is checked for validity at `now`.
pub fn verify(
    evidence: &Evidence,
    collateral: Option<&SevCollateral>,
    roots: &VendorRoots,
    now: DateTime<Utc>,
) -> Result<Verification> {
    match evidence {
        Evidence::SevSnp(report) => {
            let collateral = collateral.ok_or_else(|| {
                Error::InvalidInput("SEV-SNP verification requires VCEK collateral".into())
            })?;
            sev::verify(report, collateral, roots)
        }
        Evidence::Nitro(doc) => nitro::verify(doc, roots, now),
    }
}

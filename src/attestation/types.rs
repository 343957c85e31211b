//! Core types for attestation verification

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Predicate types for different attestation formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateType {
    #[serde(rename = "https://tinfoil.sh/predicate/sev-snp-guest/v2")]
    SevGuestV2,

    #[serde(rename = "https://tinfoil.sh/predicate/tdx-guest/v2")]
    TdxGuestV2,

    #[serde(rename = "https://tinfoil.sh/predicate/snp-tdx-multiplatform/v1")]
    SnpTdxMultiPlatformV1,

    #[serde(rename = "https://tinfoil.sh/predicate/aws-nitro-enclave/v1")]
    AwsNitroEnclaveV1,

    #[serde(other)]
    Unknown,
}

impl PredicateType {
    pub fn from_uri(uri: &str) -> Self {
        match uri {
            "https://tinfoil.sh/predicate/sev-snp-guest/v2" => Self::SevGuestV2,
            "https://tinfoil.sh/predicate/tdx-guest/v2" => Self::TdxGuestV2,
            "https://tinfoil.sh/predicate/snp-tdx-multiplatform/v1" => Self::SnpTdxMultiPlatformV1,
            "https://tinfoil.sh/predicate/aws-nitro-enclave/v1" => Self::AwsNitroEnclaveV1,
            _ => Self::Unknown,
        }
    }

    pub fn as_uri(&self) -> &'static str {
        match self {
            Self::SevGuestV2 => "https://tinfoil.sh/predicate/sev-snp-guest/v2",
            Self::TdxGuestV2 => "https://tinfoil.sh/predicate/tdx-guest/v2",
            Self::SnpTdxMultiPlatformV1 => "https://tinfoil.sh/predicate/snp-tdx-multiplatform/v1",
            Self::AwsNitroEnclaveV1 => "https://tinfoil.sh/predicate/aws-nitro-enclave/v1",
            Self::Unknown => "unknown",
        }
    }
}

/// Raw attestation document from the enclave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDocument {
    pub format: PredicateType,
    pub body: String, // Base64; gzipped report for SEV-SNP, COSE_Sign1 for Nitro
}

/// Measurement registers, normalized to lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "type")]
    pub type_: PredicateType,
    pub registers: Vec<String>,
}

impl Measurement {
    /// Build a measurement from hex registers, rejecting empty or non-hex
    /// values.
    pub fn new(type_: PredicateType, registers: Vec<String>) -> Result<Self> {
        if registers.is_empty() {
            return Err(Error::MalformedEvidence("Measurement has no registers".into()));
        }

        let registers = registers
            .into_iter()
            .enumerate()
            .map(|(i, reg)| {
                if reg.is_empty() || !reg.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(Error::MalformedEvidence(format!(
                        "Measurement register {} is not hex: {:?}",
                        i, reg
                    )));
                }
                Ok(reg.to_ascii_lowercase())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { type_, registers })
    }

    pub fn from_bytes(type_: PredicateType, registers: &[&[u8]]) -> Result<Self> {
        Self::new(type_, registers.iter().map(hex::encode).collect())
    }

    /// Compare measurements, handling multi-platform predicates
    pub fn equals(&self, other: &Measurement) -> std::result::Result<(), MeasurementError> {
        // Multi-platform to specific platform comparison
        if self.type_ == PredicateType::SnpTdxMultiPlatformV1 && other.type_ != self.type_ {
            return self.compare_multiplatform(other);
        }
        if other.type_ == PredicateType::SnpTdxMultiPlatformV1 && other.type_ != self.type_ {
            return other.compare_multiplatform(self);
        }

        if self.type_ != other.type_ {
            return Err(MeasurementError::FormatMismatch);
        }

        if self.registers != other.registers {
            return Err(MeasurementError::RegisterMismatch);
        }

        Ok(())
    }

    fn compare_multiplatform(&self, other: &Measurement) -> std::result::Result<(), MeasurementError> {
        if self.registers.len() < 3 {
            return Err(MeasurementError::TooFewRegisters);
        }

        match other.type_ {
            PredicateType::SevGuestV2 => {
                // Multi-platform register[0] is SNP measurement
                let actual_snp = other.registers.first().ok_or(MeasurementError::TooFewRegisters)?;
                if &self.registers[0] != actual_snp {
                    return Err(MeasurementError::SnpMismatch);
                }
            }
            PredicateType::TdxGuestV2 => {
                if other.registers.len() < 5 {
                    return Err(MeasurementError::TooFewRegisters);
                }

                // Multi-platform registers[1,2] are RTMR1, RTMR2
                // TDX registers are [MRTD, RTMR0, RTMR1, RTMR2, RTMR3]
                if self.registers[1] != other.registers[2] {
                    return Err(MeasurementError::Rtmr1Mismatch);
                }
                if self.registers[2] != other.registers[3] {
                    return Err(MeasurementError::Rtmr2Mismatch);
                }

                // RTMR3 should be zeros
                if other.registers[4] != "0".repeat(96) {
                    return Err(MeasurementError::Rtmr3Mismatch);
                }
            }
            _ => return Err(MeasurementError::FormatMismatch),
        }

        Ok(())
    }

    /// Hex SHA-256 over the type URI and registers, `|`-separated.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.type_.as_uri().as_bytes());
        for register in &self.registers {
            hasher.update(b"|");
            hasher.update(register.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("Attestation format mismatch")]
    FormatMismatch,

    #[error("Register values don't match")]
    RegisterMismatch,

    #[error("Too few registers in measurement")]
    TooFewRegisters,

    #[error("SNP measurement mismatch")]
    SnpMismatch,

    #[error("RTMR1 mismatch")]
    Rtmr1Mismatch,

    #[error("RTMR2 mismatch")]
    Rtmr2Mismatch,

    #[error("RTMR3 mismatch (expected zeros)")]
    Rtmr3Mismatch,
}

/// Result of successful runtime attestation verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Enclave measurement registers
    pub measurement: Measurement,

    /// TLS public key fingerprint (hex-encoded SHA256)
    pub tls_public_key_fp: String,

    /// HPKE public key for encrypted communication (hex-encoded)
    pub hpke_public_key: Option<String>,
}

/// Ground truth after full verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundTruth {
    /// TLS certificate fingerprint to pin
    pub tls_public_key: String,

    /// HPKE public key for EHBP (optional)
    pub hpke_public_key: Option<String>,

    /// Measurement signed into the release's provenance
    pub expected_measurement: Measurement,

    /// Actual measurement (from enclave)
    pub enclave_measurement: Measurement,
}

//! AMD SEV-SNP attestation verification
//!
//! This module verifies SEV-SNP attestation reports using the AMD certificate chain.
//! The verification flow:
//! 1. Decode the gzipped attestation report
//! 2. Fetch VCEK and ASK/ARK from AMD KDS (done by the caller, see [`vcek_url`])
//! 3. Verify ARK public key matches a pinned value (root of trust)
//! 4. Verify ARK is self-signed (RSA-PSS SHA-384)
//! 5. Verify ASK is signed by ARK (RSA-PSS SHA-384)
//! 6. Verify VCEK is signed by ASK (RSA-PSS SHA-384)
//! 7. Verify report signature against VCEK (ECDSA P-384)
//! 8. Extract measurement and TLS keys

use base64::Engine;
use flate2::read::GzDecoder;
use std::io::Read;
use x509_cert::Certificate;

use super::types::{Measurement, PredicateType, Verification};
use crate::certs::{self, PublicKey};
use crate::error::{Error, Result};
use crate::trust_root::VendorRoots;

// SEV-SNP report offsets (v3 report structure)
const REPORT_DATA_OFFSET: usize = 80;
const REPORT_DATA_SIZE: usize = 64;
const MEASUREMENT_OFFSET: usize = 144;
const MEASUREMENT_SIZE: usize = 48;
const SIGNATURE_OFFSET: usize = 672;
const SIGNATURE_SIZE: usize = 512;
const REPORT_SIZE: usize = 1184;

// Chip ID and TCB for VCEK lookup
const CHIP_ID_OFFSET: usize = 416;
const CHIP_ID_SIZE: usize = 64;
const REPORTED_TCB_OFFSET: usize = 384;

// Each component (R, S) is stored in 72 bytes (48 bytes value + 24 bytes padding)
// Values are in little-endian format
const SIG_COMPONENT_SIZE: usize = 72;
const SIG_VALUE_SIZE: usize = 48; // P-384 scalar size

const ARK_CN: &str = "ARK-Genoa";
const ASK_CN: &str = "SEV-Genoa";

/// A structurally valid SEV-SNP attestation report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevReport {
    bytes: Vec<u8>,
}

/// Security patch levels the VCEK was derived for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcbVersion {
    pub bootloader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl TcbVersion {
    fn from_le_bytes(bytes: [u8; 8]) -> Self {
        let tcb = u64::from_le_bytes(bytes);
        Self {
            bootloader: (tcb & 0xFF) as u8,
            tee: ((tcb >> 8) & 0xFF) as u8,
            snp: ((tcb >> 48) & 0xFF) as u8,
            microcode: ((tcb >> 56) & 0xFF) as u8,
        }
    }
}

impl SevReport {
    /// Decode a base64, gzip-compressed report from an attestation document
    pub fn decode(body: &str) -> Result<Self> {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| Error::MalformedEvidence(format!("Base64 decode failed: {}", e)))?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut report_bytes = Vec::new();
        decoder
            .read_to_end(&mut report_bytes)
            .map_err(|e| Error::MalformedEvidence(format!("Gzip decompress failed: {}", e)))?;

        Self::from_bytes(report_bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != REPORT_SIZE {
            return Err(Error::MalformedEvidence(format!(
                "Invalid report size: expected {}, got {}",
                REPORT_SIZE,
                bytes.len()
            )));
        }

        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if !(2..=3).contains(&version) {
            return Err(Error::MalformedEvidence(format!(
                "Unexpected report version: {}",
                version
            )));
        }

        Ok(Self { bytes })
    }

    pub fn version(&self) -> u32 {
        u32::from_le_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    pub fn measurement(&self) -> &[u8] {
        &self.bytes[MEASUREMENT_OFFSET..MEASUREMENT_OFFSET + MEASUREMENT_SIZE]
    }

    /// First 32 bytes: TLS public key fingerprint. Next 32 bytes: HPKE public key.
    pub fn report_data(&self) -> &[u8] {
        &self.bytes[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_SIZE]
    }

    pub fn chip_id(&self) -> &[u8] {
        &self.bytes[CHIP_ID_OFFSET..CHIP_ID_OFFSET + CHIP_ID_SIZE]
    }

    pub fn reported_tcb(&self) -> TcbVersion {
        let mut tcb = [0u8; 8];
        tcb.copy_from_slice(&self.bytes[REPORTED_TCB_OFFSET..REPORTED_TCB_OFFSET + 8]);
        TcbVersion::from_le_bytes(tcb)
    }

    /// Bytes covered by the report signature
    fn signed_bytes(&self) -> &[u8] {
        &self.bytes[..SIGNATURE_OFFSET]
    }

    fn signature(&self) -> &[u8] {
        &self.bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_SIZE]
    }
}

/// AMD KDS responses needed to verify a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevCollateral {
    /// DER-encoded VCEK certificate
    pub vcek_der: Vec<u8>,
    /// PEM-encoded ASK followed by ARK
    pub cert_chain_pem: Vec<u8>,
}

/// KDS URL for the VCEK matching this report's chip and TCB
pub fn vcek_url(kds_base: &str, report: &SevReport) -> String {
    let tcb = report.reported_tcb();
    format!(
        "{}/vcek/v1/Genoa/{}?blSPL={}&teeSPL={}&snpSPL={}&ucodeSPL={}",
        kds_base.trim_end_matches('/'),
        hex::encode(report.chip_id()),
        tcb.bootloader,
        tcb.tee,
        tcb.snp,
        tcb.microcode
    )
}

pub fn cert_chain_url(kds_base: &str) -> String {
    format!("{}/vcek/v1/Genoa/cert_chain", kds_base.trim_end_matches('/'))
}

/// Verify a report against its KDS collateral and extract the measurement
/// and attested keys.
pub fn verify(report: &SevReport, collateral: &SevCollateral, roots: &VendorRoots) -> Result<Verification> {
    let vcek = verify_cert_chain(collateral, roots)?;
    verify_report_signature(report, &vcek)?;

    let report_data = report.report_data();
    let measurement = Measurement::from_bytes(PredicateType::SevGuestV2, &[report.measurement()])?;

    tracing::debug!(
        version = report.version(),
        measurement = %measurement.registers[0],
        "Verified SEV-SNP report"
    );

    Ok(Verification {
        measurement,
        tls_public_key_fp: hex::encode(&report_data[..32]),
        hpke_public_key: Some(hex::encode(&report_data[32..])),
    })
}

/// Parse PEM certificates from the chain
fn parse_pem_chain(chain_pem: &[u8]) -> Result<Vec<Certificate>> {
    let pems = pem::parse_many(chain_pem)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse PEM chain: {}", e)))?;

    pems.iter()
        .map(|p| {
            certs::parse_certificate(p.contents())
                .map_err(|e| Error::MalformedEvidence(format!("Failed to parse chain certificate: {}", e)))
        })
        .collect()
}

/// Verify VCEK → ASK → ARK and return the VCEK
///
/// This function:
/// 1. Verifies ARK public key matches a pinned fingerprint (root of trust)
/// 2. Verifies issuer/subject links and the expected CNs
/// 3. Verifies ARK self-signature, ASK against ARK, VCEK against ASK
fn verify_cert_chain(collateral: &SevCollateral, roots: &VendorRoots) -> Result<Certificate> {
    let untrusted = |msg: String| Error::ChainNotTrusted(msg);

    let vcek = certs::parse_certificate(&collateral.vcek_der)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse VCEK: {}", e)))?;

    let chain = parse_pem_chain(&collateral.cert_chain_pem)?;
    let [ask, ark] = chain.as_slice() else {
        return Err(Error::MalformedEvidence(format!(
            "Certificate chain should contain ASK and ARK, got {} certificates",
            chain.len()
        )));
    };

    // The root of trust: if this matches, we have AMD's genuine ARK
    let ark_fingerprint = certs::spki_fingerprint(ark)
        .map_err(|e| Error::MalformedEvidence(format!("ARK: {}", e)))?;
    if !roots.trusts_amd_ark(&ark_fingerprint) {
        return Err(untrusted(format!(
            "ARK public key fingerprint {} is not pinned",
            ark_fingerprint
        )));
    }

    let ark_cn = certs::common_name(&ark.tbs_certificate.subject);
    if ark_cn.as_deref() != Some(ARK_CN) {
        return Err(untrusted(format!("Unexpected ARK CN: {:?}, expected {}", ark_cn, ARK_CN)));
    }
    let ask_cn = certs::common_name(&ask.tbs_certificate.subject);
    if ask_cn.as_deref() != Some(ASK_CN) {
        return Err(untrusted(format!("Unexpected ASK CN: {:?}, expected {}", ask_cn, ASK_CN)));
    }

    certs::verify_issued_by(ark, ark).map_err(|e| untrusted(format!("ARK self-signature: {}", e)))?;
    certs::verify_issued_by(ask, ark).map_err(|e| untrusted(format!("ASK signature: {}", e)))?;
    certs::verify_issued_by(&vcek, ask).map_err(|e| untrusted(format!("VCEK signature: {}", e)))?;

    Ok(vcek)
}

/// Parse R and S from the signature bytes
/// AMD SEV-SNP stores ECDSA P-384 signatures as:
/// - R: 72 bytes (48 bytes value in little-endian + 24 bytes padding)
/// - S: 72 bytes (48 bytes value in little-endian + 24 bytes padding)
/// - Reserved: 368 bytes
fn parse_signature_components(sig_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if sig_bytes.len() < SIG_COMPONENT_SIZE * 2 {
        return Err(Error::MalformedEvidence("Signature too short".into()));
    }

    let r_be: Vec<u8> = sig_bytes[..SIG_VALUE_SIZE].iter().copied().rev().collect();
    let s_be: Vec<u8> = sig_bytes[SIG_COMPONENT_SIZE..SIG_COMPONENT_SIZE + SIG_VALUE_SIZE]
        .iter()
        .copied()
        .rev()
        .collect();

    Ok((r_be, s_be))
}

/// The report is signed with ECDSA P-384 / SHA-384 over bytes 0..0x2A0
fn verify_report_signature(report: &SevReport, vcek: &Certificate) -> Result<()> {
    let key = PublicKey::from_certificate(vcek)
        .map_err(|e| Error::ChainNotTrusted(format!("Invalid VCEK public key: {}", e)))?;
    if !matches!(key, PublicKey::P384(_)) {
        return Err(Error::ChainNotTrusted("VCEK key is not P-384".into()));
    }

    let (r_be, s_be) = parse_signature_components(report.signature())?;
    let mut fixed = r_be;
    fixed.extend_from_slice(&s_be);

    key.verify_message(report.signed_bytes(), &fixed)
        .map_err(|e| Error::SignatureInvalid(format!("Report signature verification failed: {}", e)))
}

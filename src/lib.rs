//! # Tinfoil Verifier
//!
//! Verifies that a confidential-computing enclave runs code published by a
//! given repository, and reduces both sides to comparable fingerprints.
//!
//! ## Code Provenance (Sigstore)
//!
//! [`Verifier::verify_code`] checks a repository's signed build provenance
//! for an artifact digest:
//! - Fetches the Sigstore bundle from the GitHub attestations API
//! - Verifies the DSSE signature with the Fulcio signing certificate
//! - Verifies the Rekor inclusion promise and chains the certificate to the
//!   [`TrustRoot`] at the logged signing time
//! - Checks the certificate was issued to GitHub Actions for the repository
//! - Extracts the measurement from the signed in-toto statement
//!
//! ## Runtime Attestation (SEV-SNP / Nitro)
//!
//! [`Verifier::verify_enclave`] checks the hardware evidence an enclave
//! serves on `/.well-known/tinfoil-attestation`:
//! - AMD SEV-SNP: report signature by the VCEK, VCEK → ASK → ARK chain with
//!   the ARK pinned
//! - AWS Nitro: COSE_Sign1 signature, cabundle chain to the pinned root
//!
//! Either way the result is the measurement plus the fingerprint of the TLS
//! key the enclave bound into its evidence.
//!
//! ## Fingerprints
//!
//! A [`Measurement`] fingerprint is the hex SHA-256 of its type URI and
//! registers, so code and enclave results can be compared as strings.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tinfoil_verifier::{Config, TrustRoot, Verifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let trust_root = TrustRoot::load(&std::fs::read("trusted_root.json")?)?;
//!     let verifier = Verifier::new(Config::from_env(), Arc::new(trust_root))?;
//!
//!     let enclave = verifier.verify_enclave("inference.tinfoil.sh").await?;
//!     let code = verifier.verify_repo("tinfoilsh/confidential-inference-proxy").await?;
//!     assert_eq!(enclave.fingerprint, code.fingerprint);
//!
//!     // Only talks to servers presenting the attested key
//!     let client = enclave.pinned_client()?;
//!     Ok(())
//! }
//! ```

pub mod attestation;
pub mod certs;
pub mod config;
pub mod error;
pub mod fetch;
pub mod sigstore;
pub mod tls;
pub mod trust_root;
pub mod verifier;

#[cfg(test)]
mod test_util;

pub use attestation::{GroundTruth, Measurement, PredicateType};
pub use config::Config;
pub use error::{Error, Result, Stage, VerificationFailure};
pub use fetch::{Fetcher, HttpFetcher};
pub use trust_root::{TrustRoot, VendorRoots};
pub use verifier::{CodeVerification, EnclaveReport, EnclaveVerification, Verifier};

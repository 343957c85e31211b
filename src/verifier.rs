//! Verification workflows
//!
//! [`Verifier`] runs the two pipelines, each `fetch → parse → verify →
//! fingerprint → report`:
//!
//! - [`Verifier::verify_code`]: a repository's signed provenance for a digest
//! - [`Verifier::verify_enclave`]: a live enclave's hardware attestation
//!
//! Workflows suspend only on fetches. Failures carry the stage they
//! happened in; nothing is retried and no partial result is returned.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::attestation::sev::{self, SevCollateral, SevReport};
use crate::attestation::{self, Evidence, GroundTruth, Measurement, Verification};
use crate::config::Config;
use crate::error::{Error, Result, Stage, StageExt, VerificationFailure};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::sigstore::{self, bundle, release};
use crate::tls;
use crate::trust_root::{TrustRoot, VendorRoots};

type WorkflowResult<T> = std::result::Result<T, VerificationFailure>;

/// A digest's verified provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeVerification {
    pub repository: String,
    pub digest: String,
    pub measurement: Measurement,
    /// [`Measurement::fingerprint`] of `measurement`
    pub fingerprint: String,
}

impl CodeVerification {
    pub fn report(&self) -> &str {
        &self.fingerprint
    }
}

/// A verified enclave
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnclaveVerification {
    pub host: String,
    /// SPKI fingerprint of the enclave's TLS key
    pub certificate: String,
    pub measurement: Measurement,
    /// [`Measurement::fingerprint`] of `measurement`
    pub fingerprint: String,
    pub hpke_public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnclaveReport {
    pub certificate: String,
    pub measurement: String,
}

impl EnclaveVerification {
    pub fn report(&self) -> EnclaveReport {
        EnclaveReport {
            certificate: self.certificate.clone(),
            measurement: self.fingerprint.clone(),
        }
    }

    pub fn report_json(&self) -> WorkflowResult<String> {
        serde_json::to_string(&self.report())
            .map_err(|e| Error::MalformedEvidence(format!("Failed to serialize report: {}", e)))
            .stage(Stage::Report)
    }

    /// HTTP client that only talks to servers presenting the attested key
    pub fn pinned_client(&self) -> Result<reqwest::Client> {
        tls::create_pinned_client(&self.certificate)
    }
}

pub struct Verifier {
    config: Config,
    trust_root: Arc<TrustRoot>,
    vendor_roots: Arc<VendorRoots>,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("vendor_roots", &self.vendor_roots)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Verifier fetching over HTTPS with the configured timeout
    pub fn new(config: Config, trust_root: Arc<TrustRoot>) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        Ok(Self::with_fetcher(config, trust_root, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: Config, trust_root: Arc<TrustRoot>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            trust_root,
            vendor_roots: Arc::new(VendorRoots::default()),
            fetcher,
        }
    }

    pub fn with_vendor_roots(mut self, roots: VendorRoots) -> Self {
        self.vendor_roots = Arc::new(roots);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Verify that `repo`'s release workflow signed provenance for `digest`.
    pub async fn verify_code(&self, repo: &str, digest: &str) -> WorkflowResult<CodeVerification> {
        validate_repo(repo).stage(Stage::Fetch)?;
        validate_digest(digest).stage(Stage::Fetch)?;

        tracing::info!(repo, digest, "Verifying code provenance");

        let url = format!(
            "{}/repos/{}/attestations/sha256:{}",
            self.config.attestation_api_base.trim_end_matches('/'),
            repo,
            digest
        );
        let raw = self.fetcher.get(&url).await.stage(Stage::Fetch)?;

        let bundle = bundle::parse_attestations(&raw).stage(Stage::Parse)?;

        let measurement =
            sigstore::verify_bundle(&self.trust_root, &bundle, digest, repo).stage(Stage::Verify)?;

        let fingerprint = measurement.fingerprint();

        Ok(CodeVerification {
            repository: repo.to_string(),
            digest: digest.to_string(),
            measurement,
            fingerprint,
        })
    }

    /// Verify the enclave serving `host` and return its attested key and
    /// measurement.
    pub async fn verify_enclave(&self, host: &str) -> WorkflowResult<EnclaveVerification> {
        validate_host(host).stage(Stage::Fetch)?;

        tracing::info!(host, "Verifying enclave attestation");

        let url = format!("https://{}{}", host, self.config.attestation_path);
        let raw = self.fetcher.get(&url).await.stage(Stage::Fetch)?;

        let doc = attestation::parse(&raw).stage(Stage::Parse)?;
        let evidence = doc.decode().stage(Stage::Parse)?;

        let collateral = match &evidence {
            Evidence::SevSnp(report) => Some(self.fetch_sev_collateral(report).await.stage(Stage::Fetch)?),
            Evidence::Nitro(_) => None,
        };

        let verification = attestation::verify(&evidence, collateral.as_ref(), &self.vendor_roots, Utc::now())
            .stage(Stage::Verify)?;

        let certificate = attested_key_fingerprint(&verification).stage(Stage::Fingerprint)?;
        let fingerprint = verification.measurement.fingerprint();

        Ok(EnclaveVerification {
            host: host.to_string(),
            certificate,
            measurement: verification.measurement,
            fingerprint,
            hpke_public_key: verification.hpke_public_key,
        })
    }

    async fn fetch_sev_collateral(&self, report: &SevReport) -> Result<SevCollateral> {
        let vcek_url = sev::vcek_url(&self.config.kds_base, report);
        let chain_url = sev::cert_chain_url(&self.config.kds_base);

        let (vcek_der, cert_chain_pem) =
            tokio::try_join!(self.fetcher.get(&vcek_url), self.fetcher.get(&chain_url))?;

        Ok(SevCollateral {
            vcek_der,
            cert_chain_pem,
        })
    }

    /// Resolve the digest of `repo`'s latest release, then verify it.
    pub async fn verify_repo(&self, repo: &str) -> WorkflowResult<CodeVerification> {
        validate_repo(repo).stage(Stage::Fetch)?;

        let url = release::latest_release_url(&self.config.github_api_base, repo);
        let raw = self.fetcher.get(&url).await.stage(Stage::Fetch)?;
        let latest = release::parse_latest_release(&raw).stage(Stage::Parse)?;

        let digest = match latest.digest {
            Some(digest) => digest,
            None => {
                tracing::debug!(tag = %latest.tag, "No digest in release notes, fetching hash asset");
                let url = release::hash_asset_url(&self.config.github_download_base, repo, &latest.tag);
                let raw = self.fetcher.get(&url).await.stage(Stage::Fetch)?;
                release::parse_hash_asset(&raw).stage(Stage::Parse)?
            }
        };

        tracing::info!(repo, tag = %latest.tag, digest = %digest, "Resolved latest release");
        self.verify_code(repo, &digest).await
    }

    /// Verify the enclave at `host` runs the latest release of `repo`.
    ///
    /// Both sides are verified concurrently. With `check_tls_binding` set,
    /// a TLS connection to `host` must also present the attested key.
    pub async fn verify_complete(&self, host: &str, repo: &str) -> WorkflowResult<GroundTruth> {
        let (enclave, code) = tokio::join!(self.verify_enclave(host), self.verify_repo(repo));
        let enclave = enclave?;
        let code = code?;

        code.measurement
            .equals(&enclave.measurement)
            .map_err(|e| {
                Error::MeasurementMismatch(format!(
                    "{} (source {}, enclave {})",
                    e, code.fingerprint, enclave.fingerprint
                ))
            })
            .stage(Stage::Verify)?;

        if self.config.check_tls_binding {
            tls::verify_tls_binding(host, &enclave.certificate)
                .await
                .stage(Stage::Verify)?;
        }

        tracing::info!(host, repo, fingerprint = %enclave.fingerprint, "Enclave runs verified code");

        Ok(GroundTruth {
            tls_public_key: enclave.certificate,
            hpke_public_key: enclave.hpke_public_key,
            expected_measurement: code.measurement,
            enclave_measurement: enclave.measurement,
        })
    }

    /// Run [`Verifier::verify_code`] as a task. Aborting the handle cancels
    /// an in-flight fetch.
    pub fn spawn_verify_code(
        self: &Arc<Self>,
        repo: impl Into<String>,
        digest: impl Into<String>,
    ) -> JoinHandle<WorkflowResult<CodeVerification>> {
        let this = Arc::clone(self);
        let (repo, digest) = (repo.into(), digest.into());
        tokio::spawn(async move { this.verify_code(&repo, &digest).await })
    }

    pub fn spawn_verify_enclave(
        self: &Arc<Self>,
        host: impl Into<String>,
    ) -> JoinHandle<WorkflowResult<EnclaveVerification>> {
        let this = Arc::clone(self);
        let host = host.into();
        tokio::spawn(async move { this.verify_enclave(&host).await })
    }
}

fn validate_repo(repo: &str) -> Result<()> {
    let valid_part =
        |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    match repo.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(Error::InvalidInput(format!(
            "Repository must be owner/name, got {:?}",
            repo
        ))),
    }
}

fn validate_digest(digest: &str) -> Result<()> {
    if digest.len() == 64 && digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        return Ok(());
    }
    Err(Error::InvalidInput(format!(
        "Digest must be 64 lowercase hex characters, got {:?}",
        digest
    )))
}

fn validate_host(host: &str) -> Result<()> {
    if host.is_empty()
        || host.contains("://")
        || host.chars().any(|c| matches!(c, '/' | '?' | '#' | '@') || c.is_whitespace())
    {
        return Err(Error::InvalidInput(format!("Expected a bare hostname, got {:?}", host)));
    }
    Ok(())
}

/// An all-zero key hash means the enclave never bound a TLS key.
fn attested_key_fingerprint(verification: &Verification) -> Result<String> {
    let fp = &verification.tls_public_key_fp;
    if fp.len() != 64 || fp.chars().all(|c| c == '0') {
        return Err(Error::MalformedEvidence(format!(
            "Attestation does not bind a TLS key: {:?}",
            fp
        )));
    }
    Ok(fp.clone())
}

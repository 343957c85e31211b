//! Error types for attestation verification

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Malformed evidence: {0}")]
    MalformedEvidence(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Certificate chain not trusted: {0}")]
    ChainNotTrusted(String),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Repository mismatch: expected {expected}, got {actual}")]
    RepoMismatch { expected: String, actual: String },

    #[error("Trust root malformed: {0}")]
    TrustRootMalformed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported attestation format: {0}")]
    UnsupportedFormat(String),

    #[error("Measurement mismatch: {0}")]
    MeasurementMismatch(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a workflow was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Parse,
    Verify,
    Fingerprint,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Verify => "verify",
            Stage::Fingerprint => "fingerprint",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Rejection value of a verification workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Verification failed at {stage} stage: {source}")]
pub struct VerificationFailure {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl VerificationFailure {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    /// Only transport failures are worth retrying; every other kind is a
    /// statement about the evidence itself.
    pub fn is_transient(&self) -> bool {
        matches!(self.source, Error::FetchFailed(_))
    }
}

/// Tags a stage onto a crate result, for use with `?` in workflow bodies.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, VerificationFailure>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, VerificationFailure> {
        self.map_err(|source| VerificationFailure::new(stage, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_names_stage() {
        let failure = VerificationFailure::new(
            Stage::Verify,
            Error::DigestMismatch {
                expected: "deadbeef".into(),
                actual: "cafebabe".into(),
            },
        );
        assert_eq!(
            failure.to_string(),
            "Verification failed at verify stage: Digest mismatch: expected deadbeef, got cafebabe"
        );
    }

    #[test]
    fn test_only_fetch_failures_are_transient() {
        let fetch = VerificationFailure::new(Stage::Fetch, Error::FetchFailed("timeout".into()));
        let sig = VerificationFailure::new(Stage::Verify, Error::SignatureInvalid("bad".into()));
        assert!(fetch.is_transient());
        assert!(!sig.is_transient());
    }

    #[test]
    fn test_stage_ext_tags_errors() {
        let result: Result<()> = Err(Error::MalformedEvidence("no body".into()));
        let failure = result.stage(Stage::Parse).unwrap_err();
        assert_eq!(failure.stage, Stage::Parse);
        assert!(matches!(failure.source, Error::MalformedEvidence(_)));
    }
}

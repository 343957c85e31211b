//! Release lookup: which digest does a repository's latest release publish?
//!
//! Release notes carry the digest as `EIF hash: <hex>` or
//! ``Digest: `<hex>` ``. Releases without either publish a `tinfoil.hash`
//! asset instead.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn digest_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)EIF hash: ([a-f0-9]{64})").unwrap(),
            Regex::new(r"Digest: `([a-f0-9]{64})`").unwrap(),
        ]
    })
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    /// Digest from the release notes, if they carry one
    pub digest: Option<String>,
}

pub fn latest_release_url(api_base: &str, repo: &str) -> String {
    format!("{}/repos/{}/releases/latest", api_base.trim_end_matches('/'), repo)
}

pub fn hash_asset_url(download_base: &str, repo: &str, tag: &str) -> String {
    format!(
        "{}/{}/releases/download/{}/tinfoil.hash",
        download_base.trim_end_matches('/'),
        repo,
        tag
    )
}

pub fn parse_latest_release(raw: &[u8]) -> Result<Release> {
    let response: ReleaseResponse = serde_json::from_slice(raw)
        .map_err(|e| Error::MalformedEvidence(format!("Failed to parse release: {}", e)))?;

    let digest = response.body.as_deref().and_then(digest_from_notes);

    Ok(Release {
        tag: response.tag_name,
        digest,
    })
}

fn digest_from_notes(body: &str) -> Option<String> {
    digest_patterns()
        .iter()
        .find_map(|re| re.captures(body))
        .map(|captures| captures[1].to_ascii_lowercase())
}

/// Parse the contents of a `tinfoil.hash` asset.
pub fn parse_hash_asset(raw: &[u8]) -> Result<String> {
    let digest = std::str::from_utf8(raw)
        .map_err(|_| Error::MalformedEvidence("Digest asset is not UTF-8".into()))?
        .trim()
        .to_ascii_lowercase();

    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::MalformedEvidence(format!("Invalid digest asset: {:?}", digest)));
    }

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_from_eif_notes() {
        let digest = "ab".repeat(32);
        let raw = json!({ "tag_name": "v0.1.2", "body": format!("Release\n\nEIF hash: {}\n", digest) });

        let release = parse_latest_release(raw.to_string().as_bytes()).unwrap();
        assert_eq!(release.tag, "v0.1.2");
        assert_eq!(release.digest, Some(digest));
    }

    #[test]
    fn test_digest_from_notes_ignores_case() {
        let notes = format!("eif HASH: {}", "AB".repeat(32));
        assert_eq!(digest_from_notes(&notes), Some("ab".repeat(32)));
    }

    #[test]
    fn test_digest_from_backticked_notes() {
        let digest = "0f".repeat(32);
        let raw = json!({ "tag_name": "v2", "body": format!("Digest: `{}`", digest) });

        assert_eq!(parse_latest_release(raw.to_string().as_bytes()).unwrap().digest, Some(digest));
    }

    #[test]
    fn test_release_without_digest() {
        let raw = json!({ "tag_name": "v3", "body": "nothing here" });
        assert_eq!(parse_latest_release(raw.to_string().as_bytes()).unwrap().digest, None);

        let raw = json!({ "tag_name": "v3" });
        assert_eq!(parse_latest_release(raw.to_string().as_bytes()).unwrap().digest, None);
    }

    #[test]
    fn test_hash_asset() {
        let digest = "CD".repeat(32);
        assert_eq!(parse_hash_asset(format!("{}\n", digest).as_bytes()).unwrap(), "cd".repeat(32));
        assert!(matches!(parse_hash_asset(b"not a digest"), Err(Error::MalformedEvidence(_))));
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            latest_release_url("https://api.github.com/", "org/repo"),
            "https://api.github.com/repos/org/repo/releases/latest"
        );
        assert_eq!(
            hash_asset_url("https://github.com", "org/repo", "v1"),
            "https://github.com/org/repo/releases/download/v1/tinfoil.hash"
        );
    }
}

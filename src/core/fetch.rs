//! Two-phase checksum-verified artifact fetch.
//!
//! Phase one pulls the upstream job's checksum manifest (optional — its
//! absence degrades to an unverified fetch). Phase two pulls the artifact
//! bytes and validates them against the manifest entry when one exists.
//! Checksum problems are recorded, never fatal; transport problems in
//! phase two are.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Well-known manifest name published alongside a job's artifacts.
pub const CHECKSUM_MANIFEST_FILE: &str = "artifact-checksums.json";

/// Address of one upstream job run in the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentifier {
    pub pipeline: String,
    pub pipeline_counter: u32,
    pub stage: String,
    pub stage_counter: u32,
    pub job: String,
}

impl JobIdentifier {
    pub fn new(
        pipeline: impl Into<String>,
        pipeline_counter: u32,
        stage: impl Into<String>,
        stage_counter: u32,
        job: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            pipeline_counter,
            stage: stage.into(),
            stage_counter,
            job: job.into(),
        }
    }

    /// Store-relative locator for this job's artifact root.
    pub fn locator(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.pipeline, self.pipeline_counter, self.stage, self.stage_counter, self.job
        )
    }
}

/// Byte source addressed by store-relative locator paths
/// (`pipeline/counter/stage/counter/job/relative-path`).
pub trait ArtifactStore: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Placeholder store for jobs with no fetch tasks.
pub struct NoArtifactStore;

impl ArtifactStore for NoArtifactStore {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        Err(Error::fetch_transport_failed(
            locator,
            "no artifact store configured",
        ))
    }
}

/// HTTP-backed artifact store.
pub struct HttpArtifactStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ArtifactStore for HttpArtifactStore {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, locator);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::fetch_transport_failed(locator, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch_transport_failed(
                locator,
                format!("HTTP {}", status.as_u16()),
            ));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::fetch_transport_failed(locator, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Validation outcome recorded on a [`FetchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChecksumStatus {
    /// Downloaded bytes matched the manifest entry.
    Verified,
    /// No manifest, or no entry for this path.
    Unverified,
    /// Manifest entry present but the bytes hash differently.
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    pub source: String,
    pub destination: PathBuf,
    pub bytes: usize,
    pub checksum: ChecksumStatus,
}

impl FetchReport {
    pub fn is_valid(&self) -> bool {
        !matches!(self.checksum, ChecksumStatus::Mismatch { .. })
    }
}

/// Per-job-run map from relative artifact path to SHA-256 hex digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest(BTreeMap<String, String>);

impl ChecksumManifest {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::internal_io(e.to_string(), Some("checksum manifest".to_string()))
        })
    }

    pub fn checksum_for(&self, relative_path: &str) -> Option<&str> {
        self.0.get(relative_path).map(|s| s.as_str())
    }

    /// Entry whose relative path terminates the given locator, respecting
    /// path-segment boundaries.
    pub fn entry_for_locator(&self, locator: &str) -> Option<(&str, &str)> {
        self.0
            .iter()
            .find(|(path, _)| {
                locator == path.as_str() || locator.ends_with(&format!("/{}", path))
            })
            .map(|(path, sum)| (path.as_str(), sum.as_str()))
    }
}

pub fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Phase one: fetch the manifest for an upstream job. Failure is tolerated
/// and logged; the fetch proceeds without validation.
pub fn fetch_manifest(
    store: &dyn ArtifactStore,
    upstream: &JobIdentifier,
) -> Option<ChecksumManifest> {
    manifest_from_locator(
        store,
        &format!("{}/{}", upstream.locator(), CHECKSUM_MANIFEST_FILE),
    )
}

pub(crate) fn manifest_from_locator(
    store: &dyn ArtifactStore,
    locator: &str,
) -> Option<ChecksumManifest> {
    match store.fetch(locator).and_then(|b| ChecksumManifest::from_json(&b)) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            log_status!(
                "fetch",
                "Checksum manifest unavailable, artifacts will not be validated: {}",
                err
            );
            None
        }
    }
}

/// Phase two: fetch the artifact itself and write it below `dest_root`.
/// Transport and IO failures are fatal; checksum problems are recorded on
/// the report.
pub fn fetch_artifact(
    store: &dyn ArtifactStore,
    upstream: &JobIdentifier,
    source_path: &str,
    dest_root: &Path,
    destination: &str,
    manifest: Option<&ChecksumManifest>,
) -> Result<FetchReport> {
    download_to(
        store,
        &format!("{}/{}", upstream.locator(), source_path),
        dest_root,
        destination,
        manifest,
    )
}

pub(crate) fn download_to(
    store: &dyn ArtifactStore,
    locator: &str,
    dest_root: &Path,
    destination: &str,
    manifest: Option<&ChecksumManifest>,
) -> Result<FetchReport> {
    let bytes = store.fetch(locator)?;

    let file_name = locator.rsplit('/').next().unwrap_or(locator);
    let mut dest = dest_root.join(destination);
    if destination.is_empty() || destination.ends_with('/') || dest.is_dir() {
        dest = dest.join(file_name);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(parent.display().to_string()))
        })?;
    }
    fs::write(&dest, &bytes)
        .map_err(|e| Error::internal_io(e.to_string(), Some(dest.display().to_string())))?;

    let checksum = match manifest.and_then(|m| m.entry_for_locator(locator)) {
        None => {
            if manifest.is_some() {
                log_status!("fetch", "No checksum entry for '{}', skipping validation", locator);
            }
            ChecksumStatus::Unverified
        }
        Some((path, expected)) => {
            let actual = hex_digest(&bytes);
            if actual == expected {
                ChecksumStatus::Verified
            } else {
                log_status!(
                    "fetch",
                    "Checksum mismatch for '{}': expected {}, got {}",
                    path,
                    expected,
                    actual
                );
                ChecksumStatus::Mismatch {
                    expected: expected.to_string(),
                    actual,
                }
            }
        }
    };

    Ok(FetchReport {
        source: locator.to_string(),
        destination: dest,
        bytes: bytes.len(),
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct InMemoryStore(HashMap<String, Vec<u8>>);

    impl InMemoryStore {
        fn with(entries: &[(&str, &[u8])]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            )
        }
    }

    impl ArtifactStore for InMemoryStore {
        fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
            self.0
                .get(locator)
                .cloned()
                .ok_or_else(|| Error::fetch_transport_failed(locator, "not found"))
        }
    }

    fn upstream() -> JobIdentifier {
        JobIdentifier::new("dist", 42, "package", 1, "linux")
    }

    #[test]
    fn locator_joins_all_segments() {
        assert_eq!(upstream().locator(), "dist/42/package/1/linux");
    }

    #[test]
    fn matching_checksum_is_verified() {
        let dir = TempDir::new().unwrap();
        let body = b"artifact-bytes";
        let store = InMemoryStore::with(&[("dist/42/package/1/linux/build/out.jar", body)]);
        let manifest =
            ChecksumManifest::from_entries([("build/out.jar", hex_digest(body))]);

        let report = fetch_artifact(
            &store,
            &upstream(),
            "build/out.jar",
            dir.path(),
            "lib/out.jar",
            Some(&manifest),
        )
        .unwrap();

        assert_eq!(report.checksum, ChecksumStatus::Verified);
        assert!(report.is_valid());
        assert_eq!(fs::read(&report.destination).unwrap(), body);
    }

    #[test]
    fn mismatch_is_recorded_but_not_fatal() {
        let dir = TempDir::new().unwrap();
        let store =
            InMemoryStore::with(&[("dist/42/package/1/linux/build/out.jar", b"corrupted")]);
        let manifest = ChecksumManifest::from_entries([("build/out.jar", "zzz999")]);

        let report = fetch_artifact(
            &store,
            &upstream(),
            "build/out.jar",
            dir.path(),
            "out.jar",
            Some(&manifest),
        )
        .unwrap();

        match &report.checksum {
            ChecksumStatus::Mismatch { expected, .. } => assert_eq!(expected, "zzz999"),
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert!(!report.is_valid());
        // bytes still land on disk
        assert!(report.destination.exists());
    }

    #[test]
    fn absent_manifest_degrades_to_unverified() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::with(&[("dist/42/package/1/linux/report.xml", b"<ok/>")]);

        assert!(fetch_manifest(&store, &upstream()).is_none());
        let report = fetch_artifact(
            &store,
            &upstream(),
            "report.xml",
            dir.path(),
            "",
            None,
        )
        .unwrap();
        assert_eq!(report.checksum, ChecksumStatus::Unverified);
        assert!(report.destination.ends_with("report.xml"));
    }

    #[test]
    fn missing_artifact_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::with(&[]);
        let err = fetch_artifact(&store, &upstream(), "gone.zip", dir.path(), "", None)
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::FetchTransportFailed);
    }

    #[test]
    fn manifest_parses_from_json() {
        let manifest =
            ChecksumManifest::from_json(br#"{"build/out.jar": "abc123"}"#).unwrap();
        assert_eq!(manifest.checksum_for("build/out.jar"), Some("abc123"));
        assert_eq!(manifest.checksum_for("other"), None);
    }

    #[test]
    fn locator_lookup_respects_segment_boundaries() {
        let manifest = ChecksumManifest::from_entries([("out.jar", "abc")]);
        assert!(manifest
            .entry_for_locator("dist/42/package/1/linux/out.jar")
            .is_some());
        assert!(manifest
            .entry_for_locator("dist/42/package/1/linux/not-out.jar")
            .is_none());
    }
}

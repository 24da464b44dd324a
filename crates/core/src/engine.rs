//! The sync pass: encode -> digest -> probe -> decide -> upload, per file

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ProbeFailurePolicy, SyncSettings};
use crate::decision::{ArtifactFingerprint, Decision, decide};
use crate::encode::{EncodedArtifact, encode};
use crate::error::SyncError;
use crate::hash::{ContentDigest, ETag};
use crate::manifest::Manifest;
use crate::remote::ObjectStore;
use crate::scan::{LocalFile, Scanner};
use crate::upload::{UploadOutcome, upload};

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Uploaded,
    /// Store already held identical bytes at the key
    Skipped,
    /// The artifact disappeared before upload
    Vanished,
    /// Probe failed and the run is configured to carry on
    ProbeFailed,
}

/// Per-file result handed to progress observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub relative: String,
    pub digest: ContentDigest,
    pub action: FileAction,
    /// Encoded size in bytes
    pub size: u64,
}

/// Totals for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub vanished: usize,
    pub probe_failed: usize,
    /// Encoded bytes sent to the store
    pub bytes_uploaded: u64,
}

impl SyncReport {
    fn add(&mut self, report: &FileReport) {
        match report.action {
            FileAction::Uploaded => {
                self.uploaded += 1;
                self.bytes_uploaded += report.size;
            }
            FileAction::Skipped => self.skipped += 1,
            FileAction::Vanished => self.vanished += 1,
            FileAction::ProbeFailed => self.probe_failed += 1,
        }
    }

    /// Files that went through the pipeline
    #[must_use]
    pub fn total(&self) -> usize {
        self.uploaded + self.skipped + self.vanished + self.probe_failed
    }
}

type Observer = dyn Fn(&FileReport) + Send + Sync;

/// Runs sync passes against one store with one set of settings
#[derive(Clone)]
pub struct SyncEngine {
    settings: Arc<SyncSettings>,
    store: Arc<dyn ObjectStore>,
    observer: Option<Arc<Observer>>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            observer: None,
        }
    }

    /// Call `observer` once per finished file, in completion order
    #[must_use]
    pub fn on_file(mut self, observer: impl Fn(&FileReport) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Scanner over the configured assets root with the configured globs
    #[must_use]
    pub fn scanner(&self) -> Scanner {
        let settings = &self.settings;
        let scanner = settings
            .include
            .iter()
            .fold(Scanner::new(&settings.assets_root), |s, p| s.include(p));
        settings.exclude.iter().fold(scanner, |s, p| s.exclude(p))
    }

    /// Discover, sync and persist the manifest.
    ///
    /// # Errors
    /// Any aborting per-file error, or [`SyncError::ManifestPersist`]. The
    /// manifest is only written when every file was processed.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let files = self.scanner().scan()?;
        let (manifest, report) = self.sync(files).await?;
        manifest.persist(&self.settings.manifest_path)?;
        info!(
            "wrote manifest with {} entries to {}",
            manifest.len(),
            self.settings.manifest_path.display()
        );
        Ok(report)
    }

    /// Process `files` and build the manifest without persisting it.
    ///
    /// Up to `jobs` files are in flight at once. Manifest entries follow the
    /// order of `files` regardless of completion order.
    ///
    /// # Errors
    /// The first aborting per-file error. In-flight work is cancelled.
    pub async fn sync(&self, files: Vec<LocalFile>) -> Result<(Manifest, SyncReport), SyncError> {
        let count = files.len();
        info!("processing {count} files with {} workers", self.settings.jobs);

        let semaphore = Arc::new(Semaphore::new(self.settings.jobs));
        let mut tasks = JoinSet::new();

        for (index, file) in files.into_iter().enumerate() {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Never closed, so this only waits
                let _permit = semaphore.acquire_owned().await.ok();
                let report = engine.process_file(&file).await?;
                Ok::<_, SyncError>((index, report))
            });
        }

        let mut slots: Vec<Option<FileReport>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(SyncError::from).and_then(|r| r);
            let (index, report) = match outcome {
                Ok(done) => done,
                Err(e) => {
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            };

            if let Some(observer) = &self.observer {
                observer(&report);
            }
            slots[index] = Some(report);
        }

        let mut manifest = Manifest::new(self.settings.host_name.clone());
        let mut report = SyncReport::default();
        for file_report in slots.into_iter().flatten() {
            report.add(&file_report);
            if file_report.action != FileAction::ProbeFailed {
                manifest.record(file_report.relative, file_report.digest);
            }
        }

        info!(
            "{} uploaded, {} skipped, {} vanished, {} probe failures",
            report.uploaded, report.skipped, report.vanished, report.probe_failed
        );
        Ok((manifest, report))
    }

    /// Run the full pipeline for one file
    ///
    /// # Errors
    /// Encoding, digest, probe (under the abort policy) and upload failures.
    pub async fn process_file(&self, file: &LocalFile) -> Result<FileReport, SyncError> {
        debug!("start processing {}", file.relative);

        let settings = Arc::clone(&self.settings);
        let source = file.path.clone();
        let (artifact, fingerprint) =
            tokio::task::spawn_blocking(move || prepare(&source, &settings)).await??;

        let bucket = &self.settings.bucket;
        let key = &fingerprint.digest;
        let report = |action| FileReport {
            relative: file.relative.clone(),
            digest: fingerprint.digest.clone(),
            action,
            size: fingerprint.size,
        };

        debug!("retrieving metadata for {key}");
        let remote = match self.store.head_object(bucket, key.as_str()).await {
            Ok(remote) => remote,
            Err(source) => {
                let err = SyncError::MetadataProbe {
                    path: file.path.clone(),
                    key: key.clone(),
                    source,
                };
                if self.settings.on_probe_error == ProbeFailurePolicy::Skip {
                    warn!("{err}, leaving {} out of the manifest", file.relative);
                    return Ok(report(FileAction::ProbeFailed));
                }
                return Err(err);
            }
        };

        match &remote {
            Some(info) => debug!(
                etag = %info.etag,
                content_type = ?info.content_type,
                content_encoding = ?info.content_encoding,
                content_length = info.content_length,
                "found existing object {key}"
            ),
            None => debug!("no object stored at {key}"),
        }

        let action = match decide(&fingerprint, remote.as_ref()) {
            Decision::Skip => {
                info!("{} stored at {bucket}/{key} does not require update", file.relative);
                FileAction::Skipped
            }
            Decision::Upload => {
                match upload(self.store.as_ref(), bucket, file, &artifact, key).await? {
                    UploadOutcome::Uploaded => FileAction::Uploaded,
                    UploadOutcome::Vanished => FileAction::Vanished,
                }
            }
        };

        debug!("finished processing {}", file.relative);
        Ok(report(action))
    }
}

/// Blocking half of the pipeline: encode, then digest and ETag the result
fn prepare(
    source: &Path,
    settings: &SyncSettings,
) -> Result<(EncodedArtifact, ArtifactFingerprint), SyncError> {
    let artifact = encode(source, settings.encoding, &settings.scratch_dir)?;

    let digest_err = |e| SyncError::Digest {
        path: source.to_path_buf(),
        source: e,
    };
    let digest = settings
        .digest
        .digest_file(artifact.path())
        .map_err(digest_err)?;
    let etag = ETag::from_file(artifact.path()).map_err(digest_err)?;
    debug!(path = %source.display(), %digest, %etag, "fingerprinted");

    let fingerprint = ArtifactFingerprint {
        digest,
        etag,
        size: artifact.size(),
    };
    Ok((artifact, fingerprint))
}

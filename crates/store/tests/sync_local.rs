//! End-to-end sync runs against a filesystem store

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tempfile::TempDir;

use webcache_core::{
    DigestAlgorithm, Encoding, FileAction, Manifest, ObjectStore, Stage, SyncEngine, SyncSettings,
    encode,
};
use webcache_store::LocalStore;

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let project = Self { dir };
        for (name, content) in files {
            project.write(name, content);
        }
        project
    }

    fn webapp(&self) -> PathBuf {
        self.dir.path().join("src/main/webapp")
    }

    fn write(&self, name: &str, content: &str) {
        let path = self.webapp().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::new("static", self.webapp());
        settings.scratch_dir = self.dir.path().join("target/webcache/tmp");
        settings.manifest_path = self.dir.path().join("target/webcache/webcache.json");
        settings
    }

    fn store(&self) -> Arc<LocalStore> {
        Arc::new(LocalStore::new(self.dir.path().join("store")).unwrap())
    }

    fn manifest(&self) -> Manifest {
        Manifest::load(&self.settings().manifest_path).unwrap()
    }

    /// Gzip `content` the way the engine does and return its encoded bytes
    fn gzipped(&self, content: &str) -> Vec<u8> {
        let scratch = self.dir.path().join("expected");
        std::fs::create_dir_all(&scratch).unwrap();
        let source = scratch.join("source");
        std::fs::write(&source, content).unwrap();
        let artifact = encode(&source, Encoding::Gzip, &scratch).unwrap();
        std::fs::read(artifact.path()).unwrap()
    }
}

fn gunzip(path: &Path) -> String {
    let mut decoded = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    decoded
}

fn stored_objects(store: &LocalStore, bucket: &str) -> usize {
    match std::fs::read_dir(store.root().join(bucket)) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().unwrap().is_file())
            .count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_fresh_store_upload() {
    let project = Project::new(&[("a.css", "body{}"), ("b.js", "x=1;")]);
    let store = project.store();
    let engine = SyncEngine::new(project.settings(), store.clone());

    let report = engine.run().await.unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(stored_objects(&store, "static"), 2);

    let manifest = project.manifest();
    assert_eq!(manifest.host_name(), "static.s3.amazonaws.com");
    let paths: Vec<_> = manifest.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["a.css", "b.js"]);

    for (path, content) in [("a.css", "body{}"), ("b.js", "x=1;")] {
        let key = manifest.get(path).unwrap();
        assert_eq!(key, &DigestAlgorithm::Sha256.digest_bytes(&project.gzipped(content)));
        let object = store.object_path("static", key.as_str()).unwrap();
        assert_eq!(gunzip(&object), content);
    }

    let css = manifest.get("a.css").unwrap();
    assert_eq!(
        manifest.resolve("/a.css"),
        Some(format!("https://static.s3.amazonaws.com/{css}"))
    );
}

#[tokio::test]
async fn test_uploaded_metadata() {
    let project = Project::new(&[("styles/site.css", "body{}")]);
    let store = project.store();
    SyncEngine::new(project.settings(), store.clone())
        .run()
        .await
        .unwrap();

    let key = project.manifest().get("styles/site.css").unwrap().clone();
    let info = store
        .head_object("static", key.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.content_type.as_deref(), Some("text/css"));
    assert_eq!(info.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(info.content_length, project.gzipped("body{}").len() as u64);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let project = Project::new(&[("a.css", "body{}"), ("b.js", "x=1;"), ("img/logo.svg", "<svg/>")]);
    let store = project.store();
    let engine = SyncEngine::new(project.settings(), store.clone());

    engine.run().await.unwrap();
    let first = project.manifest();

    let report = engine.run().await.unwrap();
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(project.manifest(), first);
    assert_eq!(stored_objects(&store, "static"), 3);
}

#[tokio::test]
async fn test_changed_file_gets_new_key() {
    let project = Project::new(&[("a.css", "body{}"), ("b.js", "x=1;")]);
    let store = project.store();
    let engine = SyncEngine::new(project.settings(), store.clone());

    engine.run().await.unwrap();
    let before = project.manifest();

    project.write("b.js", "x=2;");
    let report = engine.run().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.skipped, 1);

    let after = project.manifest();
    assert_eq!(after.get("a.css"), before.get("a.css"));
    assert_ne!(after.get("b.js"), before.get("b.js"));
    // The old object stays; keys are never reused for different bytes
    assert_eq!(stored_objects(&store, "static"), 3);
}

#[tokio::test]
async fn test_existing_identical_object_is_skipped() {
    let project = Project::new(&[("a.css", "body{}"), ("b.js", "x=1;")]);
    let store = project.store();

    // Someone already uploaded a.css
    let encoded = project.gzipped("body{}");
    let key = DigestAlgorithm::Sha256.digest_bytes(&encoded);
    let settings = project.settings();
    let file = webcache_core::Scanner::new(project.webapp())
        .scan()
        .unwrap()
        .into_iter()
        .find(|f| f.relative == "a.css")
        .unwrap();
    let artifact = encode(&file.path, Encoding::Gzip, &settings.scratch_dir).unwrap();
    let metadata = webcache_core::upload::object_metadata(&file, &artifact, chrono::Utc::now());
    store
        .put_object("static", key.as_str(), Bytes::from(encoded), metadata)
        .await
        .unwrap();
    drop(artifact);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);
    let engine = SyncEngine::new(settings, store.clone()).on_file(move |report| {
        observed
            .lock()
            .unwrap()
            .push((report.relative.clone(), report.action));
    });

    let report = engine.run().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.skipped, 1);

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        seen,
        [
            ("a.css".to_string(), FileAction::Skipped),
            ("b.js".to_string(), FileAction::Uploaded),
        ]
    );
    assert_eq!(project.manifest().get("a.css"), Some(&key));
}

#[tokio::test]
async fn test_tampered_object_is_reuploaded() {
    let project = Project::new(&[("a.css", "body{}")]);
    let store = project.store();
    let engine = SyncEngine::new(project.settings(), store.clone());

    engine.run().await.unwrap();
    let key = project.manifest().get("a.css").unwrap().clone();

    // Different bytes under the right key, so the ETags disagree
    let metadata = {
        let file = webcache_core::LocalFile::from_path(&project.webapp(), &project.webapp().join("a.css"))
            .unwrap();
        let artifact = encode(&file.path, Encoding::Plain, &project.settings().scratch_dir).unwrap();
        webcache_core::upload::object_metadata(&file, &artifact, chrono::Utc::now())
    };
    store
        .put_object("static", key.as_str(), Bytes::from_static(b"body{}"), metadata)
        .await
        .unwrap();

    let report = engine.run().await.unwrap();
    assert_eq!(report.uploaded, 1);
    let object = store.object_path("static", key.as_str()).unwrap();
    assert_eq!(gunzip(&object), "body{}");
}

#[tokio::test]
async fn test_default_excludes_and_hidden_files() {
    let project = Project::new(&[
        ("index.html", "<html/>"),
        (".well-known/security.txt", "contact"),
        ("WEB-INF/web.xml", "<web-app/>"),
        ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0"),
    ]);
    let store = project.store();
    SyncEngine::new(project.settings(), store.clone())
        .run()
        .await
        .unwrap();

    let manifest = project.manifest();
    let paths: Vec<_> = manifest.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, [".well-known/security.txt", "index.html"]);
    assert_eq!(stored_objects(&store, "static"), 2);
}

#[tokio::test]
async fn test_every_algorithm_detects_changes() {
    for algorithm in DigestAlgorithm::ALL {
        let project = Project::new(&[("a.css", "body{}"), ("b.js", "x=1;")]);
        let store = project.store();
        let mut settings = project.settings();
        settings.digest = algorithm;
        let engine = SyncEngine::new(settings, store.clone());

        engine.run().await.unwrap();
        let before = project.manifest();
        assert!(
            before
                .iter()
                .all(|e| e.digest.as_str().len() == algorithm.hex_len()),
            "{algorithm:?}"
        );

        project.write("a.css", "body{color:red}");
        let report = engine.run().await.unwrap();
        assert_eq!((report.uploaded, report.skipped), (1, 1), "{algorithm:?}");
        assert_ne!(project.manifest().get("a.css"), before.get("a.css"));
    }
}

#[tokio::test]
async fn test_plain_encoding_stores_source_bytes() {
    let project = Project::new(&[("a.css", "body{}")]);
    let store = project.store();
    let mut settings = project.settings();
    settings.encoding = Encoding::Plain;
    SyncEngine::new(settings, store.clone()).run().await.unwrap();

    let key = project.manifest().get("a.css").unwrap().clone();
    assert_eq!(key, DigestAlgorithm::Sha256.digest_bytes(b"body{}"));
    let object = store.object_path("static", key.as_str()).unwrap();
    assert_eq!(std::fs::read(object).unwrap(), b"body{}");

    let info = store
        .head_object("static", key.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.content_encoding, None);
}

#[tokio::test]
async fn test_unreadable_root_fails_in_discovery() {
    let project = Project::new(&[]);
    let store = project.store();
    let err = SyncEngine::new(project.settings(), store)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Discovery);
    assert!(!project.settings().manifest_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_files_share_one_object() {
    let names: Vec<String> = (0..16).map(|i| format!("f{i}.js")).collect();
    let files: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "same content")).collect();
    let project = Project::new(&files);
    let store = project.store();
    let mut settings = project.settings();
    settings.jobs = 8;
    let engine = SyncEngine::new(settings, store.clone());

    for _ in 0..5 {
        engine.run().await.unwrap();
    }

    let manifest = project.manifest();
    assert_eq!(manifest.len(), 16);
    let key = DigestAlgorithm::Sha256.digest_bytes(&project.gzipped("same content"));
    assert!(manifest.iter().all(|e| e.digest == key));
    assert_eq!(stored_objects(&store, "static"), 1);
    let object = store.object_path("static", key.as_str()).unwrap();
    assert_eq!(gunzip(&object), "same content");
}

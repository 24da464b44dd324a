//! webcache: content-addressed static asset uploads
//!
//! Every asset is stored under the digest of its encoded bytes, so URLs
//! never go stale and caches can hold them forever. A manifest maps each
//! original path to its digest.

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Args, Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};
use tracing::{debug, info};

use webcache_core::{
    DigestAlgorithm, Encoding, Manifest, Scanner, SyncEngine, SyncError, WebcacheConfig,
    config::CONFIG_FILE, encode,
};
use webcache_store::LocalStore;

use crate::progress::SyncProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "webcache")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Upload static assets under their content digest")]
#[command(long_about = r#"
webcache stores each static asset under the digest of its encoded bytes and
writes a manifest mapping original paths to digests.

Unchanged assets are detected by comparing ETags and never re-uploaded.

Examples:
  webcache upload --bucket static            Sync src/main/webapp
  webcache scan ./web                        List files and their digests
  webcache resolve webcache.json css/a.css   Print the URL for a path
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode, digest and upload every asset, then write the manifest
    Upload {
        #[command(flatten)]
        config: ConfigArgs,

        /// Directory holding the object store buckets
        #[arg(long, default_value = "target/webcache/store")]
        store: PathBuf,
    },

    /// List the files an upload would process, with their digests
    Scan {
        /// Directory to scan (defaults to the configured assets root)
        path: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,
    },

    /// Print the URL a path maps to in a manifest
    Resolve {
        /// Manifest file
        manifest: PathBuf,

        /// Original asset path, relative to the assets root
        path: String,
    },

    /// Show version and build info
    Version,
}

/// Options layered over `webcache.toml`
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Config file (defaults to ./webcache.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Host name the manifest resolves against
    #[arg(long)]
    host_name: Option<String>,

    /// Encoding (plain, gzip)
    #[arg(long)]
    encoding: Option<String>,

    /// Digest algorithm (md5, sha1, sha256, sha384, sha512)
    #[arg(long)]
    digest: Option<String>,

    /// Assets root directory
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Scratch directory for encoded files
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Manifest output file
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Only process files matching this glob (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Skip files matching this glob (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Files processed concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// What to do when a metadata probe fails (abort, skip)
    #[arg(long)]
    on_probe_error: Option<String>,
}

impl ConfigArgs {
    /// Load the config file, then apply flags on top
    fn resolve(&self) -> Result<WebcacheConfig> {
        let mut config = match &self.config {
            Some(path) => WebcacheConfig::load_file(path)?,
            None => WebcacheConfig::load(Path::new("."))?,
        };

        if let Some(bucket) = &self.bucket {
            config.bucket = Some(bucket.clone());
        }
        if let Some(host_name) = &self.host_name {
            config.host_name = Some(host_name.clone());
        }
        if let Some(encoding) = &self.encoding {
            config.encoding.clone_from(encoding);
        }
        if let Some(digest) = &self.digest {
            config.digest.clone_from(digest);
        }
        if let Some(assets) = &self.assets {
            config.assets_root.clone_from(assets);
        }
        if let Some(scratch) = &self.scratch {
            config.scratch_dir.clone_from(scratch);
        }
        if let Some(manifest) = &self.manifest {
            config.manifest.clone_from(manifest);
        }
        if !self.include.is_empty() {
            config.include.clone_from(&self.include);
        }
        if !self.exclude.is_empty() {
            config.exclude.clone_from(&self.exclude);
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(policy) = &self.on_probe_error {
            config.on_probe_error.clone_from(policy);
        }

        debug!(?config, "resolved configuration");
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let session = debug_log::init(cli.verbose);
    debug!("debug log at {}", session.log_path.display());

    match cli.command {
        Commands::Version => {
            eprintln!("webcache {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Upload { config, store } => {
            upload_command(&config, &store).await?;
        }
        Commands::Scan {
            path,
            config,
            format,
        } => {
            scan_command(path, &config, &format)?;
        }
        Commands::Resolve { manifest, path } => {
            resolve_command(&manifest, &path)?;
        }
    }

    Ok(())
}

async fn upload_command(args: &ConfigArgs, store_dir: &Path) -> Result<()> {
    let settings = args
        .resolve()?
        .validate()
        .wrap_err_with(|| format!("invalid configuration (see {CONFIG_FILE} and flags)"))?;
    let manifest_path = settings.manifest_path.clone();

    let store = LocalStore::new(store_dir)
        .wrap_err_with(|| format!("cannot open store at {}", store_dir.display()))?;
    info!(
        "syncing {} into {}/{}",
        settings.assets_root.display(),
        store_dir.display(),
        settings.bucket
    );

    let progress = SyncProgress::new();
    let bar = progress.file_bar(0);
    let tick = bar.clone();
    let engine = SyncEngine::new(settings, Arc::new(store)).on_file(move |report| {
        tick.set_prefix(report.relative.clone());
        tick.inc(1);
    });

    let files = report_failure(&progress, engine.scanner().scan())?;
    progress.checking(files.len(), &engine.settings().bucket);
    bar.set_length(files.len() as u64);

    let result = engine.sync(files).await;
    bar.finish_and_clear();

    let (manifest, report) = report_failure(&progress, result)?;
    report_failure(&progress, manifest.persist(&manifest_path))?;

    progress.finish(&report, &manifest_path);
    Ok(())
}

/// Print an aborting error as file and stage before handing it to eyre
fn report_failure<T>(progress: &SyncProgress, outcome: Result<T, SyncError>) -> Result<T> {
    outcome.map_err(|err| {
        progress.failed(&err);
        err.into()
    })
}

fn scan_command(path: Option<PathBuf>, args: &ConfigArgs, format: &str) -> Result<()> {
    let config = args.resolve()?;
    let encoding: Encoding = config.encoding.parse()?;
    let digest: DigestAlgorithm = config.digest.parse()?;
    let root = path.unwrap_or(config.assets_root);

    info!("Scanning {}...", root.display());

    let scanner = config
        .include
        .iter()
        .fold(Scanner::new(&root), |s, p| s.include(p));
    let scanner = config.exclude.iter().fold(scanner, |s, p| s.exclude(p));
    let files = scanner.scan()?;

    let mut rows = Vec::with_capacity(files.len());
    for file in &files {
        let artifact = encode(&file.path, encoding, &config.scratch_dir)?;
        let key = digest
            .digest_file(artifact.path())
            .wrap_err_with(|| format!("cannot digest {}", file.path.display()))?;
        rows.push((file, key, artifact.size()));
    }

    match format {
        "json" => {
            let listing: Vec<_> = rows
                .iter()
                .map(|(file, key, size)| {
                    serde_json::json!({
                        "path": file.relative,
                        "digest": key,
                        "media_type": file.media_type,
                        "size": size,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        _ => {
            eprintln!("Files: {}", rows.len());
            let total_size: u64 = rows.iter().map(|(_, _, size)| size).sum();
            eprintln!(
                "Encoded size: {} ({encoding}, {digest})",
                humansize::format_size(total_size, humansize::BINARY)
            );

            if !rows.is_empty() {
                eprintln!("\nFiles:");
                for (file, key, size) in &rows {
                    println!("  {key}  {} ({size} bytes)", file.relative);
                }
            }
        }
    }

    Ok(())
}

fn resolve_command(manifest_path: &Path, path: &str) -> Result<()> {
    let manifest = Manifest::load(manifest_path)
        .wrap_err_with(|| format!("cannot read manifest {}", manifest_path.display()))?;
    let url = manifest
        .resolve(path)
        .ok_or_else(|| eyre!("{path} is not in {}", manifest_path.display()))?;
    println!("{url}");
    Ok(())
}

//! Cargo-style progress output for webcache
//!
//! ```text
//!    Checking 952 files for bucket static
//!     Syncing [===========>             ] 500/952 css/site.css
//!    Uploaded 12 files (67.44 KiB), 940 unchanged in 3.2s
//!       Wrote manifest target/webcache/webcache.json
//! ```

use std::io::{self, Write as _};
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

use webcache_core::{SyncError, SyncReport};

/// Every bar lives here so log lines can be printed above them
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const CHECKING: &'static str = "Checking";
    const UPLOADED: &'static str = "Uploaded";
    const UNCHANGED: &'static str = "Unchanged";
    const WROTE: &'static str = "Wrote";
    const FINISHED: &'static str = "Finished";
    const FAILED: &'static str = "Failed";
}

fn print_styled(style: &console::Style, status: &str, message: &str) {
    let _ = MULTI.suspend(|| {
        let mut term = console::Term::stderr();
        writeln!(term, "{:>12} {}", style.apply_to(status), message)
    });
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    print_styled(&console::Style::new().green().bold(), status, message);
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Tracing writer that keeps log lines from tearing the progress bar
#[derive(Clone, Copy)]
pub struct ProgressWriter;

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MULTI.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Progress tracker for an upload run
pub struct SyncProgress {
    start: Instant,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn checking(&self, files: usize, bucket: &str) {
        print_status(
            Status::CHECKING,
            &format!("{files} files for bucket {bucket}"),
        );
    }

    /// Create a progress bar for per-file work
    pub fn file_bar(&self, total_files: u64) -> ProgressBar {
        let pb = MULTI.add(ProgressBar::new(total_files));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message("Syncing");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Show final summary
    pub fn finish(&self, report: &SyncReport, manifest: &Path) {
        let elapsed = format_elapsed(self.start.elapsed());
        let size = humansize::format_size(report.bytes_uploaded, humansize::BINARY);

        if report.uploaded == 0 {
            print_status(
                Status::UNCHANGED,
                &format!("all {} files already stored in {elapsed}", report.skipped),
            );
        } else {
            print_status(
                Status::UPLOADED,
                &format!(
                    "{} files ({size}), {} unchanged in {elapsed}",
                    report.uploaded, report.skipped
                ),
            );
        }

        if report.vanished > 0 || report.probe_failed > 0 {
            print_styled(
                &console::Style::new().yellow().bold(),
                Status::FINISHED,
                &format!(
                    "{} vanished before upload, {} left out after failed probes",
                    report.vanished, report.probe_failed
                ),
            );
        }

        print_status(Status::WROTE, &format!("manifest {}", manifest.display()));
    }

    /// Report which file, which stage, and why the run stopped
    pub fn failed(&self, err: &SyncError) {
        let message = match err.path() {
            Some(path) => format!("{} at {} stage: {err}", path.display(), err.stage()),
            None => format!("{} stage: {err}", err.stage()),
        };
        print_styled(&console::Style::new().red().bold(), Status::FAILED, &message);
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

mod config;
mod progress;
mod prompt;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use console::style;
use config::{Cli, WorkDir};
use imgrescue_core::catalog::{self, Catalog};
use imgrescue_core::download::{self, AcquireError, DownloadArtifact, DownloadProgress};
use imgrescue_core::fetch::{self, HttpFetcher};
use imgrescue_core::host::HostCapabilities;
use imgrescue_core::mount::SystemMounter;
use imgrescue_core::select::{self, Choice};
use imgrescue_core::state::StateStore;
use imgrescue_core::{remedy, version, write};
use indicatif::ProgressBar;
use prompt::TerminalPrompter;
use std::fs::{self, File};
use std::io::{IsTerminal, stdout};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// Disabling it keeps the cancellation message on a clean line. The
/// original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            let fd = stdout().as_raw_fd();
            let original_termios = Termios::from_fd(fd).ok().and_then(|original| {
                let mut quiet = original;
                // Disable printing of control characters.
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).ok().map(|()| original)
            });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            let fd = stdout().as_raw_fd();
            tcsetattr(fd, TCSANOW, original_termios).ok();
        }
    }
}

/// Sends all log output to `debug.log` in the work directory.
fn init_logging(work_dir: &Path) -> Result<()> {
    let path = work_dir.join("debug.log");
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

/// Fetches the catalog, records its parts in the work directory and checks
/// it was published for this build.
fn load_catalog(
    url: &str,
    work_dir: &Path,
    caps: &HostCapabilities,
    fetcher: &HttpFetcher,
    running: &Arc<AtomicBool>,
) -> Result<Catalog> {
    println!("Downloading the recovery catalog...");
    let raw_path = work_dir.join("tmp.txt");
    if raw_path.exists() {
        fs::remove_file(&raw_path)?;
    }
    fetch::fetch_resumable(fetcher, url, &raw_path, running, |_, _| {}, |_| {})
        .with_context(|| format!("could not download the recovery catalog from {url}"))?;
    let raw = fs::read_to_string(&raw_path)?;

    let split = catalog::split(&raw);
    fs::write(work_dir.join("config.txt"), &split.stanza_text)?;
    let mut version_text = split.header_lines.join("\n");
    version_text.push('\n');
    fs::write(work_dir.join("version.txt"), version_text)?;

    version::check(
        split.header.declared_version().unwrap_or(""),
        version::RECOVERY_TOOL_VERSION,
        split.header.update.as_deref(),
    )?;

    let parsed = catalog::parse(&split.stanza_text, caps.checksum);
    info!(
        "catalog: {} stanzas, {} usable, valid={}",
        parsed.count,
        parsed.records.len(),
        parsed.valid
    );
    if !parsed.valid {
        bail!("The recovery catalog at {url} is malformed.");
    }
    Ok(parsed)
}

fn run(cli: Cli, running: Arc<AtomicBool>) -> Result<ExitCode> {
    let work = WorkDir::resolve(cli.workdir.as_deref())?;
    init_logging(work.path())?;
    info!(
        "imgrescue {} in {} (device={:?}, model={:?})",
        env!("CARGO_PKG_VERSION"),
        work.path().display(),
        cli.device,
        cli.model
    );

    let caps = HostCapabilities::detect()?;
    let fetcher = HttpFetcher::new()?;
    let catalog = load_catalog(&cli.catalog_url, work.path(), &caps, &fetcher, &running)?;
    let store = StateStore::default_location()
        .ok_or_else(|| anyhow!("Cannot determine the user configuration directory."))?;
    let mut prompter = TerminalPrompter::new();

    let choice = match cli.model() {
        Some(model) => match catalog.find_by_model(model) {
            Some(choice) => choice,
            None => {
                println!("No recovery image matches the model '{model}'.");
                return Ok(ExitCode::FAILURE);
            }
        },
        None => match select::select_image(&catalog, &store, &mut prompter)? {
            Choice::Selected(choice) => choice,
            Choice::Quit => return Ok(ExitCode::FAILURE),
        },
    };
    let stanza = catalog
        .by_choice(choice)
        .ok_or_else(|| anyhow!("catalog entry {choice} disappeared"))?;
    println!("\nSelected: {}", style(&stanza.name).cyan());

    let download_pb = ProgressBar::new(0);
    let artifact = download::acquire(
        stanza,
        work.path(),
        &caps,
        &store,
        &fetcher,
        &running,
        prompt::ask_repeat,
        DownloadProgress {
            on_start: |offset, total: Option<u64>| {
                progress::start(&download_pb, "Downloading", "cyan", total.unwrap_or(0));
                download_pb.set_position(offset);
            },
            on_progress: |bytes| download_pb.set_position(bytes),
        },
    );
    let artifact: DownloadArtifact = match artifact {
        Ok(artifact) => {
            download_pb.finish_with_message("Download complete.");
            artifact
        }
        Err(AcquireError::Cancelled) => {
            download_pb.finish_and_clear();
            return Ok(ExitCode::FAILURE);
        }
        Err(e @ AcquireError::RestartRequested) => {
            download_pb.finish_and_clear();
            println!("{e}");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            download_pb.finish_and_clear();
            return Err(e.into());
        }
    };

    let source = caps.devices.source();
    let device = match select::select_drive(source.as_ref(), artifact.required_mb, &mut prompter)? {
        Choice::Selected(device) => device,
        Choice::Quit => return Ok(ExitCode::FAILURE),
    };

    println!(
        "\n{} This will erase all data on '{}' ({} MB).",
        style("WARNING:").red().bold(),
        device.name,
        device.size_mb,
    );
    println!("  Drive: {}", style(device.path.display()).cyan());
    println!("  Image: {}", style(&stanza.name).cyan());
    println!();

    if !prompt::confirm_operation("Are you sure you want to proceed?")? {
        println!("Write operation cancelled.");
        return Ok(ExitCode::FAILURE);
    }

    println!();

    let verify = !cli.no_verify;
    let write_pb = ProgressBar::new(0);
    let verify_pb = if verify {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };

    let result = write::run(
        &artifact,
        &device,
        &SystemMounter,
        verify,
        running,
        |len| progress::start(&write_pb, "Writing", "green", len),
        |bytes| write_pb.set_position(bytes),
        |len| {
            write_pb.finish_with_message("Write complete.");
            progress::start(&verify_pb, "Verifying", "magenta", len);
        },
        |bytes| verify_pb.set_position(bytes),
    );

    match result {
        Ok(()) => {
            if verify {
                verify_pb.finish_with_message("Verification successful.");
            } else {
                write_pb.finish_with_message("Write complete (verification skipped).");
            }
            println!(
                "\n✨ {} is ready. You can now remove it and use it to recover your device.",
                style(device.path.display()).cyan()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            write_pb.finish_and_clear();
            verify_pb.finish_and_clear();
            Err(e)
        }
    }
}

fn main() -> ExitCode {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();
    let cli = Cli::parse();

    // This flag allows for graceful cancellation of operations.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("{} {e}", style("ERROR:").red().bold());
        return ExitCode::FAILURE;
    }

    match run(cli, running) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", style("ERROR:").red().bold(), e);
            if let Some(remedy) = remedy::classify(&e) {
                eprintln!("{remedy}");
            }
            ExitCode::FAILURE
        }
    }
}

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ruck_core::bundle::Bundle;
use ruck_core::error::RuckError;
use ruck_core::localize::RuckLoc;
use ruck_core::manifest::{EntryCategory, ManifestDriver, StatusEvent};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

const READ_CHUNK: usize = 16 * 1024;

#[derive(Parser)]
#[command(name = "ruck", version, about = "ruck: asset-bundling toolchain", disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Parses an assets json file and keeps a bundle up to date
    Bundle {
        /// Manifest file, or "-" to read from stdin
        manifest: PathBuf,
        bundlefile: PathBuf,
        /// Assets are loaded relative to this path. Defaults to cwd.
        #[arg(long)]
        prefix: Option<PathBuf>,
        /// Print what is happening while it is happening
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// Extracts a single file from the bundle and writes it to stdout
    Cat {
        bundlefile: PathBuf,
        resourcename: String,
        /// Interpret as texture and output the composite image
        #[arg(long, default_value_t = false)]
        texture: bool,
    },
    /// Lists all resources in a bundle
    Ls { bundlefile: PathBuf },
    /// Get info on how to use a command
    Help { command: Option<String> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Bundle { manifest, bundlefile, prefix, verbose } => {
            bundle(&manifest, &bundlefile, prefix, verbose)
        }
        Cmd::Cat { bundlefile, resourcename, texture } => cat(&bundlefile, &resourcename, texture),
        Cmd::Ls { bundlefile } => ls(&bundlefile),
        Cmd::Help { command } => help(command.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", localize_error(&err));
            ExitCode::FAILURE
        }
    }
}

fn lang() -> String {
    std::env::var("RUCK_LANG").unwrap_or_else(|_| "en-GB".to_string())
}

/// Renders a top-level CLI error for stderr, routing through the fluent
/// `err-*` codes when the failure is a typed `RuckError` and falling back to
/// the plain `anyhow` chain otherwise (e.g. clap/io errors with no message
/// code of their own).
fn localize_error(err: &anyhow::Error) -> String {
    let loc = RuckLoc::builtin(&lang());
    match err.chain().find_map(|cause| cause.downcast_ref::<RuckError>()) {
        Some(RuckError::NotFound(key)) => loc.msg("err-not-found", &[("key", key)]),
        Some(RuckError::BadFormat(message)) => loc.msg("err-bad-format", &[("message", message)]),
        Some(RuckError::Parse { line, col, message }) => loc.msg(
            "err-parse",
            &[("line", &line.to_string()), ("col", &col.to_string()), ("message", message)],
        ),
        Some(RuckError::CannotFit { key, w, h, max_w, max_h, .. }) => loc.msg(
            "err-cannot-fit",
            &[
                ("key", key),
                ("w", &w.to_string()),
                ("h", &h.to_string()),
                ("max_w", &max_w.to_string()),
                ("max_h", &max_h.to_string()),
            ],
        ),
        Some(other) => loc.msg("err-generic", &[("message", &other.to_string())]),
        None => format!("error: {err:#}"),
    }
}

fn bundle(manifest_path: &PathBuf, bundlefile: &PathBuf, prefix: Option<PathBuf>, verbose: bool) -> Result<()> {
    let loc = RuckLoc::builtin(&lang());
    let prefix_cli = prefix.unwrap_or_else(|| PathBuf::from("."));

    let mut bundle = Bundle::open(bundlefile)
        .with_context(|| format!("unable to open bundle: {}", bundlefile.display()))?;

    let mut driver = ManifestDriver::new(&mut bundle, prefix_cli);

    let mut on_status = |event: StatusEvent| {
        if !verbose {
            return;
        }
        let (code, key) = match event {
            StatusEvent::New { key, category: EntryCategory::File } => ("status-new-file", key),
            StatusEvent::Updated { key, category: EntryCategory::File } => ("status-updating-file", key),
            StatusEvent::UpToDate { key, category: EntryCategory::File } => ("status-file-up-to-date", key),
            StatusEvent::New { key, category: EntryCategory::Texture } => ("status-new-texture", key),
            StatusEvent::Updated { key, category: EntryCategory::Texture } => ("status-updating-texture", key),
            StatusEvent::UpToDate { key, category: EntryCategory::Texture } => ("status-texture-up-to-date", key),
        };
        eprintln!("{}", loc.msg(code, &[("key", key)]));
    };

    let mut buf = [0u8; READ_CHUNK];
    if manifest_path.as_os_str() == "-" {
        let mut stdin = io::stdin().lock();
        loop {
            let n = stdin.read(&mut buf).context("reading manifest from stdin")?;
            if n == 0 {
                break;
            }
            driver.feed(&buf[..n], &mut on_status)?;
        }
    } else {
        let mut f = File::open(manifest_path)
            .with_context(|| format!("unable to open input file: {}", manifest_path.display()))?;
        loop {
            let n = f.read(&mut buf).with_context(|| format!("reading {}", manifest_path.display()))?;
            if n == 0 {
                break;
            }
            driver.feed(&buf[..n], &mut on_status)?;
        }
    }
    driver.finish()?;

    bundle.close().context("unable to close bundle")?;
    Ok(())
}

fn cat(bundlefile: &PathBuf, resourcename: &str, texture: bool) -> Result<()> {
    let mut bundle = Bundle::open(bundlefile)
        .with_context(|| format!("unable to open bundle: {}", bundlefile.display()))?;

    let entry = bundle
        .find(resourcename)
        .cloned()
        .ok_or_else(|| RuckError::NotFound(resourcename.to_string()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if texture {
        let tex = bundle.file_open_texture(&entry).context("unable to open texture entry")?;
        for page in &tex.pages {
            out.write_all(&page.encoded).context("error writing to stdout")?;
        }
    } else {
        let bytes = bundle.file_read(&entry).context("unable to read file entry")?;
        out.write_all(&bytes).context("error writing to stdout")?;
    }

    bundle.close().context("unable to close bundle")?;
    Ok(())
}

fn ls(bundlefile: &PathBuf) -> Result<()> {
    let bundle = Bundle::open(bundlefile)
        .with_context(|| format!("unable to open bundle: {}", bundlefile.display()))?;
    for entry in bundle.get_files() {
        println!("{}", entry.name);
    }
    Ok(())
}

const BUNDLE_USAGE: &str = "Usage: ruck bundle assetsfile bundlefile\n\n\
Options:\n  \
  [--prefix path]  assets are loaded relative to this path. defaults to cwd\n  \
  [--verbose]      print what is happening while it is happening\n";

const CAT_USAGE: &str = "Usage: ruck cat bundlefile resourcename\n\n\
Options:\n  \
  [--texture]  interpret as texture and output the image.\n";

const LS_USAGE: &str = "Usage: ruck ls bundlefile\n";

const HELP_USAGE: &str = "Usage: ruck help command\n";

fn help(command: Option<&str>) -> Result<()> {
    match command {
        None => {
            eprint!("{}", HELP_USAGE);
            Err(anyhow!("missing command"))
        }
        Some("bundle") => {
            eprint!("{}", BUNDLE_USAGE);
            Ok(())
        }
        Some("cat") => {
            eprint!("{}", CAT_USAGE);
            Ok(())
        }
        Some("ls") => {
            eprint!("{}", LS_USAGE);
            Ok(())
        }
        Some("help") => {
            eprint!("{}", HELP_USAGE);
            Ok(())
        }
        Some(other) => {
            let loc = RuckLoc::builtin(&lang());
            Err(anyhow!("{}", loc.msg("cli-unknown-command", &[("command", other)])))
        }
    }
}

#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::enum_variant_names, clippy::type_complexity)]

use std::io::Write as _;
use std::process::ExitCode;

mod cli;
mod config;
mod plan;
mod svn;
mod term_out;

use term_out::ProgressPrint;

pub(crate) type FHashMap<K, V> = std::collections::HashMap<K, V, foldhash::fast::RandomState>;

enum RunError {
    Generic,
    Usage,
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return Err(RunError::Usage);
        }
    };

    let term_out = term_out::init(start, !args.no_progress);
    let progress_print = term_out.get_progress_print();

    let stderr_log_level = args
        .stderr_log_level
        .unwrap_or(cli::LogLevel::Warn)
        .to_log_level_filter();
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_log_level_filter);

    if let Err(e) = init_logger(
        stderr_log_level,
        args.log_file.as_deref(),
        file_log_level,
        progress_print.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError::Generic);
    }

    let r = run(&args, &progress_print);

    term_out.finish();

    r
}

fn run(args: &cli::Cli, progress_print: &ProgressPrint) -> Result<(), RunError> {
    let config = load_config(&args.config)?;

    if let Err(e) = config.verify() {
        for problem in e.problems() {
            tracing::error!("configuration: {problem}");
        }
        return Err(RunError::Generic);
    }

    let src = match args
        .src
        .as_deref()
        .or(config.general.subversion_url.as_deref())
    {
        Some(src) => src,
        None => {
            tracing::error!("no source repository given (--src or general.subversion-url)");
            return Err(RunError::Generic);
        }
    };

    progress_print.set_progress("opening source repository".into());

    let mut source = svn::DumpSource::open(src).map_err(|e| {
        tracing::error!("failed to open source {src:?}: {e}");
        RunError::Generic
    })?;

    let mut scanner = svn::RepositoryScanner::new();
    for branch in config.branches.iter() {
        scanner.add_branch(
            &branch.name,
            svn::BranchDefinition::new(
                branch
                    .revision_paths
                    .iter()
                    .map(|rp| (rp.revision, rp.path.as_str())),
            ),
        );
    }

    let eta = term_out::EtaTracker::start();
    let last_revision = config.general.last_revision;
    let info = scanner
        .identify_branches(source.stream(), last_revision, &mut |revision| {
            let progress = match last_revision {
                Some(last) => format!(
                    "scanning history - r{revision} / r{last}{}",
                    eta.eta_suffix(u64::from(revision), u64::from(last)),
                ),
                None => format!("scanning history - r{revision}"),
            };
            progress_print.set_progress(progress);
        })
        .map_err(|e| {
            tracing::error!("failed to scan source history: {e}");
            RunError::Generic
        })?;

    source.close().map_err(|e| {
        tracing::error!("failed to close source: {e}");
        RunError::Generic
    })?;

    tracing::info!(
        "scanned up to r{}, {} branches seen",
        info.latest_revision,
        info.branch_revisions.len(),
    );

    progress_print.set_progress("resolving branch topology".into());

    let branches = plan::configure_branches(&config, &info).map_err(|e| {
        tracing::error!("failed to resolve branch topology: {e}");
        RunError::Generic
    })?;

    for branch in branches.branches.iter() {
        match branch.origin {
            Some(ref origin) => tracing::debug!(
                "branch {:?} created from {:?} at r{}",
                branch.name,
                origin.branch,
                origin.revision,
            ),
            None => tracing::debug!("branch {:?} has no creation point", branch.name),
        }
    }

    progress_print.set_progress("ordering replay plan".into());

    let worklist = plan::Worklist::from_configured(&branches).map_err(|e| {
        tracing::error!("failed to build replay plan: {e}");
        RunError::Generic
    })?;
    let steps = worklist.create_plan().map_err(|e| {
        tracing::error!("failed to order replay plan: {e}");
        RunError::Generic
    })?;

    tracing::info!("replay plan has {} steps", steps.len());

    progress_print.freeze_progress();

    match args.plan_out {
        Some(ref path) => {
            let file = std::fs::File::create(path).map_err(|e| {
                tracing::error!("failed to create {path:?}: {e}");
                RunError::Generic
            })?;
            let mut out = std::io::BufWriter::new(file);
            plan::write_plan(&mut out, &steps, &branches)
                .and_then(|()| out.flush())
                .map_err(|e| {
                    tracing::error!("failed to write plan to {path:?}: {e}");
                    RunError::Generic
                })?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            plan::write_plan(&mut out, &steps, &branches).map_err(|e| {
                tracing::error!("failed to write plan: {e}");
                RunError::Generic
            })?;
        }
    }

    Ok(())
}

fn load_config(paths: &[std::path::PathBuf]) -> Result<config::Config, RunError> {
    let mut merged: Option<config::Config> = None;
    for path in paths {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("failed to read {path:?}: {e}");
            RunError::Generic
        })?;
        let parsed: config::Config = toml::from_str(&raw).map_err(|e| {
            tracing::error!("failed to parse {path:?}: {e}");
            RunError::Generic
        })?;
        merged = Some(match merged {
            Some(base) => base.merge(parsed),
            None => parsed,
        });
    }
    merged.ok_or_else(|| {
        tracing::error!("no configuration given");
        RunError::Generic
    })
}

fn init_logger(
    stderr_level: tracing::Level,
    file_path: Option<&std::path::Path>,
    file_level: Option<tracing::Level>,
    progress_print: ProgressPrint,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(MakeLogPrinter { progress_print })
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
            stderr_level,
        ));

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

// Routes formatted log lines through the progress printer so that they do
// not tear the progress line apart.
struct MakeLogPrinter {
    progress_print: ProgressPrint,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogPrinter {
    type Writer = LogPrinter<'a>;

    fn make_writer(&'a self) -> LogPrinter<'a> {
        LogPrinter {
            progress_print: &self.progress_print,
            buf: Vec::new(),
        }
    }
}

struct LogPrinter<'a> {
    progress_print: &'a ProgressPrint,
    buf: Vec<u8>,
}

impl Drop for LogPrinter<'_> {
    fn drop(&mut self) {
        self.progress_print
            .print_raw_line(std::mem::take(&mut self.buf));
    }
}

impl std::io::Write for LogPrinter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

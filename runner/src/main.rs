use clap::{ArgAction, Parser, Subcommand};
use klaht_input::{json_to_txt_file, txt_to_json_file};
use klaht_runner::{
    config::BatchConfig, executors::default_log_name, staging::Stager, CalculationRequest,
    LocalLauncher, RunOutcome, Runner,
};
use std::{path::PathBuf, process::exit};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

#[derive(Parser, Debug)]
#[command(name = "klaht", version, about = "Stage and launch VASP calculations concurrently")]
struct Cli {
    /// Raise log verbosity, -v for debug and -vv for trace (overrides RUST_LOG)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stage folders and run every calculation of a batch file
    Batch {
        /// YAML batch file
        config: PathBuf,
        /// Override launcher.workers of the batch file
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run a single calculation in the foreground
    Run {
        /// Simulation executable, e.g. vasp_std
        exec: PathBuf,
        /// Working directory holding the input files
        #[arg(long)]
        dir: PathBuf,
        /// Number of processes, only used with --mpi
        #[arg(long, default_value_t = 1)]
        cores: usize,
        /// Log file for stdout and stderr inside the working directory
        #[arg(long, default_value_t = default_log_name())]
        log: String,
        /// Wrap the executable with the parallel launcher
        #[arg(long)]
        mpi: bool,
        /// Parallel launcher used with --mpi
        #[arg(long, default_value = "mpirun")]
        launcher: PathBuf,
    },
    /// Create numbered folders holding copies of the input files
    Stage {
        /// Folder holding the input files
        #[arg(long)]
        source: PathBuf,
        /// Folders are named {prefix}_0, {prefix}_1, ...
        #[arg(long)]
        prefix: PathBuf,
        #[arg(long)]
        count: usize,
        /// Names of the files to copy
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Convert INCAR files from and to JSON
    #[command(subcommand)]
    Incar(IncarCommand),
}

#[derive(Subcommand, Debug)]
enum IncarCommand {
    /// INCAR text to a JSON document
    ToJson { incar: PathBuf, json: PathBuf },
    /// JSON document to INCAR text
    ToText { json: PathBuf, incar: PathBuf },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// log one line per calculation, the exit code is 2 if any of them failed
fn report(requests: &[CalculationRequest], outcomes: &[RunOutcome]) -> i32 {
    let mut succeeded = 0;

    for (index, (request, outcome)) in requests.iter().zip(outcomes).enumerate() {
        match outcome {
            RunOutcome::Success => {
                succeeded += 1;
                info!(
                    index,
                    dir = ?request.working_directory,
                    "Calculation {index} finished, output in {}",
                    request.log_path().to_string_lossy()
                );
            }
            RunOutcome::Failure(failure) => {
                error!(
                    index,
                    dir = ?request.working_directory,
                    exit_code = ?failure.exit_code,
                    "Calculation {index} failed: {failure}"
                );
            }
        }
    }

    info!("Done with {succeeded}/{}", outcomes.len());

    if succeeded == outcomes.len() {
        0
    } else {
        2
    }
}

fn batch(path: PathBuf, workers: Option<usize>) -> i32 {
    let mut config = match BatchConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {e}", path.to_string_lossy());
            return 1;
        }
    };

    if let Some(workers) = workers {
        config.launcher.workers = workers;
    }

    if config.preflight_checks() {
        error!("Preflight checks failed, nothing was launched");
        return 1;
    }

    if let Some(staging) = &config.staging {
        match staging.stager().create_folders(staging.count) {
            Ok(folders) => info!("Staged {} folders", folders.len()),
            Err(e) => {
                error!("Failed to stage folders: {e}");
                return 1;
            }
        }
    }

    // worker count and requests already passed the preflight checks
    let launcher = LocalLauncher::new(config.launcher.workers)
        .unwrap_or_log()
        .with_parallel_launcher(&config.launcher.parallel_launcher);
    let handles = launcher
        .submit_batch(config.calculations.iter().cloned())
        .unwrap_or_log();

    info!(
        "Submitted {} calculations to {} workers",
        handles.len(),
        launcher.max_workers()
    );
    let outcomes = launcher.join(handles);

    report(&config.calculations, &outcomes)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!("{cli:?}");

    let code = match cli.command {
        Commands::Batch { config, workers } => batch(config, workers),
        Commands::Run {
            exec,
            dir,
            cores,
            log,
            mpi,
            launcher,
        } => {
            let mut request = CalculationRequest::new(exec, dir)
                .with_cores(cores)
                .with_log_name(log);
            request.use_parallel_launcher = mpi;

            match Runner::new(request.clone()) {
                Ok(runner) => {
                    let outcome = runner.with_parallel_launcher(launcher).run();

                    report(&[request], &[outcome])
                }
                Err(e) => {
                    error!("Invalid calculation: {e}");
                    1
                }
            }
        }
        Commands::Stage {
            source,
            prefix,
            count,
            files,
        } => match Stager::new(source, prefix, files).create_folders(count) {
            Ok(folders) => {
                info!("{} folders created and files copied", folders.len());
                0
            }
            Err(e) => {
                error!("Failed to stage folders: {e}");
                1
            }
        },
        Commands::Incar(IncarCommand::ToJson { incar, json }) => {
            match txt_to_json_file(&incar, &json) {
                Ok(_) => {
                    info!("{} file has been created", json.to_string_lossy());
                    0
                }
                Err(e) => {
                    error!("Failed to convert {}: {e}", incar.to_string_lossy());
                    1
                }
            }
        }
        Commands::Incar(IncarCommand::ToText { json, incar }) => {
            match json_to_txt_file(&json, &incar) {
                Ok(_) => {
                    info!("{} file has been created", incar.to_string_lossy());
                    0
                }
                Err(e) => {
                    error!("Failed to convert {}: {e}", json.to_string_lossy());
                    1
                }
            }
        }
    };

    exit(code)
}

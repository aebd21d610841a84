use clap::{ArgAction, Parser, Subcommand};
use niicanon::canon::{self, walk_files};
use niicanon::{CanonConfig, Engine};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "niicanon",
    version,
    about = "Canonicalize NIfTI template volumes for a shared archive"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize every file under a directory, in place or into a mirror
    Fix {
        /// Input root
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Write into this directory instead of rewriting in place
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Scale T1w/T2w/PD so the 99.9th percentile maps to 10000
        #[arg(long)]
        normalize: bool,
        /// Keep the stored dtype (probseg and mask rules still apply)
        #[arg(long)]
        no_force_dtype: bool,
        /// Keep oblique affines
        #[arg(long)]
        no_deoblique: bool,
        /// Worker threads (0 = all cores)
        #[arg(short, long, env = "NIICANON_JOBS", default_value = "0")]
        jobs: usize,
    },
    /// Show what would happen to one volume, without writing
    Inspect {
        /// Volume to inspect (.nii or .nii.gz)
        file: PathBuf,
        /// Scale T1w/T2w/PD so the 99.9th percentile maps to 10000
        #[arg(long)]
        normalize: bool,
        /// Keep the stored dtype (probseg and mask rules still apply)
        #[arg(long)]
        no_force_dtype: bool,
        /// Keep oblique affines
        #[arg(long)]
        no_deoblique: bool,
    },
    /// List the files a run would visit
    Ls {
        /// Input root
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "niicanon=info",
        1 => "niicanon=debug",
        _ => "niicanon=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn config_from_flags(normalize: bool, no_force_dtype: bool, no_deoblique: bool) -> CanonConfig {
    CanonConfig::new()
        .normalize(normalize)
        .force_dtype(!no_force_dtype)
        .deoblique(!no_deoblique)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fix {
            path,
            out,
            normalize,
            no_force_dtype,
            no_deoblique,
            jobs,
        } => {
            let config = config_from_flags(normalize, no_force_dtype, no_deoblique).jobs(jobs);
            let report = canon::run(&path, out.as_deref(), &config)?;

            for rel in &report.modified {
                println!("{}", display_under(out.as_deref().unwrap_or(&path), rel));
            }
            for failure in &report.failures {
                eprintln!(
                    "error [{}] {}: {}",
                    failure.error.kind(),
                    failure.path.display(),
                    failure.error
                );
            }
            if !report.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Inspect {
            file,
            normalize,
            no_force_dtype,
            no_deoblique,
        } => {
            let engine = Engine::new(config_from_flags(normalize, no_force_dtype, no_deoblique));
            let decision = engine.inspect(&file)?;
            println!("{}", file.display());
            println!("{decision}");
        }

        Commands::Ls { path } => {
            let (files, failures) = walk_files(&path)?;
            for file in &files {
                println!("{}", file.strip_prefix(&path).unwrap_or(file).display());
            }
            for failure in &failures {
                eprintln!("error {}: {}", failure.path.display(), failure.error);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn display_under(root: &Path, rel: &Path) -> String {
    root.join(rel).display().to_string()
}

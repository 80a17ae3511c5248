//! clash CLI
//!
//! Entry point for the `clash` command-line tool.

use clap::{Args, Parser, Subcommand};
use clash::config::ConfigError;
use clash::poll::Deadline;
use clash::{
    ClashError, CloudError, Job, JobConfig, JobFactory, JobGroup, JobRuntimeSpec, TemplateRenderer,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code after Ctrl-C cancelled a job.
const EXIT_INTERRUPTED: i32 = 130;

/// How often `run` checks for Ctrl-C while waiting on the worker.
const INTERRUPT_CHECK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "clash")]
#[command(about = "Run scripts on short-lived cloud workers", version)]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job, wait for its status and clean up
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Job name (default: generated)
        #[arg(long, conflicts_with = "name_prefix")]
        name: Option<String>,

        /// Prefix for a generated job name
        #[arg(long)]
        name_prefix: Option<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run every job of a job file and wait for all of them
    Group {
        /// TOML file with one [[job]] table per job
        #[arg(long)]
        jobs: PathBuf,

        /// Group name; jobs are named {name}-{index}
        #[arg(long, default_value = "clash-group")]
        name: String,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the cloud-init document a job would boot with
    Render {
        #[command(flatten)]
        job: JobArgs,

        /// VM name baked into the document
        #[arg(long, default_value = "clash-job")]
        name: String,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// What the worker runs.
#[derive(Args)]
struct JobArgs {
    /// Command and arguments, one value per argument
    #[arg(
        long = "arg",
        required_unless_present = "script",
        conflicts_with = "script",
        allow_hyphen_values = true
    )]
    args: Vec<String>,

    /// Bash script to run instead of --arg
    #[arg(long)]
    script: Option<PathBuf>,

    /// Environment variable for the script (NAME=VALUE)
    #[arg(long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Bucket to mount into the container (BUCKET=PATH)
    #[arg(long = "mount", value_parser = parse_key_val)]
    mounts: Vec<(String, String)>,

    /// Container path to copy out afterwards (PATH=URL)
    #[arg(long = "target", value_parser = parse_key_val)]
    targets: Vec<(String, String)>,
}

impl JobArgs {
    fn spec(&self) -> Result<JobRuntimeSpec, ConfigError> {
        let mut spec = match &self.script {
            Some(path) => JobRuntimeSpec::from_script_file(path)?,
            None => JobRuntimeSpec::new(self.args.iter().cloned()),
        };
        spec.env_vars.extend(self.env.iter().cloned());
        spec.gcs_mounts.extend(self.mounts.iter().cloned());
        spec.gcs_target.extend(self.targets.iter().cloned());
        Ok(spec)
    }
}

/// Deployment settings layered over the config file.
#[derive(Args)]
struct ConfigArgs {
    /// TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long)]
    project: Option<String>,

    /// Container image the script runs in
    #[arg(long)]
    image: Option<String>,

    #[arg(long)]
    zone: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    subnetwork: Option<String>,

    #[arg(long)]
    service_account: Option<String>,

    #[arg(long)]
    machine_type: Option<String>,

    /// Use a preemptible VM
    #[arg(long)]
    preemptible: bool,

    /// Run the container privileged
    #[arg(long)]
    privileged: bool,
}

impl ConfigArgs {
    fn overrides(&self) -> Value {
        let mut overrides = Map::new();
        let strings = [
            ("project_id", &self.project),
            ("image", &self.image),
            ("zone", &self.zone),
            ("region", &self.region),
            ("subnetwork", &self.subnetwork),
            ("service_account", &self.service_account),
            ("machine_type", &self.machine_type),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                overrides.insert(key.to_string(), json!(value));
            }
        }
        if self.preemptible {
            overrides.insert("preemptible".to_string(), json!(true));
        }
        if self.privileged {
            overrides.insert("privileged".to_string(), json!(true));
        }
        Value::Object(overrides)
    }

    fn load(&self) -> Result<JobConfig, ConfigError> {
        JobConfig::load(self.config.as_deref(), Some(self.overrides()))
    }
}

/// A job file: `[[job]]` tables.
#[derive(Deserialize)]
struct JobFile {
    #[serde(default, rename = "job")]
    jobs: Vec<JobRuntimeSpec>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "clash=info",
        1 => "clash=debug",
        _ => "clash=trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    } else {
        EnvFilter::new(default)
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            job,
            name,
            name_prefix,
            timeout,
            config,
        } => run_job(&job, name, name_prefix, timeout, &config),
        Commands::Group {
            jobs,
            name,
            timeout,
            config,
        } => run_group(&jobs, name, timeout, &config),
        Commands::Render { job, name, config } => run_render(&job, &name, &config),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run_job(
    args: &JobArgs,
    name: Option<String>,
    name_prefix: Option<String>,
    timeout: Option<u64>,
    config_args: &ConfigArgs,
) -> clash::Result<i32> {
    let spec = args.spec()?;
    let config = Arc::new(config_args.load()?);
    let clients = clash::cloud::gcp::clients()?;
    let job = match (name, name_prefix) {
        (Some(name), _) => Job::with_name(name, config, clients),
        (None, Some(prefix)) => Job::with_name_prefix(&prefix, config, clients),
        (None, None) => Job::new(config, clients),
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt, cancelling job...");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "could not install interrupt handler");
    }

    let limit = timeout.map(Duration::from_secs);
    job.with_cleanup(|job| supervise(job, &spec, limit, &interrupted))
}

/// Start `job` and wait for its status code.
///
/// Interrupts and the time limit cancel the job. Cleanup is left to the
/// caller.
fn supervise(
    job: &mut Job,
    spec: &JobRuntimeSpec,
    limit: Option<Duration>,
    interrupted: &AtomicBool,
) -> clash::Result<i32> {
    job.run(spec, false)?;

    let (tx, rx) = mpsc::channel();
    job.on_finish(move |code| {
        let _ = tx.send(code);
    })?;

    let deadline = Deadline::new(limit);
    loop {
        if interrupted.load(Ordering::SeqCst) {
            job.cancel()?;
            return Ok(EXIT_INTERRUPTED);
        }
        if deadline.is_expired() {
            warn!(job = %job.name(), "job timed out, cancelling");
            cancel_after_failure(job);
            return Err(ClashError::JobTimeout {
                waited: deadline.elapsed(),
            });
        }
        match rx.recv_timeout(deadline.cap(INTERRUPT_CHECK)) {
            Ok(code) => {
                info!(job = %job.name(), status = code, "cleaning up");
                return Ok(code);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let lost = ClashError::Messaging {
                    context: format!("status listener of job {}", job.name()),
                    source: CloudError::Transport("stopped before the job reported".to_string()),
                };
                cancel_after_failure(job);
                return Err(lost);
            }
        }
    }
}

/// Cancel `job`, logging a failure; the scoped cleanup retries.
fn cancel_after_failure(job: &mut Job) {
    if let Err(e) = job.cancel() {
        warn!(job = %job.name(), error = %e, "could not cancel job");
    }
}

fn run_group(
    jobs: &Path,
    name: String,
    timeout: Option<u64>,
    config_args: &ConfigArgs,
) -> clash::Result<i32> {
    let config = Arc::new(config_args.load()?);
    let file = read_job_file(jobs)?;
    if file.jobs.is_empty() {
        return Err(ClashError::Configuration(format!(
            "{} defines no [[job]] tables",
            jobs.display()
        )));
    }

    let clients = clash::cloud::gcp::clients()?;
    let mut group = JobGroup::new(name, JobFactory::new(config, clients));
    for spec in file.jobs {
        group.add_job(spec);
    }

    let succeeded = group.with_cleanup(|group| {
        group.run()?;
        match timeout {
            Some(secs) => group.wait_timeout(Duration::from_secs(secs)),
            None => Ok(group.wait()),
        }
    })?;

    Ok(if succeeded { 0 } else { 1 })
}

fn read_job_file(path: &Path) -> Result<JobFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
}

fn run_render(args: &JobArgs, name: &str, config_args: &ConfigArgs) -> clash::Result<i32> {
    let config = config_args.load()?;
    let renderer = TemplateRenderer::new()?;
    let document = args.spec()?.cloud_init(name).render(&renderer, &config)?;
    print!("{}", document);
    Ok(0)
}

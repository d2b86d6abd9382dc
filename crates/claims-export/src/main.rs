use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use claims_export::config::load_config;
use claims_export::{
    ClaimsClient, Config, ConfigError, ContractProcessor, Database, EventSink, ExportError,
    HttpClaimsClient, JobPreProcessor, JobProcessor, JobStore, PatientClaimsProcessor,
    RetryingClaimsClient, SqliteStore, TaskPool, WorkerService,
};

#[derive(Parser)]
#[command(name = "claims-export")]
#[command(about = "Bulk claims export worker", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "CLAIMS_EXPORT_CONFIG", default_value = "claims-export.json")]
    config: PathBuf,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for submitted jobs and process them until interrupted.
    Run,
    /// Process a single submitted job and exit.
    Process {
        /// UUID of the job to process.
        job_uuid: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ExportError> {
    let config = load_config(&cli.config)?;
    claims_export::logging::init_logging(cli.json_logs || config.logging.json)?;

    let service = Arc::new(build_service(&config)?);

    let handler_service = Arc::clone(&service);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received");
        handler_service.shutdown();
        std::process::exit(130);
    }) {
        warn!("Failed to install interrupt handler: {}", e);
    }

    match cli.command {
        Command::Run => {
            service.run(config.worker.poll_interval())?;
        }
        Command::Process { job_uuid } => {
            let job = service.process(&job_uuid)?;
            info!("Job {} finished as {}", job.job_uuid, job.status);
            println!("{} {}", job.job_uuid, job.status);
        }
    }

    service.shutdown();
    Ok(())
}

fn build_service(config: &Config) -> Result<WorkerService, ExportError> {
    let database_path = config
        .database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
    let store = SqliteStore::new(Database::open(&database_path)?);

    let job_store: Arc<dyn JobStore> = Arc::new(store.clone());
    let events: Arc<dyn EventSink> = Arc::new(store.clone());

    let http = HttpClaimsClient::new(
        &config.upstream.base_url,
        config.upstream.page_size,
        config.upstream.timeout(),
    )?;
    let client: Arc<dyn ClaimsClient> =
        Arc::new(RetryingClaimsClient::new(http, config.retry_policy()));

    let pool = Arc::new(TaskPool::new(config.worker.pool_size)?);
    info!(
        "Task pool started with {} workers, upstream {}",
        pool.size(),
        config.upstream.base_url
    );

    let patients = PatientClaimsProcessor::new(Arc::clone(&pool), client, Arc::clone(&events));
    let contracts = ContractProcessor::new(
        Arc::clone(&job_store),
        Arc::new(store.clone()),
        patients,
        Arc::clone(&events),
        config.contract_settings(),
    );
    let processor = JobProcessor::new(
        Arc::clone(&job_store),
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::clone(&events),
        contracts,
        config.job_settings(),
    );
    let preprocessor = JobPreProcessor::new(Arc::clone(&job_store), events);

    Ok(WorkerService::new(preprocessor, processor, job_store, pool)?)
}

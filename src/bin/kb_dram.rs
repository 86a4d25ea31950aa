use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use kb_dram::app::{self, App};
use kb_dram::config::ConfigLoader;
use kb_dram::error::DramError;
use kb_dram::file_util::FileUtilHttpClient;
use kb_dram::ontology::OntologyHttpClient;
use kb_dram::output::{JobRequest, JobResponse, JsonOutput};
use kb_dram::report::ReportHttpClient;
use kb_dram::toolchain::DramCommand;
use kb_dram::workspace::WorkspaceHttpClient;

#[derive(Parser)]
#[command(name = "kb-dram")]
#[command(about = "DRAM annotation and distillation as platform SDK job methods")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run one JSON-RPC job from an input file")]
    Run(RunArgs),
    #[command(about = "Print module status")]
    Status,
}

#[derive(Args)]
struct RunArgs {
    input: Utf8PathBuf,

    output: Utf8PathBuf,

    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<DramError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DramError) -> u8 {
    match error {
        DramError::InvalidParameter { .. }
        | DramError::InvalidObjectRef(_)
        | DramError::UnsupportedInput(_)
        | DramError::UnknownMethod(_) => 2,
        DramError::MissingConfig | DramError::ConfigRead(_) | DramError::ConfigParse(_) => 2,
        DramError::ServiceHttp { .. }
        | DramError::ServiceStatus { .. }
        | DramError::ServiceError { .. } => 3,
        DramError::MissingDatabase(_)
        | DramError::MissingTool(_)
        | DramError::ToolchainFailed(_)
        | DramError::MissingOutput(_)
        | DramError::MissingColumn(_)
        | DramError::AnnotationParse(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_job(args),
        Commands::Status => JsonOutput::print_status(&app::status()).into_diagnostic(),
    }
}

fn run_job(args: RunArgs) -> miette::Result<()> {
    let request = match JobRequest::read(&args.input) {
        Ok(request) => request,
        Err(err) => {
            JsonOutput::write_response(&args.output, &JobResponse::failure(Value::Null, &err))
                .into_diagnostic()?;
            return Err(err.into());
        }
    };
    tracing::info!(method = %request.method, "job started");

    match execute(&request, &args) {
        Ok(result) => {
            JsonOutput::write_response(&args.output, &JobResponse::success(request.id, result))
                .into_diagnostic()
        }
        Err(err) => {
            tracing::error!(method = %request.method, error = %err, "job failed");
            JsonOutput::write_response(&args.output, &JobResponse::failure(request.id, &err))
                .into_diagnostic()?;
            Err(err.into())
        }
    }
}

fn execute(request: &JobRequest, args: &RunArgs) -> Result<Value, DramError> {
    let ctx = request.context();
    if request.method.ends_with(app::METHOD_STATUS) {
        return serde_json::to_value(vec![app::status()])
            .map_err(|err| DramError::Postcondition(err.to_string()));
    }

    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let token = args
        .token
        .clone()
        .or_else(|| std::env::var("KB_AUTH_TOKEN").ok())
        .filter(|token| !token.trim().is_empty());
    let token = token.as_deref();

    let workspace = WorkspaceHttpClient::new(&config.workspace_url, token)?;
    let files = FileUtilHttpClient::new(&config.callback_url, token)?;
    let ontology = OntologyHttpClient::new(&config.ontology_url, token)?;
    let reports = ReportHttpClient::new(&config.callback_url, token)?;
    let app = App::new(config, workspace, files, DramCommand::new(), ontology, reports);
    app.dispatch(&request.method, &request.params, &ctx)
}

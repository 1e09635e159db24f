use std::{process, sync::Arc};

use async_trait::async_trait;
use quaderno::{
    application::{
        compile::{ArtifactStore, CompileOrchestrator, CompileOutcome, DocumentRenderer,
            ProcessRenderer},
        dispatch::Dispatcher,
        entries::EntryStore,
        error::AppError,
        present::{DocumentPresenter, PageSink},
    },
    config,
    domain::DateKey,
    infra::{error::InfraError, telemetry},
};
use quaderno_api_types::{ApiResponse, PresentEvent, PresentNotice, ServerMessage};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compile(args) => run_compile(settings, args).await,
    }
}

struct Services {
    entries: Arc<EntryStore>,
    orchestrator: Arc<CompileOrchestrator>,
    presenter: Arc<DocumentPresenter>,
}

fn build_services(settings: &config::Settings) -> Result<Services, AppError> {
    let entries = Arc::new(
        EntryStore::new(settings.storage.entries_dir.clone()).map_err(InfraError::Io)?,
    );
    let store = ArtifactStore::new(
        settings.storage.output_dir.clone(),
        settings.renderer.artifact_extension.clone(),
    )
    .map_err(InfraError::Io)?;
    let renderer: Arc<dyn DocumentRenderer> = Arc::new(ProcessRenderer::new(
        settings.renderer.command.clone(),
        store,
    ));
    let orchestrator = Arc::new(CompileOrchestrator::start(
        renderer,
        settings.renderer.template_path.clone(),
    ));
    let presenter = Arc::new(DocumentPresenter::new());

    Ok(Services {
        entries,
        orchestrator,
        presenter,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let services = build_services(&settings)?;
    let dispatcher = Dispatcher::new(
        services.entries,
        services.orchestrator,
        services.presenter,
    );

    info!(
        entries_dir = %settings.storage.entries_dir.display(),
        output_dir = %settings.storage.output_dir.display(),
        renderer = %settings.renderer.command.display(),
        "Serving the journal protocol over stdio"
    );

    dispatcher
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .map_err(|err| AppError::unexpected(format!("dispatcher failed: {err}")))
}

/// Prints presentation progress as JSON lines, like the serve loop does.
struct StdoutSink;

#[async_trait]
impl PageSink for StdoutSink {
    async fn emit(&self, event: PresentEvent) {
        let message = ServerMessage::Event(PresentNotice { id: 0, event });
        if let Ok(line) = serde_json::to_string(&message) {
            println!("{line}");
        }
    }
}

async fn run_compile(
    settings: config::Settings,
    args: config::CompileArgs,
) -> Result<(), AppError> {
    let key = DateKey::parse(&args.date)?;
    let services = build_services(&settings)?;

    let source_text = match args.file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(InfraError::Io)?,
        None => {
            let entry = services
                .entries
                .load(&key)
                .await
                .map_err(|err| AppError::unexpected(format!("failed to load entry: {err}")))?;
            if entry.content.is_empty() {
                return Err(AppError::validation(format!(
                    "no stored entry for {key}; pass --file to compile a draft"
                )));
            }
            entry.content
        }
    };

    let outcome = services.orchestrator.compile(key, source_text).await;
    match outcome {
        CompileOutcome::Success { artifact_path, log } => {
            let response =
                ApiResponse::compiled(0, artifact_path.display().to_string(), log);
            print_message(&ServerMessage::Response(response))?;
            services
                .presenter
                .present(artifact_path, Arc::new(StdoutSink))
                .await;
            services.presenter.finish().await;
            Ok(())
        }
        CompileOutcome::Failure { reason, log } => {
            let response = ApiResponse::failure(Some(0), reason.clone()).with_log(log);
            print_message(&ServerMessage::Response(response))?;
            Err(AppError::unexpected(format!("compile failed: {reason}")))
        }
    }
}

fn print_message(message: &ServerMessage) -> Result<(), AppError> {
    let line = serde_json::to_string(message)
        .map_err(|err| AppError::unexpected(format!("failed to encode response: {err}")))?;
    println!("{line}");
    Ok(())
}

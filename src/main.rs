use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use comfy_ci_runner::cli::Cli;
use comfy_ci_runner::config::{RunnerSettings, WorkflowTask};
use comfy_ci_runner::engine::{ComfyCliEngine, RunOrchestrator};
use comfy_ci_runner::error::{ConfigError, RunError};
use comfy_ci_runner::logging;
use comfy_ci_runner::storage::{ArtifactPublisher, GcsCliStore};
use comfy_ci_runner::telemetry::{
    HttpTrackingApi, MachineProfile, SystemProbeFactory, TelemetryReporter,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("設定の読み込みに失敗しました: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // ファイル出力を使う場合、ガードはプロセス終了まで保持する
    let _guard = logging::init_tracing(&settings.logging);

    match run(&cli, settings).await {
        Ok(completed) => {
            tracing::info!(completed, "comfy ci run finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "comfy ci run failed");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<RunnerSettings, ConfigError> {
    match path {
        Some(path) => RunnerSettings::from_file(path),
        None => Ok(RunnerSettings::default()),
    }
}

async fn run(cli: &Cli, settings: RunnerSettings) -> Result<usize, RunError> {
    let context = cli.to_context(&settings);
    let tasks = WorkflowTask::plan(
        &cli.workflow_names(),
        &context,
        &cli.workflows_dir(&settings),
    );

    tracing::info!(
        repo = %context.repo,
        run_id = %context.run_id,
        workflows = tasks.len(),
        "starting comfy ci run"
    );

    let profile = MachineProfile::capture(&settings.probe).await;
    tracing::info!(
        machine = %profile.host_name,
        gpu = %profile.gpu_description(),
        cpu = %profile.cpu_description(),
        "machine profile captured"
    );

    let engine = ComfyCliEngine::new()
        .with_command(&settings.engine.command)
        .with_timeout(settings.engine.timeout);
    let store = GcsCliStore::with_command(&settings.storage.command);
    let api = HttpTrackingApi::new(&context.api_endpoint, context.api_timeout)?;
    let reporter = TelemetryReporter::new(
        Arc::new(api),
        settings.telemetry.retry_delay,
        settings.telemetry.response_log.clone(),
    );
    let probes = SystemProbeFactory::new(
        &settings.probe.gpu_command,
        &settings.engine.entry_script,
    );

    let orchestrator = RunOrchestrator::new(
        context,
        Arc::new(engine),
        ArtifactPublisher::new(Arc::new(store)),
        reporter,
        Arc::new(probes),
    )
    .with_engine_log_dir(&settings.engine.log_dir);

    orchestrator.run_all(tasks, &profile).await
}

//! ワークフロー実行オーケストレーター
//!
//! # 責務
//!
//! このモジュールは、ワークフローの一括実行を制御する [`RunOrchestrator`] を提供します。
//! ワークフローを1つずつ順番に実行し、実行ごとのライフサイクルを管理します。
//!
//! # 実行フロー（1ワークフローあたり）
//!
//! 1. **Started**: 開始時刻を記録（ストレージパスは [`WorkflowTask`] 生成時に決定済み）
//! 2. **Running**: リソースサンプラーを起動し、エンジンを実行（上限600秒）
//!    - 失敗・タイムアウト → サンプラーを停止して **Failed** を送信し、エラーを返す
//! 3. 出力ログから成果物を探す。見つからなければ連番のフォールバックファイルを確認
//!    - どちらも無い → **Failed**
//! 4. 成果物とエンジンログをアップロード
//! 5. **Completed** を送信して次のワークフローへ
//!
//! いずれかのワークフローが失敗した時点でバッチ全体を中断し、残りは実行しません。
//! RSS の計測はエンジンプロセスが1つだけ動いていることを前提にしているため、
//! ワークフロー同士を並列に実行することはありません。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use comfy_ci_runner::config::{RunContext, RunnerSettings, WorkflowTask};
//! use comfy_ci_runner::engine::{ComfyCliEngine, RunOrchestrator};
//! use comfy_ci_runner::storage::{ArtifactPublisher, GcsCliStore};
//! use comfy_ci_runner::telemetry::{
//!     HttpTrackingApi, MachineProfile, SystemProbeFactory, TelemetryReporter,
//! };
//!
//! # async fn example(context: RunContext) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RunnerSettings::default();
//! let profile = MachineProfile::capture(&settings.probe).await;
//!
//! let api = HttpTrackingApi::new(&context.api_endpoint, context.api_timeout)?;
//! let orchestrator = RunOrchestrator::new(
//!     context.clone(),
//!     Arc::new(ComfyCliEngine::new()),
//!     ArtifactPublisher::new(Arc::new(GcsCliStore::new())),
//!     TelemetryReporter::new(Arc::new(api), Duration::from_secs(10), "application.log".into()),
//!     Arc::new(SystemProbeFactory::new("nvidia-smi", "main.py")),
//! );
//!
//! let tasks = WorkflowTask::plan(&["default.json"], &context, Path::new("workflows"));
//! orchestrator.run_all(tasks, &profile).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RunContext, WorkflowTask};
use crate::engine::output::parse_output_filenames;
use crate::engine::result::{RunResult, epoch_seconds};
use crate::engine::traits::{EngineOutput, WorkflowEngine};
use crate::error::{EngineError, RunError};
use crate::storage::ArtifactPublisher;
use crate::telemetry::probe::ProbeFactory;
use crate::telemetry::profile::MachineProfile;
use crate::telemetry::reporter::TelemetryReporter;
use crate::telemetry::sampler::{ResourceSampler, SAMPLE_PERIOD, SampleTick};

/// エンジンログのデフォルト出力先
const DEFAULT_ENGINE_LOG_DIR: &str = "logs";

/// 成果物1件（ファイル名とローカルパス）
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiscoveredArtifact {
    filename: String,
    local_path: PathBuf,
}

/// ワークフローの一括実行を制御するオーケストレーター
///
/// # フィールド
///
/// - `context`: CI 情報（不変）
/// - `engine`: ワークフローエンジン
/// - `publisher`: 成果物のアップロード先
/// - `reporter`: テレメトリーの送信先
/// - `probes`: 実行ごとのリソース計測プローブ
pub struct RunOrchestrator {
    context: RunContext,
    engine: Arc<dyn WorkflowEngine>,
    publisher: ArtifactPublisher,
    reporter: TelemetryReporter,
    probes: Arc<dyn ProbeFactory>,
    engine_log_dir: PathBuf,
    sample_period: Duration,
}

impl RunOrchestrator {
    /// 新しいオーケストレーターを生成
    pub fn new(
        context: RunContext,
        engine: Arc<dyn WorkflowEngine>,
        publisher: ArtifactPublisher,
        reporter: TelemetryReporter,
        probes: Arc<dyn ProbeFactory>,
    ) -> Self {
        Self {
            context,
            engine,
            publisher,
            reporter,
            probes,
            engine_log_dir: PathBuf::from(DEFAULT_ENGINE_LOG_DIR),
            sample_period: SAMPLE_PERIOD,
        }
    }

    /// エンジンログを書き出すディレクトリを設定
    pub fn with_engine_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.engine_log_dir = dir.into();
        self
    }

    /// サンプリング周期を設定
    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    /// 実行コンテキスト
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// すべてのワークフローを順番に実行する
    ///
    /// # 戻り値
    ///
    /// - `Ok(usize)`: 完了したワークフロー数（空のリストなら `0`）
    /// - `Err(RunError)`: 最初に失敗したワークフローのエラー。以降のワークフローは実行されない
    pub async fn run_all(
        &self,
        tasks: Vec<WorkflowTask>,
        profile: &MachineProfile,
    ) -> Result<usize, RunError> {
        tracing::info!(workflows = tasks.len(), "running workflows");

        let mut completed = 0;
        for task in tasks {
            self.run_task(&task, profile).await?;
            completed += 1;
        }

        tracing::info!(completed, "all workflows completed");
        Ok(completed)
    }

    /// ワークフローを1つ実行する
    ///
    /// 致命的なエラーの場合も、エラーを返す前に `Failed` の送信を試みます。
    pub async fn run_task(
        &self,
        task: &WorkflowTask,
        profile: &MachineProfile,
    ) -> Result<RunResult, RunError> {
        let run = RunResult::started();
        tracing::info!(
            workflow = %task.name,
            file = %task.workflow_file.display(),
            artifact_path = %task.artifact_path,
            "workflow run started"
        );

        // 早期リターンや future の破棄時も Drop で停止信号が送られる
        let sampler = ResourceSampler::new(self.probes.create())
            .with_period(self.sample_period)
            .start();
        let outcome = self.engine.run(&task.workflow_file).await;
        // 終了時刻はエンジンの終了時点。後続のアップロード時間は含めない
        let finished_at = epoch_seconds();
        let samples = sampler.stop().await;

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                log_engine_failure(&task.name, &err);
                let error = RunError::EngineExecution {
                    workflow: task.name.clone(),
                    source: err,
                };
                return Err(self.fail(task, run, finished_at, samples, profile, error).await);
            }
        };

        tracing::info!(workflow = %task.name, samples = samples.len(), "workflow finished");
        tracing::debug!(workflow = %task.name, stdout = %output.stdout, "engine output");

        let Some(discovered) = self.discover_artifacts(task, &output).await else {
            let error = RunError::NoOutputDiscovered {
                workflow: task.name.clone(),
            };
            return Err(self.fail(task, run, finished_at, samples, profile, error).await);
        };

        let artifacts = match self.publish_artifacts(task, &discovered).await {
            Ok(keys) => keys,
            Err(error) => {
                return Err(self.fail(task, run, finished_at, samples, profile, error).await);
            }
        };

        if let Err(error) = self.publish_engine_log(task, &output).await {
            return Err(self.fail(task, run, finished_at, samples, profile, error).await);
        }

        let run = run.complete(finished_at, samples, artifacts);
        self.reporter
            .report(&self.context, &task.name, &run, Some(&task.log_path), profile)
            .await?;

        tracing::info!(
            workflow = %task.name,
            artifacts = run.artifacts.len(),
            avg_vram = run.vram.average,
            peak_vram = run.vram.peak,
            "workflow run completed"
        );
        Ok(run)
    }

    /// `Failed` を送信し、元のエラーを返す
    ///
    /// 送信自体の失敗はログに残すのみで、元のエラーを優先します。
    async fn fail(
        &self,
        task: &WorkflowTask,
        run: RunResult,
        finished_at: u64,
        samples: Vec<SampleTick>,
        profile: &MachineProfile,
        error: RunError,
    ) -> RunError {
        tracing::error!(workflow = %task.name, error = %error, "workflow run failed");

        let run = run.fail(finished_at, samples);
        if let Err(report_err) = self
            .reporter
            .report(&self.context, &task.name, &run, None, profile)
            .await
        {
            tracing::error!(
                workflow = %task.name,
                error = %report_err,
                "failed to report failed workflow run"
            );
        }

        error
    }

    /// 出力ログから成果物を探し、見つからなければフォールバックファイルを確認する
    ///
    /// フォールバックは連番付きの1ファイルのみです。マーカーが無いまま複数ファイルが
    /// 出力されたケースには対応しません。
    async fn discover_artifacts(
        &self,
        task: &WorkflowTask,
        output: &EngineOutput,
    ) -> Option<Vec<DiscoveredArtifact>> {
        let output_dir = self.context.output_dir();

        match parse_output_filenames(&output.stdout) {
            Some(names) if !names.is_empty() => {
                tracing::info!(workflow = %task.name, files = ?names, "outputs found in engine log");
                return Some(
                    names
                        .into_iter()
                        .map(|filename| DiscoveredArtifact {
                            local_path: output_dir.join(&filename),
                            filename,
                        })
                        .collect(),
                );
            }
            Some(_) => {
                tracing::warn!(workflow = %task.name, "output marker found without file names");
            }
            None => {
                tracing::warn!(workflow = %task.name, "output marker not found in engine log");
            }
        }

        let fallback = task.fallback_output(&self.context);
        if !tokio::fs::try_exists(&fallback).await.unwrap_or(false) {
            tracing::error!(
                workflow = %task.name,
                fallback = %fallback.display(),
                "fallback output file not found"
            );
            return None;
        }

        tracing::info!(workflow = %task.name, fallback = %fallback.display(), "using fallback output file");
        let filename = file_name_of(&fallback);
        Some(vec![DiscoveredArtifact {
            filename,
            local_path: fallback,
        }])
    }

    async fn publish_artifacts(
        &self,
        task: &WorkflowTask,
        artifacts: &[DiscoveredArtifact],
    ) -> Result<Vec<String>, RunError> {
        let mut keys = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let key = task.artifact_key(&artifact.filename);
            self.publisher
                .publish(&self.context.bucket_name, &key, &artifact.local_path)
                .await?;
            keys.push(key);
        }

        Ok(keys)
    }

    async fn publish_engine_log(
        &self,
        task: &WorkflowTask,
        output: &EngineOutput,
    ) -> Result<(), RunError> {
        tokio::fs::create_dir_all(&self.engine_log_dir).await?;
        let local = self.engine_log_dir.join(task.log_file_name());
        tokio::fs::write(&local, output.combined_log()).await?;

        self.publisher
            .publish(&self.context.bucket_name, &task.log_path, &local)
            .await?;
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn log_engine_failure(workflow: &str, err: &EngineError) {
    match err {
        EngineError::ExitStatus { code, stdout, stderr } => {
            tracing::error!(workflow, code = ?code, stdout = %stdout, stderr = %stderr, "engine exited with failure");
        }
        other => {
            tracing::error!(workflow, error = %other, "engine did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::RunStatus;
    use crate::error::{ReportError, StorageError};
    use crate::storage::ObjectStore;
    use crate::telemetry::probe::{ProbeReading, ResourceProbe};
    use crate::telemetry::reporter::{ApiResponse, TrackingApi};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 固定の結果を返すモックエンジン
    struct MockEngine {
        result: Result<EngineOutput, fn() -> EngineError>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl MockEngine {
        fn succeeding(stdout: &str) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(EngineOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: Err(|| EngineError::ExitStatus {
                    code: Some(1),
                    stdout: "Traceback".to_string(),
                    stderr: "CUDA out of memory".to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WorkflowEngine for MockEngine {
        async fn run(&self, workflow_file: &Path) -> Result<EngineOutput, EngineError> {
            self.calls.lock().unwrap().push(workflow_file.to_path_buf());
            match &self.result {
                Ok(output) => Ok(output.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    #[derive(Default)]
    struct MockStore {
        uploads: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn upload(&self, _: &str, destination: &str, _: &Path) -> Result<(), StorageError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(StorageError::UploadFailed {
                    destination: destination.to_string(),
                    stderr: "denied".to_string(),
                });
            }
            self.uploads.lock().unwrap().push(destination.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockApi {
        bodies: Mutex<Vec<serde_json::Value>>,
        reject_with: Option<u16>,
    }

    #[async_trait]
    impl TrackingApi for MockApi {
        async fn post(&self, body: String) -> Result<ApiResponse, ReportError> {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_str(&body).unwrap());
            Ok(ApiResponse {
                status: self.reject_with.unwrap_or(200),
                body: "{}".to_string(),
            })
        }
    }

    struct FixedProbe;

    #[async_trait]
    impl ResourceProbe for FixedProbe {
        async fn read(&mut self) -> ProbeReading {
            ProbeReading {
                vram_used_mib: 1024.0,
                gpu_load_fraction: 0.5,
                engine_process_rss_mib: 2048.0,
                host_cpu_percent: 30.0,
            }
        }
    }

    struct FixedProbes;

    impl ProbeFactory for FixedProbes {
        fn create(&self) -> Box<dyn ResourceProbe> {
            Box::new(FixedProbe)
        }
    }

    fn profile() -> MachineProfile {
        MachineProfile {
            host_name: "runner".to_string(),
            os_version: "linux".to_string(),
            gpu_model: "Tesla T4".to_string(),
            gpu_total_vram_mib: Some(15360.0),
            logical_cores: 4,
            physical_cores: Some(2),
            initial_cpu_percent: 1.0,
            total_memory_bytes: 0,
            available_memory_bytes: 0,
            total_disk_bytes: 0,
            available_disk_bytes: 0,
            package_manifest: String::new(),
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<MockStore>,
        api: Arc<MockApi>,
    }

    impl Fixture {
        fn new(store: MockStore) -> Self {
            Self::with_api(store, MockApi::default())
        }

        fn with_api(store: MockStore, api: MockApi) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("workspace/output")).unwrap();
            Self {
                dir,
                store: Arc::new(store),
                api: Arc::new(api),
            }
        }

        fn context(&self) -> RunContext {
            let mut ctx = RunContext::for_tests();
            ctx.workspace_path = self.dir.path().join("workspace");
            ctx
        }

        fn orchestrator(&self, engine: Arc<MockEngine>) -> RunOrchestrator {
            RunOrchestrator::new(
                self.context(),
                engine,
                ArtifactPublisher::new(self.store.clone()),
                TelemetryReporter::new(
                    self.api.clone(),
                    Duration::ZERO,
                    self.dir.path().join("application.log"),
                ),
                Arc::new(FixedProbes),
            )
            .with_engine_log_dir(self.dir.path().join("logs"))
            .with_sample_period(Duration::from_millis(10))
        }

        fn output_file(&self, name: &str) {
            std::fs::write(self.dir.path().join("workspace/output").join(name), b"png").unwrap();
        }

        fn task(&self, name: &str, index: usize) -> WorkflowTask {
            WorkflowTask::new(name, index, &self.context(), Path::new("workflows"))
        }

        fn statuses(&self) -> Vec<String> {
            self.api
                .bodies
                .lock()
                .unwrap()
                .iter()
                .map(|b| b["status"].as_str().unwrap().to_string())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_completed_run_uploads_parsed_outputs() {
        let fx = Fixture::new(MockStore::default());
        fx.output_file("a.png");
        let engine = MockEngine::succeeding("Outputs:\nfilename=a.png&type=output\n");
        let task = fx.task("default.json", 1);

        let run = fx.orchestrator(engine.clone()).run_task(&task, &profile()).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.artifacts, vec![format!("{}/a.png", task.artifact_path)]);
        assert_eq!(
            *fx.store.uploads.lock().unwrap(),
            vec![format!("{}/a.png", task.artifact_path), task.log_path.clone()]
        );
        assert_eq!(fx.statuses(), vec!["WorkflowRunStatusCompleted"]);
        assert_eq!(*engine.calls.lock().unwrap(), vec![PathBuf::from("workflows/default.json")]);
        assert!(fx.dir.path().join("logs").join(task.log_file_name()).exists());
    }

    #[tokio::test]
    async fn test_fallback_file_is_used_without_marker() {
        let fx = Fixture::new(MockStore::default());
        fx.output_file("ComfyUI_00002_.png");
        let engine = MockEngine::succeeding("Prompt executed in 1.0 seconds\n");
        let task = fx.task("second.json", 2);

        let run = fx.orchestrator(engine).run_task(&task, &profile()).await.unwrap();

        assert_eq!(run.artifacts, vec![format!("{}/ComfyUI_00002_.png", task.artifact_path)]);
    }

    #[tokio::test]
    async fn test_no_marker_and_no_fallback_is_fatal() {
        let fx = Fixture::new(MockStore::default());
        let engine = MockEngine::succeeding("Prompt executed in 1.0 seconds\n");
        let task = fx.task("default.json", 1);

        let result = fx.orchestrator(engine).run_task(&task, &profile()).await;

        assert!(matches!(result, Err(RunError::NoOutputDiscovered { .. })));
        assert!(fx.store.uploads.lock().unwrap().is_empty());
        assert_eq!(fx.statuses(), vec!["WorkflowRunStatusFailed"]);
    }

    #[tokio::test]
    async fn test_engine_failure_reports_failed_with_samples() {
        let fx = Fixture::new(MockStore::default());
        let task = fx.task("default.json", 1);

        let result = fx
            .orchestrator(MockEngine::failing())
            .run_task(&task, &profile())
            .await;

        assert!(matches!(result, Err(RunError::EngineExecution { .. })));
        assert_eq!(fx.statuses(), vec!["WorkflowRunStatusFailed"]);

        let bodies = fx.api.bodies.lock().unwrap();
        assert!(bodies[0]["machine_stats"]["vram_time_series"].is_object());
        assert_eq!(bodies[0]["output_files_gcs_paths"], "");
    }

    #[tokio::test]
    async fn test_storage_failure_reports_failed() {
        let fx = Fixture::new(MockStore {
            fail: true,
            ..Default::default()
        });
        fx.output_file("a.png");
        let engine = MockEngine::succeeding("Outputs:\nfilename=a.png\n");
        let task = fx.task("default.json", 1);

        let result = fx.orchestrator(engine).run_task(&task, &profile()).await;

        assert!(matches!(result, Err(RunError::StorageUpload(_))));
        assert_eq!(fx.statuses(), vec!["WorkflowRunStatusFailed"]);
    }

    #[tokio::test]
    async fn test_end_time_excludes_upload_time() {
        let fx = Fixture::new(MockStore {
            delay: Duration::from_millis(1100),
            ..Default::default()
        });
        fx.output_file("a.png");
        let engine = MockEngine::succeeding("Outputs:\nfilename=a.png\n");
        let task = fx.task("default.json", 1);

        // 成果物とエンジンログの2回のアップロードで2.2秒以上かかる
        let run = fx.orchestrator(engine).run_task(&task, &profile()).await.unwrap();
        let reported_at = epoch_seconds();

        assert!(reported_at - run.end_time >= 2);
        assert!(run.end_time - run.start_time <= 1);

        let bodies = fx.api.bodies.lock().unwrap();
        assert_eq!(bodies[0]["end_time"], run.end_time);
    }

    #[tokio::test]
    async fn test_completed_report_failure_aborts_batch() {
        let fx = Fixture::with_api(
            MockStore::default(),
            MockApi {
                reject_with: Some(500),
                ..Default::default()
            },
        );
        fx.output_file("ComfyUI_00001_.png");
        let engine = MockEngine::succeeding("Prompt executed in 1.0 seconds\n");
        let tasks = vec![fx.task("one.json", 1), fx.task("two.json", 2)];

        let result = fx.orchestrator(engine.clone()).run_all(tasks, &profile()).await;

        match result {
            Err(RunError::TelemetryDelivery(ReportError::DeliveryFailed {
                status, attempts, ..
            })) => {
                assert_eq!(status, Some(500));
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected TelemetryDelivery error, got {:?}", other),
        }
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
        assert_eq!(fx.statuses(), vec!["WorkflowRunStatusCompleted"; 2]);
    }

    #[tokio::test]
    async fn test_batch_aborts_on_first_failure() {
        let fx = Fixture::new(MockStore::default());
        let engine = MockEngine::failing();
        let tasks = vec![fx.task("one.json", 1), fx.task("two.json", 2)];

        let result = fx.orchestrator(engine.clone()).run_all(tasks, &profile()).await;

        assert!(result.is_err());
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
        assert_eq!(fx.statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_task_list_is_noop() {
        let fx = Fixture::new(MockStore::default());
        let engine = MockEngine::succeeding("");

        let completed = fx.orchestrator(engine.clone()).run_all(vec![], &profile()).await.unwrap();

        assert_eq!(completed, 0);
        assert!(engine.calls.lock().unwrap().is_empty());
        assert!(fx.statuses().is_empty());
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of(Path::new("/a/b/ComfyUI_00001_.png")), "ComfyUI_00001_.png");
        assert_eq!(file_name_of(Path::new("/")), "");
    }
}

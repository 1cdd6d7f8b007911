//! ComfyUI CLI クライアント
//!
//! # 責務
//!
//! - `comfy` コマンド（comfy-cli）でワークフローを非対話モードで実行する
//! - [`WorkflowEngine`] トレイトを実装する
//!
//! # 呼び出し形式
//!
//! ```text
//! comfy --skip-prompt --no-enable-telemetry run --workflow <file> --timeout 600
//! ```
//!
//! `--timeout` は CLI 側の待ち時間です。加えてこちらでも同じ上限で
//! プロセス全体を打ち切ります（`kill_on_drop` により子プロセスも終了させます）。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::traits::{EngineOutput, WorkflowEngine};
use crate::error::EngineError;

/// デフォルトのCLIコマンド名
const DEFAULT_COMMAND: &str = "comfy";

/// デフォルトの実行上限
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// comfy-cli を使うワークフローエンジン
pub struct ComfyCliEngine {
    command: String,
    timeout: Duration,
}

impl ComfyCliEngine {
    /// 新しいクライアントを生成
    pub fn new() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// カスタムコマンド名を指定
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// 実行上限を指定
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, workflow_file: &Path) -> Command {
        let mut command = Command::new(&self.command);
        command
            .arg("--skip-prompt")
            .arg("--no-enable-telemetry")
            .arg("run")
            .arg("--workflow")
            .arg(workflow_file)
            .arg("--timeout")
            .arg(self.timeout.as_secs().to_string())
            .kill_on_drop(true);
        command
    }
}

impl Default for ComfyCliEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEngine for ComfyCliEngine {
    async fn run(&self, workflow_file: &Path) -> Result<EngineOutput, EngineError> {
        tracing::info!(
            command = %self.command,
            workflow = %workflow_file.display(),
            timeout_secs = self.timeout.as_secs(),
            "running workflow"
        );

        let output = self.build_command(workflow_file).output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|source| EngineError::Spawn {
                command: self.command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        // 出力は人間向けログなので、UTF-8 でない部分は置換して扱う
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(EngineError::ExitStatus {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(EngineOutput { stdout, stderr })
    }
}

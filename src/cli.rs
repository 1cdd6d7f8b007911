//! コマンドライン引数
//!
//! # 責務
//!
//! CI ジョブから渡される引数を [`Cli`] として受け取り、
//! [`RunContext`] とワークフロー名のリストに変換します。
//!
//! 引数名は GitHub Action 側の呼び出しと揃えています（`--gsc-bucket-name` 等）。

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::{RunContext, RunnerSettings};

/// ComfyUI の CI ランナー
#[derive(Debug, Clone, Parser)]
#[command(name = "comfy-ci-runner", version)]
#[command(about = "Run ComfyUI workflows, upload their outputs and report each run", long_about = None)]
pub struct Cli {
    /// Tracking API endpoint
    #[arg(long)]
    pub api_endpoint: String,

    /// Comma separated list of workflow file names
    #[arg(long, default_value = "")]
    pub comfy_workflow_names: String,

    /// GitHub Actions workflow name
    #[arg(long)]
    pub github_action_workflow_name: String,

    /// Operating system
    #[arg(long)]
    pub os: String,

    /// GitHub run ID
    #[arg(long)]
    pub run_id: String,

    /// GitHub job ID
    #[arg(long, default_value = "")]
    pub job_id: String,

    /// User who triggered the job
    #[arg(long, default_value = "")]
    pub job_trigger_user: String,

    /// Flags the engine was started with
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub comfy_run_flags: String,

    /// GitHub repository (`owner/name`)
    #[arg(long)]
    pub repo: String,

    /// CUDA version
    #[arg(long)]
    pub cuda_version: String,

    /// Python version
    #[arg(long)]
    pub python_version: String,

    /// PyTorch version
    #[arg(long, default_value = "")]
    pub torch_version: String,

    /// Commit hash
    #[arg(long, default_value = "")]
    pub commit_hash: String,

    /// Commit time
    #[arg(long, default_value = "")]
    pub commit_time: String,

    /// Commit message
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub commit_message: String,

    /// Branch name (`<number>/merge` for pull requests)
    #[arg(long, default_value = "")]
    pub branch_name: String,

    /// Bucket the outputs and logs are uploaded to
    #[arg(long)]
    pub gsc_bucket_name: String,

    /// Engine workspace (the directory containing `output/`)
    #[arg(long)]
    pub workspace_path: PathBuf,

    /// Action checkout; a relative workflows directory is resolved against it
    #[arg(long)]
    pub action_path: Option<PathBuf>,

    /// Prefix of the files the engine writes
    #[arg(long, default_value = "ComfyUI")]
    pub output_file_prefix: String,

    /// Optional runner settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// 実行コンテキストを組み立てる
    pub fn to_context(&self, settings: &RunnerSettings) -> RunContext {
        RunContext {
            repo: self.repo.clone(),
            job_id: self.job_id.clone(),
            run_id: self.run_id.clone(),
            job_trigger_user: self.job_trigger_user.clone(),
            action_workflow_name: self.github_action_workflow_name.clone(),
            commit_hash: self.commit_hash.clone(),
            commit_time: self.commit_time.clone(),
            commit_message: self.commit_message.clone(),
            branch_name: self.branch_name.clone(),
            os: self.os.clone(),
            cuda_version: self.cuda_version.clone(),
            python_version: self.python_version.clone(),
            torch_version: self.torch_version.clone(),
            engine_run_flags: self.comfy_run_flags.clone(),
            bucket_name: self.gsc_bucket_name.clone(),
            api_endpoint: self.api_endpoint.clone(),
            api_timeout: settings.telemetry.timeout,
            workspace_path: self.workspace_path.clone(),
            output_file_prefix: self.output_file_prefix.clone(),
        }
    }

    /// ワークフロー名のリスト（カンマ区切り、空要素は除外）
    pub fn workflow_names(&self) -> Vec<String> {
        self.comfy_workflow_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// ワークフローファイルを探すディレクトリ
    pub fn workflows_dir(&self, settings: &RunnerSettings) -> PathBuf {
        resolve_workflows_dir(self.action_path.as_deref(), &settings.engine.workflows_dir)
    }
}

fn resolve_workflows_dir(action_path: Option<&Path>, workflows_dir: &Path) -> PathBuf {
    match action_path {
        Some(base) if workflows_dir.is_relative() => base.join(workflows_dir),
        _ => workflows_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "comfy-ci-runner",
        "--api-endpoint",
        "https://api.example.com/upload-artifact",
        "--github-action-workflow-name",
        "Nightly Test",
        "--os",
        "linux",
        "--run-id",
        "42",
        "--repo",
        "comfyanonymous/ComfyUI",
        "--cuda-version",
        "12.1",
        "--python-version",
        "3.10",
        "--gsc-bucket-name",
        "comfy-ci-results",
        "--workspace-path",
        "/tmp/ComfyUI",
    ];

    fn parse(extra: &[&str]) -> Cli {
        let args: Vec<&str> = REQUIRED.iter().chain(extra.iter()).copied().collect();
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_required_arguments() {
        let cli = parse(&[]);
        assert_eq!(cli.run_id, "42");
        assert_eq!(cli.output_file_prefix, "ComfyUI");
        assert!(cli.config.is_none());
        assert!(cli.workflow_names().is_empty());
    }

    #[test]
    fn test_missing_required_argument_is_rejected() {
        let result = Cli::try_parse_from(["comfy-ci-runner", "--os", "linux"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_workflow_names_are_split_and_trimmed() {
        let cli = parse(&["--comfy-workflow-names", "default.json, sdxl.json,,  "]);
        assert_eq!(cli.workflow_names(), vec!["default.json", "sdxl.json"]);
    }

    #[test]
    fn test_run_flags_may_start_with_hyphen() {
        let cli = parse(&["--comfy-run-flags", "--force-fp16"]);
        assert_eq!(cli.comfy_run_flags, "--force-fp16");
    }

    #[test]
    fn test_context_uses_telemetry_timeout() {
        let cli = parse(&["--branch-name", "1234/merge"]);
        let ctx = cli.to_context(&RunnerSettings::default());

        assert_eq!(ctx.api_timeout.as_secs(), 300);
        assert_eq!(ctx.bucket_name, "comfy-ci-results");
        assert_eq!(ctx.action_workflow_name, "Nightly Test");
        assert_eq!(ctx.pr_number(), Some("1234"));
    }

    #[test]
    fn test_workflows_dir_resolution() {
        let relative = Path::new("workflows");
        assert_eq!(
            resolve_workflows_dir(Some(Path::new("/action")), relative),
            PathBuf::from("/action/workflows")
        );
        assert_eq!(resolve_workflows_dir(None, relative), PathBuf::from("workflows"));
        assert_eq!(
            resolve_workflows_dir(Some(Path::new("/action")), Path::new("/abs/wf")),
            PathBuf::from("/abs/wf")
        );
    }
}

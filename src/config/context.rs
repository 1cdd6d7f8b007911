//! 実行コンテキスト
//!
//! # 責務
//!
//! CI ジョブから渡されるリポジトリ・コミット・実行環境の情報を [`RunContext`] として保持します。
//! プロセス起動時に1度だけ生成され、以降は読み取り専用で各テレメトリー送信に渡されます。

use std::path::PathBuf;
use std::time::Duration;

/// CI 実行ごとに不変の情報
///
/// フィールドはすべて公開されていますが、生成後に変更されることはありません。
/// オーケストレーターとレポーターは `&RunContext` として共有します。
#[derive(Debug, Clone)]
pub struct RunContext {
    /// GitHub リポジトリ（`owner/name`）
    pub repo: String,
    /// ジョブID
    pub job_id: String,
    /// 実行ID
    pub run_id: String,
    /// ジョブを起動したユーザー
    pub job_trigger_user: String,
    /// GitHub Actions のワークフロー名
    pub action_workflow_name: String,

    /// コミットハッシュ
    pub commit_hash: String,
    /// コミット時刻
    pub commit_time: String,
    /// コミットメッセージ
    pub commit_message: String,
    /// ブランチ名（PR の場合は `<番号>/merge`）
    pub branch_name: String,

    /// OS 名
    pub os: String,
    /// CUDA バージョン
    pub cuda_version: String,
    /// Python バージョン
    pub python_version: String,
    /// PyTorch バージョン
    pub torch_version: String,
    /// エンジン起動時のフラグ
    pub engine_run_flags: String,

    /// 成果物のアップロード先バケット
    pub bucket_name: String,
    /// トラッキングAPI のエンドポイント
    pub api_endpoint: String,
    /// トラッキングAPI のタイムアウト
    pub api_timeout: Duration,

    /// エンジンのワークスペース（出力ディレクトリ `output/` を含む）
    pub workspace_path: PathBuf,
    /// エンジンが出力するファイル名の接頭辞
    pub output_file_prefix: String,
}

impl RunContext {
    /// ブランチ名から PR 番号を取り出す
    ///
    /// `<数字>/merge` の形式の場合のみ `Some` を返します。
    ///
    /// # 例
    ///
    /// ```rust
    /// # use comfy_ci_runner::config::RunContext;
    /// # let mut ctx = RunContext::for_tests();
    /// ctx.branch_name = "1234/merge".to_string();
    /// assert_eq!(ctx.pr_number(), Some("1234"));
    ///
    /// ctx.branch_name = "main".to_string();
    /// assert_eq!(ctx.pr_number(), None);
    /// ```
    pub fn pr_number(&self) -> Option<&str> {
        let number = self.branch_name.strip_suffix("/merge")?;
        if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
            Some(number)
        } else {
            None
        }
    }

    /// エンジンの出力ディレクトリ
    pub fn output_dir(&self) -> PathBuf {
        self.workspace_path.join("output")
    }

    /// テスト用のコンテキストを生成
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Self {
            repo: "comfyanonymous/ComfyUI".to_string(),
            job_id: "job-1".to_string(),
            run_id: "42".to_string(),
            job_trigger_user: "octocat".to_string(),
            action_workflow_name: "Nightly Test".to_string(),
            commit_hash: "abc123".to_string(),
            commit_time: "2024-01-01T00:00:00Z".to_string(),
            commit_message: "Fix sampler".to_string(),
            branch_name: "master".to_string(),
            os: "linux".to_string(),
            cuda_version: "12.1".to_string(),
            python_version: "3.10".to_string(),
            torch_version: "2.3.0".to_string(),
            engine_run_flags: "--force-fp16".to_string(),
            bucket_name: "comfy-ci-results".to_string(),
            api_endpoint: "http://localhost:8080/upload-artifact".to_string(),
            api_timeout: Duration::from_secs(300),
            workspace_path: PathBuf::from("/tmp/ComfyUI"),
            output_file_prefix: "ComfyUI".to_string(),
        }
    }
}

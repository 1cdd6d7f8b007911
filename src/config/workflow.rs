//! ワークフロータスクの定義
//!
//! # 責務
//!
//! - カンマ区切りで渡されたワークフロー名から、実行単位の [`WorkflowTask`] を組み立てる
//! - 成果物・ログのストレージパスを決定的に導出する（[`make_storage_safe`]）
//! - 出力ログから成果物が見つからない場合の、連番付きフォールバックファイル名を決める
//!
//! ## パスの構成
//!
//! ```text
//! output-files/<action>-<os>-<python>-<cuda>-<workflow>-run-<run_id>
//! logs/<action>-<os>-<python>-<cuda>-<workflow>-run-<run_id>
//! ```
//!
//! いずれも [`make_storage_safe`] で正規化されます。

use std::path::{Path, PathBuf};

use super::context::RunContext;

const ARTIFACT_ROOT: &str = "output-files";
const LOG_ROOT: &str = "logs";

/// ストレージ上で安全に使える文字列に変換する
///
/// - 空白はアンダースコアに置換
/// - `[A-Za-z0-9_.-/]` 以外の文字は削除（置換ではない）
///
/// 変換結果を再度変換しても値は変わりません。
///
/// # 例
///
/// ```rust
/// use comfy_ci_runner::config::make_storage_safe;
///
/// assert_eq!(make_storage_safe("Nightly Test (GPU)"), "Nightly_Test_GPU");
/// assert_eq!(make_storage_safe("output-files/a b.json"), "output-files/a_b.json");
/// ```
pub fn make_storage_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'))
        .collect()
}

/// 1回のワークフロー実行を表すタスク
///
/// 設定されたワークフローリストの各要素につき1つ生成され、1度だけ消費されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTask {
    /// ワークフローファイル名（例: `default.json`）
    pub name: String,
    /// リスト内での位置（1始まり）。フォールバックファイルの連番に使う
    pub index: usize,
    /// エンジンに渡すワークフローファイルのパス
    pub workflow_file: PathBuf,
    /// 成果物のストレージパス
    pub artifact_path: String,
    /// エンジンログのストレージパス
    pub log_path: String,
}

impl WorkflowTask {
    /// 単一のタスクを生成
    pub fn new(name: &str, index: usize, context: &RunContext, workflows_dir: &Path) -> Self {
        let key = format!(
            "{}-{}-{}-{}-{}-run-{}",
            context.action_workflow_name,
            context.os,
            context.python_version,
            context.cuda_version,
            name,
            context.run_id,
        );

        Self {
            name: name.to_string(),
            index,
            workflow_file: workflows_dir.join(name),
            artifact_path: make_storage_safe(&format!("{}/{}", ARTIFACT_ROOT, key)),
            log_path: make_storage_safe(&format!("{}/{}", LOG_ROOT, key)),
        }
    }

    /// ワークフロー名のリストからタスク列を組み立てる
    ///
    /// 空白のみの要素は無視されます。空のリストからは空のタスク列が返ります。
    pub fn plan<S: AsRef<str>>(
        names: &[S],
        context: &RunContext,
        workflows_dir: &Path,
    ) -> Vec<WorkflowTask> {
        names
            .iter()
            .map(|n| n.as_ref().trim())
            .filter(|n| !n.is_empty())
            .enumerate()
            .map(|(i, name)| WorkflowTask::new(name, i + 1, context, workflows_dir))
            .collect()
    }

    /// 出力ログから成果物を特定できなかった場合に確認するファイル
    ///
    /// `<workspace>/output/<prefix>_<5桁連番>_.png`
    pub fn fallback_output(&self, context: &RunContext) -> PathBuf {
        context
            .output_dir()
            .join(format!("{}_{:05}_.png", context.output_file_prefix, self.index))
    }

    /// 成果物1件のオブジェクトキー
    pub fn artifact_key(&self, filename: &str) -> String {
        format!("{}/{}", self.artifact_path, make_storage_safe(filename))
    }

    /// エンジンログのローカルファイル名
    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.log_path.replace('/', "_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_become_underscores() {
        assert_eq!(make_storage_safe("a b  c"), "a_b__c");
    }

    #[test]
    fn test_disallowed_characters_are_removed() {
        assert_eq!(make_storage_safe("wf(1)!@#$%^&*.json"), "wf1.json");
        assert_eq!(make_storage_safe("日本語-flow"), "-flow");
        assert_eq!(make_storage_safe("a\tb\nc"), "abc");
    }

    #[test]
    fn test_allowed_characters_survive() {
        let raw = "Aa09_.-/";
        assert_eq!(make_storage_safe(raw), raw);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "",
            "plain",
            "Nightly Test (3.10)",
            "output-files/x y/z?.png",
            "  leading and trailing  ",
            "ユニコード と spaces",
            "semi;colon:and|pipe",
        ];

        for raw in samples {
            let once = make_storage_safe(raw);
            assert_eq!(make_storage_safe(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_task_paths_are_derived_from_context() {
        let ctx = RunContext::for_tests();
        let task = WorkflowTask::new("sd 1.5.json", 1, &ctx, Path::new("workflows"));

        assert_eq!(task.workflow_file, PathBuf::from("workflows/sd 1.5.json"));
        assert_eq!(
            task.artifact_path,
            "output-files/Nightly_Test-linux-3.10-12.1-sd_1.5.json-run-42"
        );
        assert_eq!(
            task.log_path,
            "logs/Nightly_Test-linux-3.10-12.1-sd_1.5.json-run-42"
        );
    }

    #[test]
    fn test_plan_skips_blank_entries_and_numbers_from_one() {
        let ctx = RunContext::for_tests();
        let tasks = WorkflowTask::plan(&["a.json", " ", "b.json "], &ctx, Path::new("wf"));

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, "a.json");
        assert_eq!(tasks[0].index, 1);
        assert_eq!(tasks[1].name, "b.json");
        assert_eq!(tasks[1].index, 2);
    }

    #[test]
    fn test_plan_of_empty_list_is_empty() {
        let ctx = RunContext::for_tests();
        let names: [&str; 0] = [];
        assert!(WorkflowTask::plan(&names, &ctx, Path::new("wf")).is_empty());
    }

    #[test]
    fn test_fallback_output_is_zero_padded() {
        let ctx = RunContext::for_tests();
        let task = WorkflowTask::new("a.json", 3, &ctx, Path::new("wf"));

        assert_eq!(
            task.fallback_output(&ctx),
            PathBuf::from("/tmp/ComfyUI/output/ComfyUI_00003_.png")
        );
    }

    #[test]
    fn test_artifact_key_sanitizes_filename() {
        let ctx = RunContext::for_tests();
        let task = WorkflowTask::new("a.json", 1, &ctx, Path::new("wf"));

        assert_eq!(
            task.artifact_key("my image (1).png"),
            format!("{}/my_image_1.png", task.artifact_path)
        );
    }
}

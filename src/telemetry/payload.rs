//! テレメトリーペイロードの組み立て
//!
//! # 責務
//!
//! [`RunContext`]（CI 情報）、[`RunResult`]（実行ごとの結果）、[`MachineProfile`]
//! （ホスト情報）を1つの JSON オブジェクトにまとめます。
//!
//! フィールド名はトラッキングAPI側のスキーマに合わせています。
//! 時系列は `"<経過秒>s"` をキーとしたマップとして、記録順のまま出力されます。
//!
//! ```json
//! {
//!   "repo": "comfyanonymous/ComfyUI",
//!   "status": "WorkflowRunStatusCompleted",
//!   "avg_vram": 2048,
//!   "peak_vram": 4096,
//!   "machine_stats": {
//!     "gpu_type": "Tesla T4, 15360 MiB",
//!     "vram_time_series": {
//!       "0.5s": { "elapsed_half_seconds": 1, "vram_used_mib": 2048.0, ... },
//!       "1s":   { "elapsed_half_seconds": 2, "vram_used_mib": 4096.0, ... }
//!     }
//!   }
//! }
//! ```

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use super::profile::{MachineProfile, format_bytes};
use super::sampler::SampleTick;
use crate::config::RunContext;
use crate::engine::result::{RunResult, RunStatus};

/// トラッキングAPIに送信する1回分のペイロード
#[derive(Debug, Serialize)]
pub struct RunPayload<'a> {
    pub repo: &'a str,
    pub job_id: &'a str,
    pub run_id: &'a str,
    pub os: &'a str,
    pub cuda_version: &'a str,
    pub bucket_name: &'a str,
    pub output_files_gcs_paths: String,
    pub comfy_logs_gcs_path: Option<&'a str>,
    pub commit_hash: &'a str,
    pub commit_time: &'a str,
    pub commit_message: &'a str,
    pub workflow_name: &'a str,
    pub branch_name: &'a str,
    pub start_time: u64,
    pub end_time: u64,
    pub pr_number: Option<&'a str>,
    pub job_trigger_user: &'a str,
    pub comfy_run_flags: &'a str,
    pub python_version: &'a str,
    pub torch_version: &'a str,
    pub status: RunStatus,
    pub avg_vram: i64,
    pub peak_vram: i64,
    pub machine_stats: MachineStats<'a>,
}

/// ペイロード内のホスト情報
#[derive(Debug, Serialize)]
pub struct MachineStats<'a> {
    pub machine_name: &'a str,
    pub os_version: &'a str,
    pub gpu_type: String,
    pub cpu_capacity: String,
    pub initial_cpu: String,
    pub memory_capacity: String,
    pub initial_ram: String,
    pub vram_time_series: SampleSeries<'a>,
    pub disk_capacity: String,
    pub initial_disk: String,
    pub pip_freeze: &'a str,
}

/// 時系列を「経過時間ラベル → 計測値」のマップとして出力するラッパー
#[derive(Debug)]
pub struct SampleSeries<'a>(pub &'a [SampleTick]);

impl Serialize for SampleSeries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for tick in self.0 {
            map.serialize_entry(&tick.elapsed_label(), tick)?;
        }
        map.end()
    }
}

impl<'a> RunPayload<'a> {
    /// ペイロードを組み立てる
    ///
    /// # 引数
    ///
    /// - `context`: CI 情報
    /// - `workflow_name`: ワークフロー名
    /// - `run`: 実行結果（ステータス、時刻、成果物、時系列）
    /// - `log_path`: アップロード済みのエンジンログのパス（無ければ `None`）
    /// - `profile`: ホスト情報
    pub fn new(
        context: &'a RunContext,
        workflow_name: &'a str,
        run: &'a RunResult,
        log_path: Option<&'a str>,
        profile: &'a MachineProfile,
    ) -> Self {
        Self {
            repo: &context.repo,
            job_id: &context.job_id,
            run_id: &context.run_id,
            os: &context.os,
            cuda_version: &context.cuda_version,
            bucket_name: &context.bucket_name,
            output_files_gcs_paths: run.artifact_paths(),
            comfy_logs_gcs_path: log_path,
            commit_hash: &context.commit_hash,
            commit_time: &context.commit_time,
            commit_message: &context.commit_message,
            workflow_name,
            branch_name: &context.branch_name,
            start_time: run.start_time,
            end_time: run.end_time,
            pr_number: context.pr_number(),
            job_trigger_user: &context.job_trigger_user,
            comfy_run_flags: &context.engine_run_flags,
            python_version: &context.python_version,
            torch_version: &context.torch_version,
            status: run.status,
            avg_vram: run.vram.average.round() as i64,
            peak_vram: run.vram.peak.round() as i64,
            machine_stats: MachineStats::new(profile, &run.samples),
        }
    }

    /// JSON 文字列に変換
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<'a> MachineStats<'a> {
    fn new(profile: &'a MachineProfile, samples: &'a [SampleTick]) -> Self {
        Self {
            machine_name: &profile.host_name,
            os_version: &profile.os_version,
            gpu_type: profile.gpu_description(),
            cpu_capacity: profile.cpu_description(),
            initial_cpu: format!("{:.1}% used", profile.initial_cpu_percent),
            memory_capacity: format_bytes(profile.total_memory_bytes),
            initial_ram: format_bytes(profile.available_memory_bytes),
            vram_time_series: SampleSeries(samples),
            disk_capacity: format_bytes(profile.total_disk_bytes),
            initial_disk: format_bytes(profile.available_disk_bytes),
            pip_freeze: &profile.package_manifest,
        }
    }
}

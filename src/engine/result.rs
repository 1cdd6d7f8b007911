//! ワークフロー実行結果の型定義
//!
//! # 責務
//!
//! - 実行ステータス [`RunStatus`]（`Started` / `Completed` / `Failed`）とその送信形式
//! - 1回の実行の記録 [`RunResult`]
//!
//! # ライフサイクル
//!
//! ```text
//! RunResult::started()  ── complete() ──▶ Completed
//!                       └─ fail()     ──▶ Failed
//! ```
//!
//! `complete` / `fail` は `self` を消費するため、終了状態への遷移は型レベルで1度きりです。
//! 送信後の結果は破棄され、ワークフローをまたいで保持されることはありません。

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::telemetry::sampler::{SampleTick, VramSummary};

/// 実行ステータス
///
/// トラッキングAPI上の列挙値に対応します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// 実行開始
    #[serde(rename = "WorkflowRunStatusStarted")]
    Started,
    /// 正常終了
    #[serde(rename = "WorkflowRunStatusCompleted")]
    Completed,
    /// 失敗
    #[serde(rename = "WorkflowRunStatusFailed")]
    Failed,
}

impl RunStatus {
    /// 送信時の文字列表現
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "WorkflowRunStatusStarted",
            RunStatus::Completed => "WorkflowRunStatusCompleted",
            RunStatus::Failed => "WorkflowRunStatusFailed",
        }
    }

    /// 終了状態かどうか
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

/// 1回のワークフロー実行の記録
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// ステータス
    pub status: RunStatus,
    /// 開始時刻（UNIX 秒）
    pub start_time: u64,
    /// 終了時刻（UNIX 秒）。`Started` の間は `0`
    pub end_time: u64,
    /// アップロードした成果物のオブジェクトキー
    pub artifacts: Vec<String>,
    /// VRAM 集計値
    pub vram: VramSummary,
    /// 計測した時系列
    pub samples: Vec<SampleTick>,
}

impl RunResult {
    /// 現在時刻で `Started` 状態の記録を生成
    pub fn started() -> Self {
        Self::started_at(epoch_seconds())
    }

    /// 指定した開始時刻で `Started` 状態の記録を生成
    pub fn started_at(start_time: u64) -> Self {
        Self {
            status: RunStatus::Started,
            start_time,
            end_time: 0,
            artifacts: Vec::new(),
            vram: VramSummary::from_samples(&[]),
            samples: Vec::new(),
        }
    }

    /// `Completed` に遷移
    ///
    /// `end_time` はエンジンが終了した時刻です。アップロードにかかった時間は含めません。
    pub fn complete(
        self,
        end_time: u64,
        samples: Vec<SampleTick>,
        artifacts: Vec<String>,
    ) -> Self {
        self.finish(RunStatus::Completed, end_time, samples, artifacts)
    }

    /// `Failed` に遷移（それまでに収集できた時系列を保持する）
    pub fn fail(self, end_time: u64, samples: Vec<SampleTick>) -> Self {
        self.finish(RunStatus::Failed, end_time, samples, Vec::new())
    }

    fn finish(
        self,
        status: RunStatus,
        end_time: u64,
        samples: Vec<SampleTick>,
        artifacts: Vec<String>,
    ) -> Self {
        debug_assert_eq!(self.status, RunStatus::Started);

        Self {
            status,
            start_time: self.start_time,
            end_time: end_time.max(self.start_time),
            artifacts,
            vram: VramSummary::from_samples(&samples),
            samples,
        }
    }

    /// 成果物のパスをカンマ区切りで返す（送信形式）
    pub fn artifact_paths(&self) -> String {
        self.artifacts.join(",")
    }
}

/// 現在の UNIX 時刻（秒）
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

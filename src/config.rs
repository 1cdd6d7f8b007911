//! 実行設定
//!
//! # 責務
//!
//! - ランナーのチューニング値（エンジンコマンド、タイムアウト、ログ出力先等）を TOML から読み込む
//! - CI から渡される実行情報を不変の [`RunContext`] として保持する
//! - ワークフロー名のリストから [`WorkflowTask`] を組み立て、ストレージ上のパスを決定する
//!
//! # モジュール構成
//!
//! - `dto` - TOML デシリアライズ専用の DTO（非公開）
//! - [`settings`][]: バリデーション済みのランナー設定
//! - [`context`][]: 実行ごとに不変の CI 情報
//! - [`workflow`][]: ワークフロータスクとストレージパスの導出

mod dto;
pub mod context;
pub mod settings;
pub mod workflow;

pub use context::RunContext;
pub use settings::{
    EngineSettings, LogFormat, LogSettings, ProbeSettings, RunnerSettings, StorageSettings,
    TelemetrySettings,
};
pub use workflow::{WorkflowTask, make_storage_safe};

//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - 外部エンジン（ComfyUI）を呼び出し、ワークフローを1つずつ実行する
//! - エンジンの出力ログから成果物のファイル名を特定する
//! - 実行中のリソース計測、成果物のアップロード、テレメトリー送信を順に制御する
//!
//! # モジュール構成
//!
//! - [`executor`][]: 一括実行のオーケストレーター
//! - [`traits`][]: エンジンの共通インターフェース
//! - [`comfy`][]: comfy-cli を使うエンジン実装
//! - [`output`][]: 出力ログの解析
//! - [`result`][]: 1回分の実行結果とステータス

pub mod comfy;
pub mod executor;
pub mod output;
pub mod result;
pub mod traits;

// 公開APIの再エクスポート
pub use comfy::ComfyCliEngine;
pub use executor::RunOrchestrator;
pub use output::parse_output_filenames;
pub use result::{RunResult, RunStatus};
pub use traits::{EngineOutput, WorkflowEngine};

//! ComfyUI の CI ランナー
//!
//! ワークフローを1つずつ ComfyUI で実行し、実行中のリソース使用量を計測し、
//! 成果物をオブジェクトストレージへアップロードして、実行ごとの結果をトラッキングAPIへ送信します。
//!
//! # モジュール構成
//!
//! - [`cli`][]: コマンドライン引数
//! - [`config`][]: ランナー設定・実行コンテキスト・ワークフロータスク
//! - [`engine`][]: エンジン呼び出しと実行オーケストレーション
//! - [`storage`][]: 成果物のアップロード
//! - [`telemetry`][]: ホスト情報・リソース計測・送信
//! - [`logging`][]: ランナー自身のログ出力
//! - [`error`][]: エラー型

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod storage;
pub mod telemetry;

pub use error::{ConfigError, EngineError, ReportError, RunError, StorageError};

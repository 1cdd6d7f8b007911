//! テレメトリー（ホスト情報・リソース計測・送信）
//!
//! # 責務
//!
//! - 起動時に1度だけホストの静的情報を取得する（[`profile`]）
//! - ワークフロー実行中にリソース使用量をバックグラウンドで計測する（[`sampler`], [`probe`]）
//! - 実行結果とホスト情報をまとめてトラッキングAPIへ送信する（[`payload`], [`reporter`]）
//!
//! # モジュール構成
//!
//! - [`gpu`][]: `nvidia-smi` による GPU 情報の取得
//! - [`probe`][]: 1ティック分の計測インターフェースと実環境用実装
//! - [`sampler`][]: 0.5秒周期のバックグラウンド計測と VRAM 集計
//! - [`profile`][]: ホストの静的情報
//! - [`payload`][]: 送信する JSON の組み立て
//! - [`reporter`][]: 再送付きの送信

pub mod gpu;
pub mod payload;
pub mod probe;
pub mod profile;
pub mod reporter;
pub mod sampler;

pub use probe::{ProbeFactory, ProbeReading, ResourceProbe, SystemProbe, SystemProbeFactory};
pub use profile::MachineProfile;
pub use reporter::{ApiResponse, HttpTrackingApi, TelemetryReporter, TrackingApi};
pub use sampler::{ResourceSampler, SampleTick, SamplerHandle, VramSummary};

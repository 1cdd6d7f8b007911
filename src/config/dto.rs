//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、ランナー設定ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//! すべてのフィールドは省略可能で、省略時は [`RunnerSettings`](super::settings::RunnerSettings)
//! 側のデフォルト値が使われます。
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! SettingsDto
//!   ↓ (TryFrom でバリデーション)
//! RunnerSettings (ドメインモデル)
//! ```
//!
//! ## 設定例
//!
//! ```toml
//! [engine]
//! command = "comfy"
//! timeout_secs = 600
//! workflows_dir = "workflows"
//! entry_script = "main.py"
//! log_dir = "logs"
//!
//! [probe]
//! gpu_command = "nvidia-smi"
//! package_list_command = "pip freeze"
//!
//! [telemetry]
//! timeout_secs = 300
//! retry_delay_secs = 10
//! response_log = "./application.log"
//!
//! [storage]
//! command = "gcloud"
//!
//! [logging]
//! format = "json"
//! directory = "runner-logs"
//! ```

use serde::Deserialize;

/// ランナー設定 DTO
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct SettingsDto {
    #[serde(default)]
    pub(super) engine: EngineDto,
    #[serde(default)]
    pub(super) probe: ProbeDto,
    #[serde(default)]
    pub(super) telemetry: TelemetryDto,
    #[serde(default)]
    pub(super) storage: StorageDto,
    #[serde(default)]
    pub(super) logging: LoggingDto,
}

/// `[engine]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct EngineDto {
    pub(super) command: Option<String>,
    pub(super) timeout_secs: Option<u64>,
    pub(super) workflows_dir: Option<String>,
    pub(super) entry_script: Option<String>,
    pub(super) log_dir: Option<String>,
}

/// `[probe]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ProbeDto {
    pub(super) gpu_command: Option<String>,
    pub(super) package_list_command: Option<String>,
}

/// `[telemetry]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct TelemetryDto {
    pub(super) timeout_secs: Option<u64>,
    pub(super) retry_delay_secs: Option<u64>,
    pub(super) response_log: Option<String>,
}

/// `[storage]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct StorageDto {
    pub(super) command: Option<String>,
}

/// `[logging]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct LoggingDto {
    pub(super) format: Option<String>,
    pub(super) directory: Option<String>,
    pub(super) filter: Option<String>,
}

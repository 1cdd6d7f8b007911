//! ランナー設定（ドメインモデル）
//!
//! # 責務
//!
//! TOML ファイル（省略可能）から読み込んだ [`SettingsDto`] をバリデーションし、
//! デフォルト値を補った [`RunnerSettings`] を提供します。
//!
//! 設定ファイルを指定しない場合は [`RunnerSettings::default`] がそのまま使われます。

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::dto::{EngineDto, LoggingDto, ProbeDto, SettingsDto, StorageDto, TelemetryDto};
use crate::error::ConfigError;

const DEFAULT_ENGINE_COMMAND: &str = "comfy";
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_WORKFLOWS_DIR: &str = "workflows";
const DEFAULT_ENTRY_SCRIPT: &str = "main.py";
const DEFAULT_ENGINE_LOG_DIR: &str = "logs";

const DEFAULT_GPU_COMMAND: &str = "nvidia-smi";
const DEFAULT_PACKAGE_LIST_COMMAND: &str = "pip freeze";

const DEFAULT_TELEMETRY_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
const DEFAULT_RESPONSE_LOG: &str = "./application.log";

const DEFAULT_STORAGE_COMMAND: &str = "gcloud";

const DEFAULT_LOG_FILTER: &str = "info";

/// ランナー全体の設定
#[derive(Debug, Clone, Default)]
pub struct RunnerSettings {
    /// ワークフローエンジン関連
    pub engine: EngineSettings,
    /// ホスト情報・リソース計測関連
    pub probe: ProbeSettings,
    /// トラッキングAPI関連
    pub telemetry: TelemetrySettings,
    /// オブジェクトストレージ関連
    pub storage: StorageSettings,
    /// ランナー自身のログ出力
    pub logging: LogSettings,
}

impl RunnerSettings {
    /// TOML ファイルから設定を読み込む
    ///
    /// # 戻り値
    ///
    /// * `Ok(RunnerSettings)` - 読み込みとバリデーションに成功した場合
    /// * `Err(ConfigError)` - ファイルの読み込み、パース、バリデーションのいずれかに失敗した場合
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: SettingsDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }
}

/// ワークフローエンジンの起動設定
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// エンジンCLIのコマンド名
    pub command: String,
    /// 1ワークフローあたりの実行上限
    pub timeout: Duration,
    /// ワークフローファイルを置くディレクトリ
    pub workflows_dir: PathBuf,
    /// RSS 計測対象プロセスを特定するためのエントリスクリプト名
    pub entry_script: String,
    /// エンジンの標準出力を書き出すローカルディレクトリ
    pub log_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
            workflows_dir: PathBuf::from(DEFAULT_WORKFLOWS_DIR),
            entry_script: DEFAULT_ENTRY_SCRIPT.to_string(),
            log_dir: PathBuf::from(DEFAULT_ENGINE_LOG_DIR),
        }
    }
}

/// ホスト情報取得に使う外部コマンド
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// GPU 情報の取得コマンド
    pub gpu_command: String,
    /// インストール済みパッケージ一覧の取得コマンド（プログラム名 + 引数）
    pub package_list_command: Vec<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            gpu_command: DEFAULT_GPU_COMMAND.to_string(),
            package_list_command: split_command(DEFAULT_PACKAGE_LIST_COMMAND),
        }
    }
}

/// トラッキングAPIへの送信設定
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// 1リクエストあたりのタイムアウト
    pub timeout: Duration,
    /// 失敗時、再送までの待機時間
    pub retry_delay: Duration,
    /// 最新のレスポンスを上書き保存するファイル
    pub response_log: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TELEMETRY_TIMEOUT_SECS),
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            response_log: PathBuf::from(DEFAULT_RESPONSE_LOG),
        }
    }
}

/// オブジェクトストレージの設定
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// ストレージCLIのコマンド名
    pub command: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_STORAGE_COMMAND.to_string(),
        }
    }
}

/// ログの出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 人間向けのテキスト形式
    #[default]
    Text,
    /// 1行1イベントの JSON 形式
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Validation(format!(
                "不明なログ形式です: '{}'（text または json）",
                other
            ))),
        }
    }
}

/// ランナー自身のログ出力設定
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// 出力形式
    pub format: LogFormat,
    /// ローテーションするログファイルの出力先（`None` なら標準出力のみ）
    pub directory: Option<PathBuf>,
    /// `RUST_LOG` が未設定のときに使うフィルター
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            directory: None,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn non_empty(field: &str, value: Option<String>, default: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::Validation(format!(
            "{} は空にできません",
            field
        ))),
        Some(v) => Ok(v.trim().to_string()),
        None => Ok(default.to_string()),
    }
}

fn positive_secs(field: &str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Validation(format!(
            "{} は1以上を指定してください",
            field
        ))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(Duration::from_secs(default)),
    }
}

impl TryFrom<EngineDto> for EngineSettings {
    type Error = ConfigError;

    fn try_from(dto: EngineDto) -> Result<Self, Self::Error> {
        Ok(Self {
            command: non_empty("engine.command", dto.command, DEFAULT_ENGINE_COMMAND)?,
            timeout: positive_secs("engine.timeout_secs", dto.timeout_secs, DEFAULT_ENGINE_TIMEOUT_SECS)?,
            workflows_dir: PathBuf::from(non_empty(
                "engine.workflows_dir",
                dto.workflows_dir,
                DEFAULT_WORKFLOWS_DIR,
            )?),
            entry_script: non_empty("engine.entry_script", dto.entry_script, DEFAULT_ENTRY_SCRIPT)?,
            log_dir: PathBuf::from(non_empty("engine.log_dir", dto.log_dir, DEFAULT_ENGINE_LOG_DIR)?),
        })
    }
}

impl TryFrom<ProbeDto> for ProbeSettings {
    type Error = ConfigError;

    fn try_from(dto: ProbeDto) -> Result<Self, Self::Error> {
        let package_list = non_empty(
            "probe.package_list_command",
            dto.package_list_command,
            DEFAULT_PACKAGE_LIST_COMMAND,
        )?;

        Ok(Self {
            gpu_command: non_empty("probe.gpu_command", dto.gpu_command, DEFAULT_GPU_COMMAND)?,
            package_list_command: split_command(&package_list),
        })
    }
}

impl TryFrom<TelemetryDto> for TelemetrySettings {
    type Error = ConfigError;

    fn try_from(dto: TelemetryDto) -> Result<Self, Self::Error> {
        Ok(Self {
            timeout: positive_secs(
                "telemetry.timeout_secs",
                dto.timeout_secs,
                DEFAULT_TELEMETRY_TIMEOUT_SECS,
            )?,
            // 0 秒の待機は許容する（ローカル検証用）
            retry_delay: Duration::from_secs(dto.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)),
            response_log: PathBuf::from(non_empty(
                "telemetry.response_log",
                dto.response_log,
                DEFAULT_RESPONSE_LOG,
            )?),
        })
    }
}

impl TryFrom<StorageDto> for StorageSettings {
    type Error = ConfigError;

    fn try_from(dto: StorageDto) -> Result<Self, Self::Error> {
        Ok(Self {
            command: non_empty("storage.command", dto.command, DEFAULT_STORAGE_COMMAND)?,
        })
    }
}

impl TryFrom<LoggingDto> for LogSettings {
    type Error = ConfigError;

    fn try_from(dto: LoggingDto) -> Result<Self, Self::Error> {
        let format = match dto.format {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            format,
            directory: dto.directory.filter(|d| !d.trim().is_empty()).map(PathBuf::from),
            filter: non_empty("logging.filter", dto.filter, DEFAULT_LOG_FILTER)?,
        })
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// 各セクションを順にバリデーションし、最初に見つかった不備を
/// [`ConfigError::Validation`] として返します。
impl TryFrom<SettingsDto> for RunnerSettings {
    type Error = ConfigError;

    fn try_from(dto: SettingsDto) -> Result<Self, Self::Error> {
        Ok(Self {
            engine: dto.engine.try_into()?,
            probe: dto.probe.try_into()?,
            telemetry: dto.telemetry.try_into()?,
            storage: dto.storage.try_into()?,
            logging: dto.logging.try_into()?,
        })
    }
}

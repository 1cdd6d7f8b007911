//! エラー型の定義
//!
//! このモジュールは、Comfy CI Runner 全体で使用されるエラー型を定義します。
//!
//! # 分類
//!
//! - [`ConfigError`] - 設定の読み込み・バリデーション
//! - [`EngineError`] - ワークフローエンジン（外部CLI）の実行失敗
//! - [`StorageError`] - オブジェクトストレージへのアップロード失敗
//! - [`ReportError`] - トラッキングAPIへのテレメトリー送信失敗
//! - [`RunError`] - オーケストレーターが呼び出し元へ返す致命的エラー
//!
//! ホスト情報の取得失敗（GPU検出、パッケージ一覧、プロセス検索）はエラー型を持ちません。
//! 取得側でプレースホルダー値に置き換えられ、呼び出し元へは伝播しません。

use thiserror::Error;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// ワークフローエンジン実行エラー
///
/// 外部エンジンは構造化された終了コードを返さないため、
/// 「起動できなかった」「非0で終了した」「時間内に終わらなかった」の3種類のみを区別します。
#[derive(Debug, Error)]
pub enum EngineError {
    /// コマンドの起動に失敗（未インストール等）
    #[error("エンジンコマンド '{command}' の起動に失敗しました: {source}")]
    Spawn {
        /// 実行しようとしたコマンド名
        command: String,
        /// 元のIOエラー
        #[source]
        source: std::io::Error,
    },

    /// 非0の終了コード
    #[error("エンジンが終了コード {code:?} で失敗しました")]
    ExitStatus {
        /// 終了コード（シグナル終了時は `None`）
        code: Option<i32>,
        /// 標準出力
        stdout: String,
        /// 標準エラー出力
        stderr: String,
    },

    /// タイムアウト
    #[error("エンジンが {secs}秒以内に完了しませんでした")]
    Timeout {
        /// タイムアウト時間（秒）
        secs: u64,
    },
}

/// オブジェクトストレージエラー
#[derive(Debug, Error)]
pub enum StorageError {
    /// アップロード対象のローカルファイルが存在しない
    #[error("アップロード対象のファイルが見つかりません: {0}")]
    MissingFile(String),

    /// ストレージCLIの起動に失敗
    #[error("ストレージコマンド '{command}' の起動に失敗しました: {source}")]
    Spawn {
        /// 実行しようとしたコマンド名
        command: String,
        /// 元のIOエラー
        #[source]
        source: std::io::Error,
    },

    /// アップロード失敗
    #[error("'{destination}' へのアップロードに失敗しました: {stderr}")]
    UploadFailed {
        /// 送信先オブジェクトキー（`gs://bucket/key`）
        destination: String,
        /// CLIの標準エラー出力
        stderr: String,
    },
}

/// テレメトリー送信エラー
#[derive(Debug, Error)]
pub enum ReportError {
    /// ペイロードのシリアライズに失敗
    #[error("ペイロードのシリアライズに失敗しました: {0}")]
    Serialize(#[from] serde_json::Error),

    /// HTTP通信エラー（接続失敗、タイムアウト等）
    #[error("トラッキングAPIとの通信に失敗しました: {0}")]
    Http(String),

    /// リトライ後も成功しなかった
    #[error("トラッキングAPIへの送信が {attempts}回とも失敗しました（最終ステータス: {status:?}）")]
    DeliveryFailed {
        /// 最後に受け取ったHTTPステータス（通信エラー時は `None`）
        status: Option<u16>,
        /// 試行回数
        attempts: u32,
        /// 最後のレスポンスボディ
        body: String,
    },
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        ReportError::Http(err.to_string())
    }
}

/// ワークフロー実行の致命的エラー
///
/// いずれのバリアントもバッチ全体を中断させます。
/// オーケストレーターはこのエラーを返す前に `Failed` レポートの送信を試みます。
#[derive(Debug, Error)]
pub enum RunError {
    /// エンジン実行エラー（非0終了・タイムアウト）
    #[error("ワークフロー '{workflow}' の実行に失敗しました: {source}")]
    EngineExecution {
        /// ワークフロー名
        workflow: String,
        /// 元のエラー
        #[source]
        source: EngineError,
    },

    /// 出力ファイルが見つからない
    #[error("ワークフロー '{workflow}' の出力ファイルが見つかりません")]
    NoOutputDiscovered {
        /// ワークフロー名
        workflow: String,
    },

    /// アップロード失敗（リトライなし）
    #[error("成果物のアップロードに失敗しました: {0}")]
    StorageUpload(#[from] StorageError),

    /// テレメトリー送信失敗
    #[error("テレメトリーの送信に失敗しました: {0}")]
    TelemetryDelivery(#[from] ReportError),

    /// エンジンログの書き出し失敗
    #[error("エンジンログの書き出しに失敗しました: {0}")]
    Io(#[from] std::io::Error),
}

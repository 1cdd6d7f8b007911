//! Google Cloud Storage クライアント（CLI版）
//!
//! # 責務
//!
//! - `gcloud storage cp` を呼び出してファイルをアップロードする
//! - [`ObjectStore`] トレイトを実装する
//!
//! # CLIツール
//!
//! - **コマンド**: `gcloud`
//! - **認証**: CI 上でサービスアカウントを有効化済みであること
//!   （`gcloud auth activate-service-account` または Workload Identity）
//!
//! 認証情報はコード内で扱わず、CLIツールに委譲します。

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::ObjectStore;
use crate::error::StorageError;

/// デフォルトのCLIコマンド名
const DEFAULT_COMMAND: &str = "gcloud";

/// `gcloud` CLI を使うストレージクライアント
pub struct GcsCliStore {
    command: String,
}

impl GcsCliStore {
    /// 新しいクライアントを生成
    pub fn new() -> Self {
        Self::with_command(DEFAULT_COMMAND)
    }

    /// カスタムコマンド名を指定してクライアントを生成
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn object_url(bucket: &str, destination: &str) -> String {
        format!("gs://{}/{}", bucket, destination.trim_start_matches('/'))
    }
}

impl Default for GcsCliStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for GcsCliStore {
    async fn upload(
        &self,
        bucket: &str,
        destination: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let url = Self::object_url(bucket, destination);

        let output = Command::new(&self.command)
            .arg("storage")
            .arg("cp")
            .arg(local_path)
            .arg(&url)
            .output()
            .await
            .map_err(|source| StorageError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StorageError::UploadFailed {
                destination: url,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

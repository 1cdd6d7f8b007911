//! 成果物のアップロード
//!
//! # 責務
//!
//! - オブジェクトストレージの共通インターフェース [`ObjectStore`] を定義
//! - [`ArtifactPublisher`] でローカルファイルを決められたキーへアップロードする
//!
//! アップロードにはリトライがありません。失敗はそのまま [`StorageError`] として
//! 呼び出し側へ返します。
//!
//! # モジュール構成
//!
//! - [`gcs`][]: `gcloud storage cp` を呼び出す Google Cloud Storage 実装

pub mod gcs;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;

pub use gcs::GcsCliStore;

/// オブジェクトストレージの共通インターフェース
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// ローカルファイルを `bucket` の `destination` へアップロードする
    async fn upload(
        &self,
        bucket: &str,
        destination: &str,
        local_path: &Path,
    ) -> Result<(), StorageError>;
}

/// 成果物をストレージへ公開する
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactPublisher {
    /// 新しいパブリッシャーを生成
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// ファイルをアップロードする
    ///
    /// ローカルファイルが存在しない場合は、ストレージを呼び出さずに
    /// [`StorageError::MissingFile`] を返します。
    pub async fn publish(
        &self,
        bucket: &str,
        destination: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(StorageError::MissingFile(local_path.display().to_string()));
        }

        tracing::info!(
            bucket,
            destination,
            source = %local_path.display(),
            "uploading artifact"
        );
        self.store.upload(bucket, destination, local_path).await?;
        tracing::info!(bucket, destination, "artifact uploaded");

        Ok(())
    }
}

//! ワークフローエンジンの共通インターフェース定義
//!
//! # 責務
//!
//! - 外部ワークフローエンジンの呼び出しインターフェース [`WorkflowEngine`] を定義
//! - エンジンの出力 [`EngineOutput`] を定義
//!
//! エンジン自体はブラックボックスです。オーケストレーターが知っているのは
//! 「ワークフローファイルを渡すと、終了コードと非構造化テキストが返ってくる」ことだけです。

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineError;

/// ワークフローエンジンの共通インターフェース
///
/// # 実装要件
///
/// - `Send + Sync`: オーケストレーターから `Arc` で共有される
/// - 実行は完了（またはタイムアウト）までブロックする
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// ワークフローを1つ実行し、出力をすべて取得する
    ///
    /// # エラー
    ///
    /// - [`EngineError::Spawn`] - コマンドが起動できない
    /// - [`EngineError::ExitStatus`] - 非0で終了した
    /// - [`EngineError::Timeout`] - 上限時間内に終わらなかった
    async fn run(&self, workflow_file: &Path) -> Result<EngineOutput, EngineError>;
}

/// エンジンの出力
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// 標準出力
    pub stdout: String,
    /// 標準エラー出力
    pub stderr: String,
}

impl EngineOutput {
    /// ログファイルに書き出す形式（標準出力 + 標準エラー出力）
    pub fn combined_log(&self) -> String {
        format!(
            "##### stdout #####\n{}\n##### stderr #####\n{}\n",
            self.stdout, self.stderr
        )
    }
}

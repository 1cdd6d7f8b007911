//! テレメトリーレポーター
//!
//! # 責務
//!
//! - [`RunPayload`] を JSON にしてトラッキングAPIへ POST する
//! - 失敗時は一定時間（既定10秒）待って **1回だけ** 再送する
//! - 最新のレスポンス本文をローカルのログファイルに上書き保存する（CI のログ収集用）
//!
//! # 送信ポリシー
//!
//! | 1回目 | 2回目 | 結果 |
//! |-------|-------|------|
//! | 2xx   | -     | 成功（試行1回） |
//! | 非2xx | 2xx   | 成功（試行2回、待機1回） |
//! | 非2xx | 非2xx | [`ReportError::DeliveryFailed`]（呼び出し側でプロセスを非0終了） |
//!
//! 通信エラー（接続失敗、タイムアウト）も非2xxと同じく再送対象です。
//!
//! レスポンス本文が JSON でなくてもそのままログに出します。ログ出力やファイル保存の失敗は
//! 警告に留め、成功した送信を失敗扱いにすることはありません。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::payload::RunPayload;
use super::profile::MachineProfile;
use crate::config::RunContext;
use crate::engine::result::RunResult;
use crate::error::ReportError;

/// 送信の試行回数（初回 + 再送1回）
pub const DELIVERY_ATTEMPTS: u32 = 2;

const RESPONSE_LOG_HEADER: &str = "\n##### Comfy CI Post Response #####\n";

/// トラッキングAPIからのレスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP ステータスコード
    pub status: u16,
    /// レスポンス本文
    pub body: String,
}

impl ApiResponse {
    /// 2xx かどうか
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// トラッキングAPIへの送信インターフェース
#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// JSON 本文を POST する
    ///
    /// HTTP レスポンスを受け取れた場合はステータスに関わらず `Ok` を返します。
    /// `Err` は通信自体が失敗した場合のみです。
    async fn post(&self, body: String) -> Result<ApiResponse, ReportError>;
}

/// `reqwest` を使う HTTP 実装
pub struct HttpTrackingApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTrackingApi {
    /// 新しいクライアントを生成
    ///
    /// # 引数
    ///
    /// - `endpoint`: POST 先の URL
    /// - `timeout`: 1リクエストあたりのタイムアウト
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TrackingApi for HttpTrackingApi {
    async fn post(&self, body: String) -> Result<ApiResponse, ReportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }
}

/// 実行結果をトラッキングAPIへ送信するレポーター
#[derive(Clone)]
pub struct TelemetryReporter {
    api: Arc<dyn TrackingApi>,
    retry_delay: Duration,
    response_log: PathBuf,
}

impl TelemetryReporter {
    /// 新しいレポーターを生成
    ///
    /// # 引数
    ///
    /// - `api`: 送信先
    /// - `retry_delay`: 再送までの待機時間
    /// - `response_log`: 最新のレスポンスを上書き保存するファイル
    pub fn new(api: Arc<dyn TrackingApi>, retry_delay: Duration, response_log: PathBuf) -> Self {
        Self {
            api,
            retry_delay,
            response_log,
        }
    }

    /// 1回分の実行結果を送信する
    ///
    /// # 戻り値
    ///
    /// - `Ok(u16)`: 成功時の HTTP ステータス
    /// - `Err(ReportError)`: シリアライズ失敗、または再送後も失敗した場合
    pub async fn report(
        &self,
        context: &RunContext,
        workflow_name: &str,
        run: &RunResult,
        log_path: Option<&str>,
        profile: &MachineProfile,
    ) -> Result<u16, ReportError> {
        let payload = RunPayload::new(context, workflow_name, run, log_path, profile);
        let body = payload.to_json()?;

        tracing::info!(
            workflow = workflow_name,
            status = run.status.as_wire_str(),
            artifacts = run.artifacts.len(),
            samples = run.samples.len(),
            "reporting workflow run"
        );
        tracing::debug!(payload = %body, "telemetry payload");

        self.deliver(body).await
    }

    /// 本文を送信する（再送1回まで）
    pub async fn deliver(&self, body: String) -> Result<u16, ReportError> {
        let mut last_status = None;
        let mut last_body = String::new();

        for attempt in 1..=DELIVERY_ATTEMPTS {
            match self.api.post(body.clone()).await {
                Ok(response) => {
                    self.record_response(&response.body).await;

                    if response.is_success() {
                        tracing::info!(
                            attempt,
                            status = response.status,
                            response = %describe_body(&response.body),
                            "tracking API request successful"
                        );
                        return Ok(response.status);
                    }

                    tracing::warn!(
                        attempt,
                        status = response.status,
                        response = %describe_body(&response.body),
                        "tracking API request failed"
                    );
                    last_status = Some(response.status);
                    last_body = response.body;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "tracking API request could not be sent");
                    last_status = None;
                    last_body = err.to_string();
                }
            }

            if attempt < DELIVERY_ATTEMPTS {
                tracing::info!(delay_secs = self.retry_delay.as_secs(), "retrying tracking API request");
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::error!(
            attempts = DELIVERY_ATTEMPTS,
            status = ?last_status,
            response = %last_body,
            "tracking API request failed after retry"
        );

        Err(ReportError::DeliveryFailed {
            status: last_status,
            attempts: DELIVERY_ATTEMPTS,
            body: last_body,
        })
    }

    async fn record_response(&self, body: &str) {
        let content = format!("{}{}", RESPONSE_LOG_HEADER, body);
        if let Err(err) = tokio::fs::write(&self.response_log, content).await {
            tracing::warn!(
                path = %self.response_log.display(),
                error = %err,
                "failed to write tracking API response log"
            );
        }
    }
}

/// レスポンス本文をログ用に整形する
///
/// JSON として読めれば整形し、読めなければ元の文字列をそのまま返します。
fn describe_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.to_string())
}

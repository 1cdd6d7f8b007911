//! ランナー自身のログ出力
//!
//! # 責務
//!
//! - `tracing-subscriber` を初期化する（`RUST_LOG` を優先し、未設定なら設定値のフィルター）
//! - 出力形式をテキスト / JSON から選択する
//! - ログディレクトリが設定されていれば、`tracing-appender` の日次ローテーションファイルにも書き出す
//!
//! ファイル出力は `non_blocking` 経由のため、返される [`WorkerGuard`] を
//! プロセス終了まで保持しておく必要があります。

use std::sync::OnceLock;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LogSettings};

/// ローテーションファイルの接頭辞
const LOG_FILE_PREFIX: &str = "comfy-ci-runner.log";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// グローバルな subscriber を設定する
///
/// 2回目以降の呼び出しは何もしません。
///
/// # 戻り値
///
/// ファイル出力を有効にした場合のみ `Some(WorkerGuard)`。
/// ドロップするとバッファされたログが書き出されて出力が止まります。
pub fn init_tracing(settings: &LogSettings) -> Option<WorkerGuard> {
    if TRACING_INIT.get().is_some() {
        return None;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.filter));

    let (file_layer, guard) = match &settings.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(format_layer(settings.format, writer, false)), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(format_layer(settings.format, std::io::stdout, true))
        .with(file_layer)
        .try_init();

    let _ = TRACING_INIT.set(());
    guard
}

fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LogSettings::default();
        assert!(init_tracing(&settings).is_none());
        assert!(init_tracing(&settings).is_none());
    }
}

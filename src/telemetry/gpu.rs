//! GPU 情報の取得（`nvidia-smi` 呼び出し）
//!
//! # 責務
//!
//! `nvidia-smi` を CSV 出力モードで呼び出し、先頭の GPU について
//! モデル名・総VRAM・使用中VRAM・使用率を取得します。
//!
//! GPU が無い、ドライバが入っていない、コマンドがタイムアウトした等の場合は
//! すべて `None` を返します。呼び出し側はプレースホルダー値で置き換えます。
//!
//! # CLI出力形式
//!
//! ```text
//! $ nvidia-smi --query-gpu=name,memory.total,memory.used,utilization.gpu --format=csv,noheader,nounits
//! NVIDIA GeForce RTX 4090, 24564, 1032, 7
//! ```

use std::time::Duration;

use tokio::process::Command;

/// `nvidia-smi` の応答待ち上限（サンプリング周期を大きく超えないようにする）
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const QUERY_FIELDS: &str = "--query-gpu=name,memory.total,memory.used,utilization.gpu";
const QUERY_FORMAT: &str = "--format=csv,noheader,nounits";

/// 1回の問い合わせで得られる GPU の状態
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSnapshot {
    /// モデル名
    pub name: String,
    /// 総VRAM（MiB）
    pub total_mib: f64,
    /// 使用中VRAM（MiB）
    pub used_mib: f64,
    /// 使用率（0.0〜1.0）
    pub load_fraction: f64,
}

/// GPU の状態を問い合わせる
///
/// 失敗時は `debug` ログを残して `None` を返します。
pub async fn query_gpu(command: &str) -> Option<GpuSnapshot> {
    let output = Command::new(command)
        .arg(QUERY_FIELDS)
        .arg(QUERY_FORMAT)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(QUERY_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            tracing::debug!(command, code = ?output.status.code(), "GPU query exited with failure");
            return None;
        }
        Ok(Err(err)) => {
            tracing::debug!(command, error = %err, "GPU query could not be started");
            return None;
        }
        Err(_) => {
            tracing::debug!(command, "GPU query timed out");
            return None;
        }
    };

    parse_gpu_csv(&String::from_utf8_lossy(&output.stdout))
}

/// `nvidia-smi` の CSV 出力をパースする
///
/// 複数 GPU の場合は先頭行のみを使います。
pub fn parse_gpu_csv(stdout: &str) -> Option<GpuSnapshot> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    let [name, total, used, util] = fields.as_slice() else {
        return None;
    };

    let utilization: f64 = util.parse().ok()?;

    Some(GpuSnapshot {
        name: name.to_string(),
        total_mib: total.parse().ok()?,
        used_mib: used.parse().ok()?,
        load_fraction: (utilization / 100.0).clamp(0.0, 1.0),
    })
}

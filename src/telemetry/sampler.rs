//! リソースサンプラー
//!
//! # 責務
//!
//! ワークフロー実行中、バックグラウンドタスクで一定周期（0.5秒）ごとに
//! [`ResourceProbe`] を呼び出し、[`SampleTick`] の時系列を記録します。
//!
//! # 所有権の受け渡し
//!
//! 時系列はバックグラウンドタスクが排他的に所有し、共有されません。
//! [`SamplerHandle::stop`] でタスクの終了を待った時点で、`Vec<SampleTick>` として
//! 呼び出し側へ所有権が移ります。
//!
//! # 停止のデバウンス
//!
//! 停止信号を受け取った後も最大 [`STOP_DRAIN_TICKS`] ティック分は記録を続けます。
//! 停止と競合したティックを取りこぼさないためです。呼び出し側は `stop().await` で
//! 終了を待つ必要があります。
//!
//! ハンドルが `stop` されずに破棄された場合（エラー経路など）も `Drop` で停止信号を送るため、
//! タスクがワークフローをまたいで残ることはありません。

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::probe::{NO_GPU_VRAM, ProbeReading, ResourceProbe};

/// サンプリング周期
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// 停止信号の後に追加で記録するティック数の上限
pub const STOP_DRAIN_TICKS: u32 = 2;

/// 1ティック分の計測結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleTick {
    /// サンプリング開始からの経過時間（0.5秒単位、1始まり）
    pub elapsed_half_seconds: u64,
    /// 使用中VRAM（MiB）。GPU が無い場合は `-1`
    pub vram_used_mib: f64,
    /// GPU 使用率（0.0〜1.0）
    pub gpu_load_fraction: f64,
    /// エンジンプロセスの常駐メモリ（MiB）
    pub engine_process_rss_mib: f64,
    /// ホスト全体の CPU 使用率（%）
    pub host_cpu_percent: f64,
}

impl SampleTick {
    fn new(elapsed_half_seconds: u64, reading: ProbeReading) -> Self {
        Self {
            elapsed_half_seconds,
            vram_used_mib: reading.vram_used_mib,
            gpu_load_fraction: reading.gpu_load_fraction,
            engine_process_rss_mib: reading.engine_process_rss_mib,
            host_cpu_percent: reading.host_cpu_percent,
        }
    }

    /// 経過時間のラベル（例: `"1.5s"`）
    pub fn elapsed_label(&self) -> String {
        format!("{}s", self.elapsed_half_seconds as f64 / 2.0)
    }

    fn has_gpu(&self) -> bool {
        self.vram_used_mib != NO_GPU_VRAM
    }
}

/// VRAM 使用量の集計値
///
/// 平均とピークは「両方とも有効な値」か「両方とも `-1`」のどちらかです。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VramSummary {
    /// 平均（MiB）
    pub average: f64,
    /// 最大（MiB）
    pub peak: f64,
}

impl VramSummary {
    /// GPU が検出されなかった場合の値
    pub const NO_GPU: VramSummary = VramSummary {
        average: NO_GPU_VRAM,
        peak: NO_GPU_VRAM,
    };

    /// サンプル列から集計する
    ///
    /// - サンプルが空の場合は `0` / `0`
    /// - 1つでも GPU 未検出のサンプルがあれば `-1` / `-1`
    /// - それ以外は VRAM の算術平均と最大値
    pub fn from_samples(samples: &[SampleTick]) -> Self {
        if samples.is_empty() {
            return Self {
                average: 0.0,
                peak: 0.0,
            };
        }

        if samples.iter().any(|s| !s.has_gpu()) {
            return Self::NO_GPU;
        }

        let sum: f64 = samples.iter().map(|s| s.vram_used_mib).sum();
        let peak = samples
            .iter()
            .map(|s| s.vram_used_mib)
            .fold(f64::MIN, f64::max);

        Self {
            average: sum / samples.len() as f64,
            peak,
        }
    }

    /// GPU の計測値として有効かどうか
    pub fn is_valid(&self) -> bool {
        *self != Self::NO_GPU
    }
}

/// バックグラウンドでリソースを計測するサンプラー
///
/// # 例
///
/// ```rust,no_run
/// use comfy_ci_runner::telemetry::probe::SystemProbe;
/// use comfy_ci_runner::telemetry::sampler::ResourceSampler;
///
/// # async fn example() {
/// let probe = SystemProbe::attach("nvidia-smi", "main.py");
/// let handle = ResourceSampler::new(Box::new(probe)).start();
///
/// // ... エンジンを実行 ...
///
/// let samples = handle.stop().await;
/// println!("{} samples", samples.len());
/// # }
/// ```
pub struct ResourceSampler {
    probe: Box<dyn ResourceProbe>,
    period: Duration,
}

impl ResourceSampler {
    /// 新しいサンプラーを生成（周期は [`SAMPLE_PERIOD`]）
    pub fn new(probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            probe,
            period: SAMPLE_PERIOD,
        }
    }

    /// サンプリング周期を変更
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// バックグラウンドタスクを起動する
    ///
    /// tokio ランタイム上で呼び出す必要があります。
    pub fn start(self) -> SamplerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(sample_loop(self.probe, self.period, stop_rx));

        SamplerHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

async fn sample_loop(
    mut probe: Box<dyn ResourceProbe>,
    period: Duration,
    stop_rx: watch::Receiver<bool>,
) -> Vec<SampleTick> {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut samples = Vec::new();
    let mut ticks_after_stop = 0;

    loop {
        ticker.tick().await;
        let reading = probe.read().await;

        if *stop_rx.borrow() {
            ticks_after_stop += 1;
            if ticks_after_stop > STOP_DRAIN_TICKS {
                break;
            }
        }

        samples.push(SampleTick::new(samples.len() as u64 + 1, reading));
    }

    tracing::debug!(samples = samples.len(), "resource sampler stopped");
    samples
}

/// 起動中のサンプラーへのハンドル
pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Vec<SampleTick>>>,
}

impl SamplerHandle {
    /// 停止信号を送り、タスクの終了を待って時系列を受け取る
    ///
    /// タスクがパニックしていた場合は空の時系列を返します。
    pub async fn stop(mut self) -> Vec<SampleTick> {
        self.stop_tx.send_replace(true);

        let Some(task) = self.task.take() else {
            return Vec::new();
        };

        match task.await {
            Ok(samples) => samples,
            Err(err) => {
                tracing::warn!(error = %err, "resource sampler task failed; samples discarded");
                Vec::new()
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

//! リソース計測プローブ
//!
//! # 責務
//!
//! - サンプラーが1ティックごとに呼び出す計測インターフェース [`ResourceProbe`] を定義
//! - 実環境用の [`SystemProbe`]（`sysinfo` + `nvidia-smi`）を提供
//! - 実行ごとに新しいプローブを生成する [`ProbeFactory`] を定義
//!
//! # 計測項目
//!
//! | 項目 | 取得元 | 取得できない場合 |
//! |------|--------|------------------|
//! | VRAM 使用量 | `nvidia-smi` | [`NO_GPU_VRAM`] |
//! | GPU 使用率 | `nvidia-smi` | `0.0` |
//! | エンジンプロセスの RSS | `sysinfo` | `0.0` |
//! | ホスト全体の CPU 使用率 | `sysinfo` | - |
//!
//! プローブは失敗しません。取得できない値は上表の値で置き換えます。

use std::path::Path;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

use super::gpu::query_gpu;

/// GPU が検出できなかったことを示す VRAM 値
pub const NO_GPU_VRAM: f64 = -1.0;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// 1ティック分の計測値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    /// 使用中VRAM（MiB）。GPU が無い場合は [`NO_GPU_VRAM`]
    pub vram_used_mib: f64,
    /// GPU 使用率（0.0〜1.0）
    pub gpu_load_fraction: f64,
    /// エンジンプロセスの常駐メモリ（MiB）
    pub engine_process_rss_mib: f64,
    /// ホスト全体の CPU 使用率（%）
    pub host_cpu_percent: f64,
}

/// リソース計測の共通インターフェース
///
/// サンプラーのバックグラウンドタスクが排他的に所有するため `&mut self` を取ります。
#[async_trait]
pub trait ResourceProbe: Send {
    /// 現在の計測値を取得する
    async fn read(&mut self) -> ProbeReading;
}

/// 実行ごとにプローブを生成するファクトリー
///
/// エンジンプロセスの特定はプローブ生成時に1度だけ行われるため、
/// オーケストレーターはワークフローごとに新しいプローブを要求します。
pub trait ProbeFactory: Send + Sync {
    /// 新しいプローブを生成
    fn create(&self) -> Box<dyn ResourceProbe>;
}

/// `sysinfo` と `nvidia-smi` を使う実環境用プローブ
pub struct SystemProbe {
    system: System,
    gpu_command: String,
    target: Option<Pid>,
}

impl SystemProbe {
    /// プローブを生成し、計測対象のエンジンプロセスを特定する
    ///
    /// 実行中プロセスのコマンドラインから `entry_script` を含むものを探します。
    /// 候補が0件または2件以上の場合は RSS の計測を無効化し、警告ログを出します。
    pub fn attach(gpu_command: &str, entry_script: &str) -> Self {
        let mut system = System::new();
        // コマンドラインはデフォルトの更新対象に含まれない
        system.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_memory(),
        );
        // 初回の CPU 使用率は常に 0 になるため、ここで基準値を取っておく
        system.refresh_cpu();

        let candidates: Vec<Pid> = system
            .processes()
            .iter()
            // Linux ではスレッドも同じコマンドラインを持つプロセスとして列挙される
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| {
                process
                    .cmd()
                    .iter()
                    .any(|arg| runs_entry_script(arg, entry_script))
            })
            .map(|(pid, _)| *pid)
            .collect();

        let target = match candidates.as_slice() {
            [pid] => {
                tracing::debug!(pid = %pid, entry_script, "engine process found for RSS sampling");
                Some(*pid)
            }
            [] => {
                tracing::warn!(entry_script, "engine process not found; RSS sampling disabled");
                None
            }
            many => {
                tracing::warn!(
                    entry_script,
                    candidates = many.len(),
                    "multiple engine processes found; RSS sampling disabled"
                );
                None
            }
        };

        Self {
            system,
            gpu_command: gpu_command.to_string(),
            target,
        }
    }

    fn engine_rss_mib(&mut self) -> f64 {
        let Some(pid) = self.target else {
            return 0.0;
        };

        if !self
            .system
            .refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory())
        {
            return 0.0;
        }

        self.system
            .process(pid)
            .map(|process| process.memory() as f64 / BYTES_PER_MIB)
            .unwrap_or(0.0)
    }

    fn host_cpu_percent(&mut self) -> f64 {
        self.system.refresh_cpu();
        f64::from(self.system.global_cpu_info().cpu_usage())
    }
}

fn runs_entry_script(arg: &str, entry_script: &str) -> bool {
    Path::new(arg)
        .file_name()
        .is_some_and(|name| name == entry_script)
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn read(&mut self) -> ProbeReading {
        let (vram_used_mib, gpu_load_fraction) = match query_gpu(&self.gpu_command).await {
            Some(gpu) => (gpu.used_mib, gpu.load_fraction),
            None => (NO_GPU_VRAM, 0.0),
        };

        ProbeReading {
            vram_used_mib,
            gpu_load_fraction,
            engine_process_rss_mib: self.engine_rss_mib(),
            host_cpu_percent: self.host_cpu_percent(),
        }
    }
}

/// [`SystemProbe`] のファクトリー
#[derive(Debug, Clone)]
pub struct SystemProbeFactory {
    gpu_command: String,
    entry_script: String,
}

impl SystemProbeFactory {
    /// 新しいファクトリーを生成
    pub fn new(gpu_command: impl Into<String>, entry_script: impl Into<String>) -> Self {
        Self {
            gpu_command: gpu_command.into(),
            entry_script: entry_script.into(),
        }
    }
}

impl ProbeFactory for SystemProbeFactory {
    fn create(&self) -> Box<dyn ResourceProbe> {
        Box::new(SystemProbe::attach(&self.gpu_command, &self.entry_script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_script_matches_file_name() {
        assert!(runs_entry_script("main.py", "main.py"));
        assert!(runs_entry_script("/opt/ComfyUI/main.py", "main.py"));
        assert!(!runs_entry_script("main.py.bak", "main.py"));
        assert!(!runs_entry_script("--main.py-flag=x", "main.py"));
        assert!(!runs_entry_script("python", "main.py"));
    }

    #[test]
    fn test_unmatched_entry_script_disables_rss() {
        let mut probe = SystemProbe::attach(
            "nonexistent-gpu-tool-xyz123",
            "no-such-entry-script-xyz123.py",
        );

        assert!(probe.target.is_none());
        assert_eq!(probe.engine_rss_mib(), 0.0);
    }

    /// テスト終了時に子プロセスを止める
    struct ChildGuard(std::process::Child);

    impl Drop for ChildGuard {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    fn unique_script_name(tag: &str) -> String {
        format!("rss-target-{}-{}.py", tag, std::process::id())
    }

    #[cfg(unix)]
    #[test]
    fn test_running_entry_script_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let name = unique_script_name("sh");
        let script = dir.path().join(&name);
        // 末尾の `:` で sh が sleep に exec されずに残る
        std::fs::write(&script, "sleep 30; :\n").unwrap();
        let _child = ChildGuard(std::process::Command::new("sh").arg(&script).spawn().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(300));

        let mut probe = SystemProbe::attach("nonexistent-gpu-tool-xyz123", &name);

        assert!(probe.target.is_some());
        assert!(probe.engine_rss_mib() > 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_multithreaded_entry_script_is_single_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let name = unique_script_name("py");
        let script = dir.path().join(&name);
        std::fs::write(
            &script,
            "import threading, time\n\
             for _ in range(4):\n    threading.Thread(target=time.sleep, args=(30,), daemon=True).start()\n\
             time.sleep(30)\n",
        )
        .unwrap();

        // python3 が無い環境では確認できない
        let Ok(child) = std::process::Command::new("python3").arg(&script).spawn() else {
            return;
        };
        let _child = ChildGuard(child);
        std::thread::sleep(std::time::Duration::from_millis(500));

        let mut probe = SystemProbe::attach("nonexistent-gpu-tool-xyz123", &name);

        assert!(probe.target.is_some());
        assert!(probe.engine_rss_mib() > 0.0);
    }

    #[tokio::test]
    async fn test_reading_without_gpu_reports_sentinel() {
        let mut probe = SystemProbe::attach(
            "nonexistent-gpu-tool-xyz123",
            "no-such-entry-script-xyz123.py",
        );

        let reading = probe.read().await;

        assert_eq!(reading.vram_used_mib, NO_GPU_VRAM);
        assert_eq!(reading.gpu_load_fraction, 0.0);
        assert_eq!(reading.engine_process_rss_mib, 0.0);
        assert!(reading.host_cpu_percent >= 0.0);
    }
}

//! マシンプロファイル
//!
//! # 責務
//!
//! プロセス起動時に1度だけ、ホストの静的な情報（CPU/RAM/ディスク容量、GPU、
//! インストール済みパッケージ一覧）を取得して [`MachineProfile`] にまとめます。
//!
//! 取得処理は失敗しません。個々の項目が取得できない場合はプレースホルダー値
//! （[`NO_GPU_DETECTED`]、[`NO_PACKAGE_LIST`] 等）で置き換えます。
//! テレメトリーはホスト情報が一部欠けていても送信できる必要があるためです。
//!
//! 生成後は不変で、`&MachineProfile` として全てのテレメトリー送信に渡されます。

use std::time::Duration;

use sysinfo::{Disks, System};
use tokio::process::Command;

use super::gpu::query_gpu;
use crate::config::ProbeSettings;

/// GPU が検出できなかった場合の表示
pub const NO_GPU_DETECTED: &str = "No GPU detected";

/// パッケージ一覧が取得できなかった場合の表示
pub const NO_PACKAGE_LIST: &str = "Unable to get package list";

/// ホスト名が取得できなかった場合の表示
const UNKNOWN: &str = "unknown";

const PACKAGE_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// ホストの静的情報
#[derive(Debug, Clone, PartialEq)]
pub struct MachineProfile {
    /// ホスト名
    pub host_name: String,
    /// OS のバージョン文字列
    pub os_version: String,
    /// GPU のモデル名（未検出時は [`NO_GPU_DETECTED`]）
    pub gpu_model: String,
    /// GPU の総VRAM（MiB）
    pub gpu_total_vram_mib: Option<f64>,
    /// 論理コア数
    pub logical_cores: usize,
    /// 物理コア数
    pub physical_cores: Option<usize>,
    /// 起動時の CPU 使用率（%）
    pub initial_cpu_percent: f64,
    /// 総メモリ（バイト）
    pub total_memory_bytes: u64,
    /// 起動時の空きメモリ（バイト）
    pub available_memory_bytes: u64,
    /// 総ディスク容量（バイト）
    pub total_disk_bytes: u64,
    /// 起動時の空きディスク容量（バイト）
    pub available_disk_bytes: u64,
    /// インストール済みパッケージ一覧（未取得時は [`NO_PACKAGE_LIST`]）
    pub package_manifest: String,
}

impl MachineProfile {
    /// ホスト情報を取得する
    ///
    /// CPU 使用率を測るため、`sysinfo` の最小更新間隔だけ待機します。
    pub async fn capture(settings: &ProbeSettings) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu();

        let disks = Disks::new_with_refreshed_list();
        let (total_disk_bytes, available_disk_bytes) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });

        let (gpu_model, gpu_total_vram_mib) = match query_gpu(&settings.gpu_command).await {
            Some(gpu) => (gpu.name, Some(gpu.total_mib)),
            None => {
                tracing::warn!(command = %settings.gpu_command, "GPU not detected");
                (NO_GPU_DETECTED.to_string(), None)
            }
        };

        let profile = Self {
            host_name: System::host_name().unwrap_or_else(|| UNKNOWN.to_string()),
            os_version: System::long_os_version().unwrap_or_else(|| UNKNOWN.to_string()),
            gpu_model,
            gpu_total_vram_mib,
            logical_cores: system.cpus().len(),
            physical_cores: system.physical_core_count(),
            initial_cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            total_memory_bytes: system.total_memory(),
            available_memory_bytes: system.available_memory(),
            total_disk_bytes,
            available_disk_bytes,
            package_manifest: package_manifest(&settings.package_list_command).await,
        };

        tracing::info!(
            host = %profile.host_name,
            os = %profile.os_version,
            gpu = %profile.gpu_model,
            cores = profile.logical_cores,
            memory = %format_bytes(profile.total_memory_bytes),
            "machine profile captured"
        );

        profile
    }

    /// GPU の表示名（総VRAM付き）
    pub fn gpu_description(&self) -> String {
        match self.gpu_total_vram_mib {
            Some(total) => format!("{}, {} MiB", self.gpu_model, total),
            None => self.gpu_model.clone(),
        }
    }

    /// CPU 容量の表示
    pub fn cpu_description(&self) -> String {
        match self.physical_cores {
            Some(physical) => format!(
                "{} logical cores, {} physical cores",
                self.logical_cores, physical
            ),
            None => format!("{} logical cores", self.logical_cores),
        }
    }
}

async fn package_manifest(command: &[String]) -> String {
    let Some((program, args)) = command.split_first() else {
        return NO_PACKAGE_LIST.to_string();
    };

    let output = Command::new(program).args(args).kill_on_drop(true).output();

    match tokio::time::timeout(PACKAGE_LIST_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        Ok(Ok(output)) => {
            tracing::warn!(program = %program, code = ?output.status.code(), "package list command failed");
            NO_PACKAGE_LIST.to_string()
        }
        Ok(Err(err)) => {
            tracing::warn!(program = %program, error = %err, "package list command could not be started");
            NO_PACKAGE_LIST.to_string()
        }
        Err(_) => {
            tracing::warn!(program = %program, "package list command timed out");
            NO_PACKAGE_LIST.to_string()
        }
    }
}

/// バイト数を GiB 表記に変換する
pub fn format_bytes(bytes: u64) -> String {
    format!("{:.2} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

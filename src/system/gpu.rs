//! Accelerator detection and placement
//!
//! Detects a GPU (best effort) and resolves the configured device map into the
//! number of layers llama.cpp offloads.

use crate::types::config::{DeviceMap, Precision};
use crate::types::model::Placement;
use std::process::Command;

/// Layer count large enough to offload every layer of any model
pub const ALL_LAYERS: u32 = 999;

/// GPU information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuInfo {
    pub name: String,
    pub vram_total_mb: u64,
    pub vram_used_mb: u64,
    pub is_available: bool,
}

impl GpuInfo {
    fn not_detected() -> Self {
        Self {
            name: "GPU not detected".to_string(),
            ..Default::default()
        }
    }
}

/// Detect available GPU (best effort)
pub fn detect_gpu() -> GpuInfo {
    #[cfg(target_os = "macos")]
    {
        detect_gpu_macos().unwrap_or_else(GpuInfo::not_detected)
    }

    #[cfg(not(target_os = "macos"))]
    {
        detect_gpu_nvidia_smi().unwrap_or_else(GpuInfo::not_detected)
    }
}

/// Resolve a device map into a placement
///
/// `Auto` offloads everything when `gpu` is available and stays on the CPU otherwise.
/// `offload_supported` is whether the linked llama.cpp build has a GPU backend;
/// without one every layer stays on the CPU, whatever detection found.
pub fn resolve_placement(
    device_map: DeviceMap,
    precision: Precision,
    gpu: &GpuInfo,
    offload_supported: bool,
) -> Placement {
    match device_map {
        DeviceMap::Cpu | DeviceMap::GpuLayers(0) => Placement::cpu(precision),
        DeviceMap::GpuLayers(layers) if !offload_supported => {
            tracing::warn!(
                "{} GPU layers requested, but this build has no GPU backend; using the CPU",
                layers
            );
            Placement::cpu(precision)
        }
        DeviceMap::GpuLayers(layers) => Placement {
            accelerator: gpu.name.clone(),
            gpu_layers: layers,
            precision,
        },
        DeviceMap::Auto if gpu.is_available && offload_supported => Placement {
            accelerator: gpu.name.clone(),
            gpu_layers: ALL_LAYERS,
            precision,
        },
        DeviceMap::Auto => Placement::cpu(precision),
    }
}

fn detect_gpu_nvidia_smi() -> Option<GpuInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total,memory.used",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the first line of `nvidia-smi --format=csv,noheader,nounits`
fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 3 {
        return None;
    }

    Some(GpuInfo {
        name: parts[0].to_string(),
        vram_total_mb: parts[1].parse::<u64>().ok()?,
        vram_used_mb: parts[2].parse::<u64>().ok()?,
        is_available: true,
    })
}

#[cfg(target_os = "macos")]
fn detect_gpu_macos() -> Option<GpuInfo> {
    let output = Command::new("system_profiler")
        .args(["SPDisplaysDataType"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let name = stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Chipset Model:")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })?;

    Some(GpuInfo {
        name: format!("{} (Metal)", name),
        vram_total_mb: 0,
        vram_used_mb: 0,
        is_available: true,
    })
}

//! Compute device discovery
//!
//! Lists accelerators the model loader can place weights on. Detection is
//! best effort: a missing vendor tool simply yields no devices.

use std::process::Command;

/// One accelerator visible to the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDevice {
    /// Ordinal used as the key of per-device memory ceilings
    pub index: u32,
    pub name: String,
    pub memory_total_mib: u64,
}

impl std::fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GPU {}: {} ({} MiB)",
            self.index, self.name, self.memory_total_mib
        )
    }
}

/// Enumerate GPUs (best effort)
pub fn list_gpus() -> Vec<GpuDevice> {
    if let Some(devices) = list_gpus_nvidia_smi() {
        return devices;
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(device) = detect_gpu_apple_silicon() {
            return vec![device];
        }
    }

    Vec::new()
}

/// Log every detected device, as done once at startup
pub fn log_devices() -> Vec<GpuDevice> {
    let devices = list_gpus();
    if devices.is_empty() {
        tracing::info!("No GPU detected, models will run on the CPU");
    }
    for device in &devices {
        tracing::info!("{}", device);
    }
    devices
}

fn list_gpus_nvidia_smi() -> Option<Vec<GpuDevice>> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let devices = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout));
    if devices.is_empty() {
        None
    } else {
        Some(devices)
    }
}

/// Parse `index, name, memory.total` CSV rows; malformed rows are skipped
fn parse_nvidia_smi(stdout: &str) -> Vec<GpuDevice> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
            if parts.len() < 3 {
                return None;
            }
            Some(GpuDevice {
                index: parts[0].parse().ok()?,
                name: parts[1].to_string(),
                memory_total_mib: parts[2].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(target_os = "macos")]
fn detect_gpu_apple_silicon() -> Option<GpuDevice> {
    let output = Command::new("sysctl")
        .args(["-n", "machdep.cpu.brand_string"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let brand = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !brand.contains("Apple") {
        return None;
    }

    // Unified memory: the GPU can address all of system RAM
    let memory = Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8_lossy(&o.stdout).trim().parse::<u64>().ok())
        .unwrap_or(0);

    Some(GpuDevice {
        index: 0,
        name: format!("{} GPU (Metal)", brand),
        memory_total_mib: memory / 1024 / 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_multiple_devices() {
        let stdout = "0, NVIDIA GeForce RTX 3090, 24576\n1, NVIDIA RTX A4000, 16376\n";
        let devices = parse_nvidia_smi(stdout);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].name, "NVIDIA RTX A4000");
        assert_eq!(devices[0].memory_total_mib, 24576);
    }

    #[test]
    fn test_parse_nvidia_smi_skips_garbage() {
        let stdout = "\nNo devices were found\n0, Tesla T4, [N/A]\n";
        assert!(parse_nvidia_smi(stdout).is_empty());
    }

    #[test]
    fn test_device_display() {
        let device = GpuDevice {
            index: 0,
            name: "Tesla T4".to_string(),
            memory_total_mib: 15360,
        };
        assert_eq!(device.to_string(), "GPU 0: Tesla T4 (15360 MiB)");
    }
}

//! The `system` provider: host information resources.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use sysinfo::System;

use super::{parse_options, Provider};
use crate::capability::{handler_fn, Arguments, CapabilityDescriptor, InvocationResult, Output};

/// Provider id used in the configuration document.
pub const PROVIDER_ID: &str = "system";

/// Options accepted under `providers.system.config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemOptions {
    /// Environment variables exposed by `system://environment`.
    #[serde(default = "default_env_vars")]
    pub env_vars: Vec<String>,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            env_vars: default_env_vars(),
        }
    }
}

fn default_env_vars() -> Vec<String> {
    ["PATH", "HOME", "USER", "SHELL", "LANG"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `system://info`, `system://memory`, `system://cpu` and `system://environment`.
#[derive(Debug, Clone, Default)]
pub struct SystemProvider {
    options: SystemOptions,
}

impl SystemProvider {
    /// Creates the provider from its option map.
    ///
    /// # Errors
    ///
    /// Returns a message if the options do not deserialise.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            options: parse_options(options)?,
        })
    }
}

impl Provider for SystemProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String> {
        let env_vars = self.options.env_vars.clone();

        Ok(vec![
            CapabilityDescriptor::resource(
                "system_info",
                "system://info",
                handler_fn(|_| async { InvocationResult::json(system_info()) }),
            )?
            .with_title("System Information")
            .with_description("Operating system, architecture and host name.")
            .with_mime_type("application/json"),
            CapabilityDescriptor::resource(
                "memory_info",
                "system://memory",
                handler_fn(|_| async { InvocationResult::json(memory_info()) }),
            )?
            .with_title("Memory Information")
            .with_description("Physical memory and swap usage in bytes.")
            .with_mime_type("application/json"),
            CapabilityDescriptor::resource(
                "cpu_info",
                "system://cpu",
                handler_fn(|_| async { InvocationResult::json(cpu_info().await) }),
            )?
            .with_title("CPU Information")
            .with_description("Core counts, frequencies and current utilisation.")
            .with_mime_type("application/json"),
            CapabilityDescriptor::resource(
                "environment_info",
                "system://environment",
                handler_fn(move |_: Arguments| {
                    let env_vars = env_vars.clone();
                    async move { InvocationResult::from(environment_info(&env_vars)) }
                }),
            )?
            .with_title("Process Environment")
            .with_description("Working directory, process id, executable and selected environment variables.")
            .with_mime_type("application/json"),
        ])
    }
}

fn system_info() -> Value {
    json!({
        "platform": System::name(),
        "platform_version": System::os_version(),
        "long_os_version": System::long_os_version(),
        "kernel_version": System::kernel_version(),
        "architecture": std::env::consts::ARCH,
        "hostname": System::host_name(),
        "uptime_secs": System::uptime(),
        "boot_time": System::boot_time(),
    })
}

fn memory_info() -> Value {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory();
    let used = sys.used_memory();
    let percentage = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };

    json!({
        "total": total,
        "available": sys.available_memory(),
        "used": used,
        "free": sys.free_memory(),
        "percentage": (percentage * 10.0).round() / 10.0,
        "swap_total": sys.total_swap(),
        "swap_used": sys.used_swap(),
    })
}

async fn cpu_info() -> Value {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_all();

    let cpus = sys.cpus();
    let per_cpu: Vec<f32> = cpus.iter().map(sysinfo::Cpu::cpu_usage).collect();
    let usage = if per_cpu.is_empty() {
        0.0
    } else {
        per_cpu.iter().sum::<f32>() / per_cpu.len() as f32
    };
    let frequencies: Vec<u64> = cpus.iter().map(sysinfo::Cpu::frequency).collect();

    json!({
        "brand": cpus.first().map(|c| c.brand().to_string()),
        "physical_cores": System::physical_core_count(),
        "logical_cores": cpus.len(),
        "current_frequency": frequencies.first(),
        "min_frequency": frequencies.iter().min(),
        "max_frequency": frequencies.iter().max(),
        "usage_percentage": usage,
        "usage_per_cpu": per_cpu,
    })
}

fn environment_info(names: &[String]) -> Result<Output, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("Cannot determine working directory: {e}"))?;
    let executable = std::env::current_exe().ok().map(PathBuf::into_os_string);

    let mut variables = Map::new();
    for name in names {
        if let Ok(value) = std::env::var(name) {
            variables.insert(name.clone(), json!(value));
        }
    }

    Ok(Output::Json(json!({
        "working_directory": cwd.display().to_string(),
        "pid": std::process::id(),
        "executable": executable.map(|e| e.to_string_lossy().into_owned()),
        "username": std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok(),
        "server_version": env!("CARGO_PKG_VERSION"),
        "environment_variables": variables,
    })))
}

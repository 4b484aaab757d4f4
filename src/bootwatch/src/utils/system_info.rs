use sysinfo::System;

use crate::instrumentation::Metadata;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Resident memory of the current process in MiB, if the platform exposes it.
pub fn current_memory_mb() -> Option<f64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| (process.memory() as f64 / BYTES_PER_MIB * 10.0).round() / 10.0)
}

/// Host facts worth having next to startup timings.
pub fn host_context() -> Metadata {
    let mut system = System::new();
    system.refresh_memory();

    let mut metadata = Metadata::new()
        .with("os", System::name().unwrap_or_else(|| std::env::consts::OS.to_string()))
        .with("os_version", System::os_version().unwrap_or_default())
        .with("kernel_version", System::kernel_version().unwrap_or_default())
        .with("arch", std::env::consts::ARCH)
        .with(
            "cpu_count",
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
        .with(
            "total_memory_mb",
            (system.total_memory() as f64 / BYTES_PER_MIB).round(),
        );

    if let Some(memory_mb) = current_memory_mb() {
        metadata.insert("memory_mb", memory_mb);
    }
    if let Ok(cwd) = std::env::current_dir() {
        metadata.insert("current_dir", cwd.display().to_string());
    }
    metadata
}

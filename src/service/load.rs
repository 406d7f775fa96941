// Host load gauge
//
// Load = 1-minute load average per CPU, as a percentage clamped to
// 0–100. Platforms without a load average report 0.0.

use sysinfo::System;

/// Current host load as a 0–100 gauge
pub fn current_load() -> f64 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    load_percentage(System::load_average().one, cpus)
}

/// Scale a load average to a percentage of `cpus` fully busy cores
pub fn load_percentage(load_average: f64, cpus: usize) -> f64 {
    if !load_average.is_finite() || load_average <= 0.0 {
        return 0.0;
    }
    let cpus = cpus.max(1) as f64;
    (load_average / cpus * 100.0).min(100.0)
}

//! Single-run and stress-test runners behind the CLI.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, error};

use crate::config::{DEFAULT_DELAY_MS, PipelineConfig};
use crate::delay::{Delay, FixedDelay, JitterDelay};
use crate::error::PipelineError;
use crate::pipeline::{Audit, Pipeline, PipelineReport, PipelineStatus};

const DEFAULT_STRESS_TARGETS: [usize; 4] = [1, 2, 10, 50];
const DEFAULT_STRESS_RUNS: usize = 3;
const DEFAULT_JITTER_US: u64 = 500;
// Polling interval of the progress monitor thread.
const PROGRESS_POLL_MS: u64 = 50;

const CSV_HEADER: &str = concat!(
    "target,run,milk,cheese,burgers,elapsed_ms,throughput_burgers_per_s,",
    "cpu_user_s,cpu_sys_s,max_milk_occupancy,max_cheese_occupancy,violation"
);

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data and getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

fn build_config(target: usize, timeout_ms: Option<u64>) -> Result<PipelineConfig, PipelineError> {
    let mut config = PipelineConfig::new(target)?;
    if let Some(ms) = timeout_ms {
        config = config.with_acquire_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

fn execute(
    target: usize,
    delay: Arc<dyn Delay>,
    timeout_ms: Option<u64>,
) -> Result<PipelineReport, PipelineError> {
    let config = build_config(target, timeout_ms)?;
    let pipeline = Pipeline::new(config, delay)?;
    pipeline.run()
}

fn print_summary(report: &PipelineReport, audit: &Audit) {
    println!("PIPELINE SUMMARY");
    println!("target={}", report.config.target_burgers);
    println!("milk_produced={}", report.milk.len());
    println!("cheese_produced={}", report.cheese.len());
    println!("burgers_completed={}", report.burgers.len());
    println!("max_milk_occupancy={}", report.max_milk_occupancy);
    println!("max_cheese_occupancy={}", report.max_cheese_occupancy);
    println!("leftover_units={}", audit.leftover_units);
    println!("elapsed_ms={}", report.elapsed.as_millis());
    println!("violation={}", !audit.is_clean());
}

/// Log progress until the run leaves the running states.
fn spawn_progress_monitor(
    status: Arc<PipelineStatus>,
    target: usize,
    stop_flag: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_reported = usize::MAX;
        while !stop_flag.load(Ordering::SeqCst) {
            let done = status.burgers_completed();
            if done != last_reported {
                debug!("[PROGRESS] state={} burgers={done}/{target}", status.state());
                last_reported = done;
            }
            thread::sleep(Duration::from_millis(PROGRESS_POLL_MS));
        }
    })
}

/// Run the pipeline once and print a summary; returns false on failure.
pub fn run_once(target: usize, delay_ms: Option<u64>, timeout_ms: Option<u64>) -> bool {
    let delay_ms = delay_ms.unwrap_or(DEFAULT_DELAY_MS);
    debug!("[RUN] target={target} delay_ms={delay_ms} timeout_ms={timeout_ms:?}");
    let delay = Arc::new(FixedDelay::from_millis(delay_ms));
    let pipeline = match build_config(target, timeout_ms)
        .and_then(|config| Pipeline::new(config, delay).map_err(PipelineError::from))
    {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("run error: {err}");
            return false;
        }
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let monitor = spawn_progress_monitor(
        pipeline.status(),
        pipeline.config().target_burgers,
        Arc::clone(&stop_flag),
    );
    let result = pipeline.run();
    stop_flag.store(true, Ordering::SeqCst);
    if monitor.join().is_err() {
        error!("[RUN] progress monitor panicked");
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!("[RUN] pipeline failed: {err}");
            eprintln!("run error: {err}");
            return false;
        }
    };

    let audit = report.audit();
    print_summary(&report, &audit);
    if !audit.is_clean() {
        eprintln!("# violation,{audit:?}");
        return false;
    }
    println!("All cheeseburgers produced successfully!");
    true
}

/// Sweep several targets with randomized pauses and print CSV output.
pub fn run_stress(
    target_sets: Option<Vec<usize>>,
    runs: Option<usize>,
    jitter_us: Option<u64>,
    timeout_ms: Option<u64>,
) -> bool {
    let target_sets = target_sets.unwrap_or_else(|| DEFAULT_STRESS_TARGETS.to_vec());
    let runs = runs.unwrap_or(DEFAULT_STRESS_RUNS);
    let jitter_us = jitter_us.unwrap_or(DEFAULT_JITTER_US);
    if target_sets.iter().any(|&target| target == 0) {
        eprintln!("stress error: targets must be > 0");
        return false;
    }
    if runs == 0 {
        eprintln!("stress error: runs must be > 0");
        return false;
    }

    let delay: Arc<dyn Delay> = Arc::new(JitterDelay::from_micros(jitter_us));
    let mut all_clean = true;
    println!("{CSV_HEADER}");
    for target in target_sets {
        for run in 1..=runs {
            let cpu_start = cpu_times_seconds();
            let report = match execute(target, Arc::clone(&delay), timeout_ms) {
                Ok(report) => report,
                Err(err) => {
                    eprintln!("# error,target={target},run={run},{err}");
                    all_clean = false;
                    continue;
                }
            };
            let (cpu_user, cpu_sys) = match (cpu_start, cpu_times_seconds()) {
                (Some((user_start, sys_start)), Some((user_end, sys_end))) => (
                    format!("{:.4}", user_end - user_start),
                    format!("{:.4}", sys_end - sys_start),
                ),
                _ => ("NA".to_string(), "NA".to_string()),
            };
            let elapsed_ms = report.elapsed.as_secs_f64() * 1000.0;
            let throughput = if elapsed_ms > 0.0 {
                report.burgers.len() as f64 / (elapsed_ms / 1000.0)
            } else {
                0.0
            };
            let audit = report.audit();
            println!(
                "{},{},{},{},{},{:.2},{:.2},{},{},{},{},{}",
                target,
                run,
                report.milk.len(),
                report.cheese.len(),
                report.burgers.len(),
                elapsed_ms,
                throughput,
                cpu_user,
                cpu_sys,
                report.max_milk_occupancy,
                report.max_cheese_occupancy,
                !audit.is_clean()
            );
            if !audit.is_clean() {
                eprintln!("# violation,target={target},run={run},{audit:?}");
                all_clean = false;
            }
        }
    }
    all_clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::NoDelay;
    use crate::error::ConfigError;

    #[test]
    fn execute_rejects_zero_target() {
        let result = execute(0, Arc::new(NoDelay), None);
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::ZeroTarget))
        ));
    }

    #[test]
    fn execute_applies_timeout() {
        let config = build_config(2, Some(250)).expect("valid config");
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn csv_header_has_one_column_per_field() {
        assert_eq!(CSV_HEADER.split(',').count(), 12);
        assert!(!CSV_HEADER.contains(",,"));
    }

    #[test]
    fn run_once_completes_small_target() {
        assert!(run_once(2, Some(0), None));
    }

    #[test]
    fn stress_sweep_is_clean_without_delay() {
        assert!(run_stress(Some(vec![1, 4]), Some(2), Some(0), None));
    }

    #[test]
    fn stress_rejects_zero_targets() {
        assert!(!run_stress(Some(vec![0]), None, None, None));
    }

    #[cfg(unix)]
    #[test]
    fn cpu_times_are_available_on_unix() {
        let (user, sys) = cpu_times_seconds().expect("getrusage");
        assert!(user >= 0.0 && sys >= 0.0);
    }
}

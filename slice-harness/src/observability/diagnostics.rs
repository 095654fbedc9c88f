//! Per-visit resource diagnostics.
//!
//! Figures come from procfs and are best effort: on platforms without it the
//! snapshot fields are empty and CPU times read as zero.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Clock ticks per second assumed for `/proc/self/stat` times.
const USER_HZ: u64 = 100;

fn memory_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^Vm(Size|RSS|Peak|HWM):\s+(\d+ \wB)").ok())
        .as_ref()
}

/// Virtual memory figures for the current process, as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Current virtual size.
    pub vm_size: Option<String>,
    /// Current resident set size.
    pub vm_rss: Option<String>,
    /// Peak virtual size.
    pub vm_peak: Option<String>,
    /// Peak resident set size.
    pub vm_hwm: Option<String>,
}

impl MemorySnapshot {
    /// Reads `/proc/self/status`.
    #[must_use]
    pub fn capture() -> Self {
        std::fs::read_to_string("/proc/self/status")
            .map(|status| Self::parse(&status))
            .unwrap_or_default()
    }

    /// Extracts the `Vm*` lines from a status document.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        let mut snapshot = Self::default();
        let Some(pattern) = memory_pattern() else {
            return snapshot;
        };
        for caps in pattern.captures_iter(status) {
            let value = Some(caps[2].to_string());
            match &caps[1] {
                "Size" => snapshot.vm_size = value,
                "RSS" => snapshot.vm_rss = value,
                "Peak" => snapshot.vm_peak = value,
                "HWM" => snapshot.vm_hwm = value,
                _ => {}
            }
        }
        snapshot
    }
}

/// Accumulated CPU time of the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// Time spent in user mode.
    pub user: Duration,
    /// Time spent in kernel mode.
    pub system: Duration,
}

impl CpuTimes {
    /// Reads `/proc/self/stat`.
    #[must_use]
    pub fn capture() -> Self {
        std::fs::read_to_string("/proc/self/stat")
            .ok()
            .and_then(|stat| Self::parse(&stat))
            .unwrap_or_default()
    }

    /// Extracts `utime` and `stime` from a stat line.
    ///
    /// The command name may contain spaces, so fields are counted from the
    /// closing parenthesis.
    #[must_use]
    pub fn parse(stat: &str) -> Option<Self> {
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace().skip(11);
        let utime: u64 = fields.next()?.parse().ok()?;
        let stime: u64 = fields.next()?.parse().ok()?;
        Some(Self {
            user: ticks(utime),
            system: ticks(stime),
        })
    }
}

fn ticks(count: u64) -> Duration {
    Duration::from_millis(count.saturating_mul(1000) / USER_HZ)
}

/// Timing deltas for one visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitTiming {
    /// Wall-clock seconds.
    pub wall_secs: f64,
    /// User CPU seconds.
    pub user_secs: f64,
    /// System CPU seconds.
    pub system_secs: f64,
}

/// Measures a visit from start to finish.
#[derive(Debug, Clone, Copy)]
pub struct VisitTimer {
    started: Instant,
    cpu: CpuTimes,
}

impl VisitTimer {
    /// Starts timing now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            cpu: CpuTimes::capture(),
        }
    }

    /// Returns the deltas since [`VisitTimer::start`].
    #[must_use]
    pub fn finish(&self) -> VisitTiming {
        let cpu = CpuTimes::capture();
        VisitTiming {
            wall_secs: self.started.elapsed().as_secs_f64(),
            user_secs: cpu.user.saturating_sub(self.cpu.user).as_secs_f64(),
            system_secs: cpu.system.saturating_sub(self.cpu.system).as_secs_f64(),
        }
    }
}

/// Emits the end-of-visit diagnostic record.
pub fn log_visit(rank: i32, visit: u64, timing: &VisitTiming, memory: &MemorySnapshot) {
    info!(
        target: "visittimes",
        rank,
        visit,
        wall = timing.wall_secs,
        user = timing.user_secs,
        system = timing.system_secs,
        vm_size = memory.vm_size.as_deref().unwrap_or("-"),
        vm_rss = memory.vm_rss.as_deref().unwrap_or("-"),
        vm_peak = memory.vm_peak.as_deref().unwrap_or("-"),
        vm_hwm = memory.vm_hwm.as_deref().unwrap_or("-"),
        "Visit complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATUS: &str = "Name:\tslice\nVmPeak:\t  220188 kB\nVmSize:\t  220060 kB\nVmHWM:\t    9964 kB\nVmRSS:\t    9964 kB\nThreads:\t4\n";

    #[test]
    fn test_parse_memory_status() {
        let snapshot = MemorySnapshot::parse(STATUS);
        assert_eq!(
            snapshot,
            MemorySnapshot {
                vm_size: Some("220060 kB".into()),
                vm_rss: Some("9964 kB".into()),
                vm_peak: Some("220188 kB".into()),
                vm_hwm: Some("9964 kB".into()),
            }
        );
    }

    #[test]
    fn test_parse_memory_missing_lines() {
        assert_eq!(MemorySnapshot::parse("Name:\tx\n"), MemorySnapshot::default());
    }

    #[test]
    fn test_parse_stat_with_spaces_in_name() {
        let stat = "4242 (slice worker) S 1 4242 4242 0 -1 4194304 500 0 0 0 250 30 0 0 20 0 4 0 100 0";
        let cpu = CpuTimes::parse(stat).unwrap();
        assert_eq!(cpu.user, Duration::from_millis(2500));
        assert_eq!(cpu.system, Duration::from_millis(300));
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(CpuTimes::parse("1 (x) S 1 2").is_none());
    }

    #[test]
    fn test_timer_is_monotonic() {
        let timer = VisitTimer::start();
        let timing = timer.finish();
        assert!(timing.wall_secs >= 0.0);
        assert!(timing.user_secs >= 0.0);
    }
}

//! CPU time sampling and utilisation.
//!
//! Utilisation follows one formula everywhere:
//! `(user + system) / (wall × logical_cpus) × 100`.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Accumulated user and system CPU time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: Duration,
    pub system: Duration,
}

impl CpuTimes {
    /// CPU time consumed by the whole process so far.
    pub fn process() -> Self {
        sample(Scope::Process)
    }

    /// CPU time consumed by the calling thread so far.
    ///
    /// Falls back to process scope where the platform has no per-thread
    /// counter.
    pub fn thread() -> Self {
        sample(Scope::Thread)
    }

    /// User plus system time.
    pub fn total(&self) -> Duration {
        self.user + self.system
    }

    /// Time elapsed between an earlier sample and this one.
    pub fn since(&self, earlier: &CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(earlier.user),
            system: self.system.saturating_sub(earlier.system),
        }
    }
}

/// Which counter a [`CpuSampler`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Process,
    Thread,
}

/// Measures CPU time and wall time over one window.
///
/// A thread-scoped sampler must be finished on the thread that started it.
#[derive(Debug, Clone, Copy)]
pub struct CpuSampler {
    scope: Scope,
    cpu_start: CpuTimes,
    wall_start: Instant,
}

impl CpuSampler {
    /// Start a window on the given counter.
    pub fn start(scope: Scope) -> Self {
        Self {
            scope,
            cpu_start: sample(scope),
            wall_start: Instant::now(),
        }
    }

    /// CPU time consumed since the window started.
    pub fn cpu_elapsed(&self) -> CpuTimes {
        sample(self.scope).since(&self.cpu_start)
    }

    /// Wall time since the window started.
    pub fn wall_elapsed(&self) -> Duration {
        self.wall_start.elapsed()
    }

    /// Close the window and compute utilisation against `cpus` logical CPUs.
    pub fn finish(&self, cpus: usize) -> CpuUsage {
        let cpu = self.cpu_elapsed();
        let wall = self.wall_elapsed();
        CpuUsage {
            cpu,
            wall,
            percent: cpu_utilization(cpu.total(), wall, cpus),
        }
    }
}

/// Result of a closed sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuUsage {
    pub cpu: CpuTimes,
    pub wall: Duration,
    pub percent: f64,
}

/// Utilisation percentage of `cpu` over `wall` across `cpus` logical CPUs.
///
/// Returns 0 when the wall window is empty.
pub fn cpu_utilization(cpu: Duration, wall: Duration, cpus: usize) -> f64 {
    let wall_secs = wall.as_secs_f64();
    if wall_secs <= 0.0 {
        return 0.0;
    }
    cpu.as_secs_f64() / (wall_secs * cpus.max(1) as f64) * 100.0
}

/// Number of logical CPUs on the machine.
///
/// Affinity masks and cgroup quotas are ignored, so a restricted process
/// still divides by every online CPU. Falls back to the available
/// parallelism when the CPU list cannot be read.
pub fn logical_cpus() -> usize {
    static LOGICAL_CPUS: OnceLock<usize> = OnceLock::new();
    *LOGICAL_CPUS.get_or_init(|| {
        let mut system = sysinfo::System::new();
        system.refresh_cpu_all();
        match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            count => count,
        }
    })
}

#[cfg(unix)]
fn sample(scope: Scope) -> CpuTimes {
    let who = match scope {
        Scope::Process => libc::RUSAGE_SELF,
        #[cfg(target_os = "linux")]
        Scope::Thread => libc::RUSAGE_THREAD,
        #[cfg(not(target_os = "linux"))]
        Scope::Thread => libc::RUSAGE_SELF,
    };

    // SAFETY: getrusage only writes into the provided struct.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(who, &mut usage) };
    if rc != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "getrusage failed, reporting zero CPU time"
        );
        return CpuTimes::default();
    }

    CpuTimes {
        user: timeval_to_duration(usage.ru_utime),
        system: timeval_to_duration(usage.ru_stime),
    }
}

#[cfg(not(unix))]
fn sample(_scope: Scope) -> CpuTimes {
    CpuTimes::default()
}

#[cfg(unix)]
fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Duration::new(secs, 0) + Duration::from_micros(micros as u64)
}

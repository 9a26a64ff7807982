//! Capped exponential backoff for spin loops.

/// Upper bound on pause iterations per snooze.
pub const MAX_SPINS: u32 = 1 << 16;

/// Doubling spin budget, capped at [`MAX_SPINS`].
///
/// Each [`snooze`](Self::snooze) burns the current budget in CPU pause hints
/// (or scheduler yields on targets without one) and then doubles it. Spreading
/// retries out this way keeps contended waiters from hammering the same cache
/// line.
#[derive(Debug, Clone)]
pub struct Backoff {
    spins: u32,
}

impl Backoff {
    #[inline]
    pub const fn new() -> Self {
        Self { spins: 1 }
    }

    /// Current budget in pause iterations.
    #[inline]
    pub const fn spins(&self) -> u32 {
        self.spins
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spins = 1;
    }

    /// Waits for the current budget, then doubles it.
    #[inline]
    pub fn snooze(&mut self) {
        for _ in 0..self.spins {
            cpu_relax();
        }
        self.spins = self.spins.saturating_mul(2).min(MAX_SPINS);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One pause hint (`pause` on x86, `yield`/`isb` on ARM).
#[cfg(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "riscv32",
    target_arch = "riscv64",
))]
#[inline(always)]
fn cpu_relax() {
    std::hint::spin_loop();
}

/// No pause instruction here; give the time slice away instead.
#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "riscv32",
    target_arch = "riscv64",
)))]
#[inline(always)]
fn cpu_relax() {
    std::thread::yield_now();
}

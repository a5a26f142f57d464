//! Per-call timing and throughput statistics.
//!
//! Statistics are computed and logged only when the execution context is
//! verbose. They never feed back into results or control flow.

use std::time::{Duration, Instant};

use crate::context::ExecutionContext;
use crate::validate::GemmDims;

/// Wall-clock timer around one kernel call.
#[derive(Debug, Clone)]
pub struct CpuTimer {
    name: &'static str,
    start: Instant,
    elapsed: Option<Duration>,
}

impl CpuTimer {
    /// Starts timing immediately.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            elapsed: None,
        }
    }

    pub fn stop(&mut self) {
        self.elapsed = Some(self.start.elapsed());
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Elapsed nanoseconds; reads the clock if the timer is still running.
    #[must_use]
    pub fn nanos(&self) -> u128 {
        self.elapsed
            .unwrap_or_else(|| self.start.elapsed())
            .as_nanos()
    }
}

/// Throughput figures for a (batched) GEMM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmStats {
    pub dims: GemmDims,
    pub elem_size: usize,
}

impl GemmStats {
    #[must_use]
    pub const fn new(dims: GemmDims, elem_size: usize) -> Self {
        Self { dims, elem_size }
    }

    #[must_use]
    pub const fn math_ops(&self) -> usize {
        self.dims.math_ops()
    }

    /// Bytes touched: `batch · (m·k + k·n + m·n) · elem_size`.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        let GemmDims { batch, m, n, k } = self.dims;
        batch * (m * k + k * n + m * n) * self.elem_size
    }

    /// Bytes per nanosecond, i.e. GB/s.
    #[must_use]
    pub fn bandwidth(&self, nanos: u128) -> f64 {
        per_nano(self.bytes(), nanos)
    }

    /// Operations per nanosecond, i.e. GFLOPS.
    #[must_use]
    pub fn gflops(&self, nanos: u128) -> f64 {
        per_nano(self.math_ops(), nanos)
    }
}

/// Operation count for a direct convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvStats {
    pub math_ops: usize,
    pub bytes: usize,
}

impl ConvStats {
    /// `output` and `filter` are logical `(N, O, out…)` and `(O, I, k…)` dims.
    #[must_use]
    pub fn new(input: &[usize], filter: &[usize], output: &[usize], elem_size: usize) -> Self {
        let out_elems: usize = output.iter().product();
        let taps: usize = filter.iter().skip(1).product();
        let elems = input.iter().product::<usize>() + filter.iter().product::<usize>() + out_elems;
        Self {
            math_ops: 2 * out_elems * taps,
            bytes: elems * elem_size,
        }
    }

    #[must_use]
    pub fn gflops(&self, nanos: u128) -> f64 {
        per_nano(self.math_ops, nanos)
    }
}

#[allow(clippy::cast_precision_loss)]
fn per_nano(count: usize, nanos: u128) -> f64 {
    count as f64 / nanos.max(1) as f64
}

/// Logs a finished GEMM timer if the context asks for statistics.
pub fn log_gemm(ctx: &dyn ExecutionContext, timer: &CpuTimer, stats: &GemmStats) {
    if !ctx.verbose() {
        return;
    }
    let nanos = timer.nanos();
    let GemmDims { batch, m, n, k } = stats.dims;
    log::debug!(
        "{}: batch = {batch}, m = {m}, n = {n}, k = {k}, {nanos} ns, Math Ops = {}, Bytes = {}, \
         Bandwidth = {:.3} GB/s, GFLOPS = {:.3}",
        timer.name(),
        stats.math_ops(),
        stats.bytes(),
        stats.bandwidth(nanos),
        stats.gflops(nanos),
    );
}

/// Logs a finished convolution timer if the context asks for statistics.
pub fn log_conv(ctx: &dyn ExecutionContext, timer: &CpuTimer, stats: &ConvStats) {
    if !ctx.verbose() {
        return;
    }
    let nanos = timer.nanos();
    log::debug!(
        "{}: {nanos} ns, Math Ops = {}, Bytes = {}, GFLOPS = {:.3}",
        timer.name(),
        stats.math_ops,
        stats.bytes,
        stats.gflops(nanos),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_monotonic_time() {
        let mut timer = CpuTimer::start("test");
        let running = timer.nanos();
        timer.stop();
        let stopped = timer.nanos();
        assert!(stopped >= running);
        // a stopped timer no longer advances
        assert_eq!(timer.nanos(), stopped);
        assert_eq!(timer.name(), "test");
    }

    #[test]
    fn gemm_figures() {
        let stats = GemmStats::new(GemmDims { batch: 2, m: 4, n: 5, k: 3 }, 4);
        assert_eq!(stats.math_ops(), 2 * 2 * 4 * 5 * 3);
        assert_eq!(stats.bytes(), 2 * (12 + 15 + 20) * 4);
        assert!((stats.gflops(240) - 1.0).abs() < 1e-9);
        assert!((stats.bandwidth(376) - 1.0).abs() < 1e-9);
        // a zero-length timing does not divide by zero
        assert!(stats.gflops(0).is_finite());
    }

    #[test]
    fn conv_figures() {
        // 1x8x5x5 input, 6x4x3x3 filter (2 groups), 1x6x3x3 output
        let stats = ConvStats::new(&[1, 8, 5, 5], &[6, 4, 3, 3], &[1, 6, 3, 3], 4);
        assert_eq!(stats.math_ops, 2 * 54 * 36);
        assert_eq!(stats.bytes, (200 + 216 + 54) * 4);
    }
}

// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU timestamp source used by semaphore releases.

use std::time::Instant;

/// Monotonic GPU timer. Ticks advance at 384/625 per nanosecond, the rate
/// guest drivers expect from semaphore timestamps.
#[derive(Debug, Clone, Copy)]
pub struct GpuClock {
    start: Instant,
}

impl GpuClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn ticks(&self) -> u64 {
        nanos_to_ticks(self.start.elapsed().as_nanos())
    }
}

impl Default for GpuClock {
    fn default() -> Self {
        Self::new()
    }
}

fn nanos_to_ticks(nanos: u128) -> u64 {
    // Split to keep the multiply from overflowing on long uptimes.
    let whole = (nanos / 625) * 384;
    let rest = (nanos % 625) * 384 / 625;
    (whole + rest) as u64
}

//! # 27 MHz Tick Clock
//!
//! Block admission times and the retention window are expressed in ticks of
//! a 27 MHz monotonic clock, the MPEG system clock frequency. RTP timestamps
//! are the same clock divided down to 90 kHz.

use std::time::Duration;

/// A point in time or a span, in 27 MHz ticks.
pub type Tick = u64;

/// Tick frequency in Hz.
pub const TICK_HZ: u64 = 27_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MS: Tick = TICK_HZ / 1000;

/// Divisor from the tick domain to the 90 kHz RTP clock.
pub const RTP_CLOCK_DIVISOR: Tick = TICK_HZ / 90_000;

/// Convert milliseconds to ticks (saturating).
pub fn ticks_from_millis(ms: u64) -> Tick {
    ms.saturating_mul(TICKS_PER_MS)
}

/// Convert a [`Duration`] to ticks.
pub fn ticks_from_duration(d: Duration) -> Tick {
    d.as_secs()
        .saturating_mul(TICK_HZ)
        .saturating_add(u64::from(d.subsec_nanos()) * 27 / 1000)
}

/// 90 kHz RTP timestamp for a tick date. Wraps with the 32-bit field.
pub fn rtp_timestamp(now: Tick) -> u32 {
    (now / RTP_CLOCK_DIVISOR) as u32
}

/// Monotonic clock reporting ticks since its creation.
///
/// Backed by [`quanta::Clock`] so tests can drive it with a mock.
pub struct TickClock {
    clock: quanta::Clock,
    epoch: quanta::Instant,
}

impl TickClock {
    pub fn new() -> Self {
        Self::from_clock(quanta::Clock::new())
    }

    /// Build on an existing clock, e.g. one returned by `quanta::Clock::mock()`.
    pub fn from_clock(clock: quanta::Clock) -> Self {
        let epoch = clock.now();
        TickClock { clock, epoch }
    }

    /// Current date in ticks.
    pub fn now(&self) -> Tick {
        ticks_from_duration(self.clock.now().duration_since(self.epoch))
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_duration_agree() {
        assert_eq!(ticks_from_millis(500), 13_500_000);
        assert_eq!(ticks_from_duration(Duration::from_millis(500)), 13_500_000);
        assert_eq!(ticks_from_duration(Duration::from_micros(1)), 27);
    }

    #[test]
    fn rtp_timestamp_is_90khz() {
        assert_eq!(rtp_timestamp(TICK_HZ), 90_000);
        assert_eq!(rtp_timestamp(299), 0);
        assert_eq!(rtp_timestamp(300), 1);
    }

    #[test]
    fn rtp_timestamp_wraps() {
        let wrap = (u64::from(u32::MAX) + 1) * RTP_CLOCK_DIVISOR;
        assert_eq!(rtp_timestamp(wrap), 0);
        assert_eq!(rtp_timestamp(wrap + 300), 1);
    }

    #[test]
    fn mock_clock_drives_ticks() {
        let (clock, mock) = quanta::Clock::mock();
        let ticks = TickClock::from_clock(clock);
        assert_eq!(ticks.now(), 0);
        mock.increment(Duration::from_millis(2));
        assert_eq!(ticks.now(), 2 * TICKS_PER_MS);
    }

    #[test]
    fn real_clock_monotonic() {
        let clock = TickClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(1));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}

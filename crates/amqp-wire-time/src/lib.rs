//! Monotonic clock and heartbeat deadline arithmetic.
//!
//! The rest of the workspace never reads the wall clock: every deadline
//! is derived from [`now`], which reports nanoseconds since an
//! unspecified epoch from a monotonic source, or `0` to signal that the
//! clock itself failed. Callers must treat `0` as a hard error
//! (`TimerFailure` in `amqp-wire`), never as "no time has passed".

/// Returns monotonic nanoseconds, or `0` if the underlying clock call
/// failed.
///
/// Backed directly by `clock_gettime(CLOCK_MONOTONIC, ..)`; this
/// deliberately does not fall back to `SystemTime` on failure, since a
/// wall-clock substitute can jump backwards and silently violate the
/// deadlines computed from it.
#[must_use]
pub fn now() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // Safety: `ts` is a valid, exclusively-owned timespec and
    // CLOCK_MONOTONIC is always a supported clockid.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    let secs = ts.tv_sec.max(0) as u64;
    let nanos = ts.tv_nsec.max(0) as u64;
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

/// Heartbeat deadlines derived from a negotiated interval.
///
/// `interval_secs == 0` disables heartbeating entirely; callers should
/// not consult these deadlines in that case (mirrors `tune`'s
/// `heartbeat_interval > 0` guard in the connection engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatDeadlines {
    pub next_send: u64,
    pub next_recv: u64,
}

impl HeartbeatDeadlines {
    /// Recomputes both deadlines from a clock reading `now_ns` and a
    /// negotiated heartbeat interval in seconds: send silence is capped
    /// at `interval / 2`, receive silence at `2 * interval`.
    #[must_use]
    pub fn from_now(now_ns: u64, interval_secs: u16) -> Self {
        let interval_ns = u64::from(interval_secs) * 1_000_000_000;
        Self {
            next_send: now_ns.saturating_add(interval_ns / 2),
            next_recv: now_ns.saturating_add(interval_ns.saturating_mul(2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic_and_nonzero() {
        let a = now();
        let b = now();
        assert!(a > 0, "clock_gettime(CLOCK_MONOTONIC) should not fail here");
        assert!(b >= a);
    }

    #[test]
    fn deadlines_halve_and_double_the_interval() {
        let d = HeartbeatDeadlines::from_now(1_000_000_000, 10);
        assert_eq!(d.next_send, 1_000_000_000 + 5_000_000_000);
        assert_eq!(d.next_recv, 1_000_000_000 + 20_000_000_000);
    }

    #[test]
    fn deadlines_saturate_instead_of_overflowing() {
        let d = HeartbeatDeadlines::from_now(u64::MAX - 10, u16::MAX);
        assert_eq!(d.next_send, u64::MAX);
        assert_eq!(d.next_recv, u64::MAX);
    }
}

//! Monotonic and wall clocks, normalized duration arithmetic, and absolute
//! deadline computation.
//!
//! [`Time`] is a plain `{sec, nsec}` pair rather than `std::time::Instant` /
//! `SystemTime` on purpose: it has to be storable inside a shared-memory
//! header (as `ts_sec`/`ts_nsec` on a captured frame, for instance) and be
//! meaningful when read back by an unrelated process, which an opaque
//! `Instant` can never be.

use std::cmp::Ordering;
use tao_error::{ErrorKind, Result, TaoError};

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// A `{sec, nsec}` timestamp or duration, laid out so it can be embedded
/// directly inside a shared-memory region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub sec: i64,
    pub nsec: i64,
}

impl Time {
    pub const ZERO: Time = Time { sec: 0, nsec: 0 };

    /// Sentinel returned by [`from_seconds`] for `NaN` input.
    pub const INVALID: Time = Time { sec: 0, nsec: -1 };

    /// The saturation value used by [`absolute_deadline`] on overflow and
    /// recognized by [`is_finite`] as "never".
    pub const MAX: Time = Time {
        sec: i64::MAX,
        nsec: NSEC_PER_SEC - 1,
    };

    pub const MIN: Time = Time {
        sec: i64::MIN,
        nsec: 0,
    };

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.sec, self.nsec).cmp(&(other.sec, other.nsec))
    }
}

/// Reduce `nsec` into `[0, 10^9)`, carrying the remainder into `sec`.
/// Idempotent: `normalize(normalize(t)) == normalize(t)`.
#[must_use]
pub fn normalize(t: Time) -> Time {
    if t == Time::INVALID {
        return t;
    }
    let extra_sec = t.nsec.div_euclid(NSEC_PER_SEC);
    let nsec = t.nsec.rem_euclid(NSEC_PER_SEC);
    let sec = t.sec.saturating_add(extra_sec);
    Time { sec, nsec }
}

#[must_use]
pub fn add(a: Time, b: Time) -> Time {
    normalize(Time {
        sec: a.sec.saturating_add(b.sec),
        nsec: a.nsec.saturating_add(b.nsec),
    })
}

#[must_use]
pub fn sub(a: Time, b: Time) -> Time {
    normalize(Time {
        sec: a.sec.saturating_sub(b.sec),
        nsec: a.nsec.saturating_sub(b.nsec),
    })
}

#[must_use]
pub fn to_seconds(t: Time) -> f64 {
    t.sec as f64 + (t.nsec as f64) / NSEC_PER_SEC as f64
}

/// Build a [`Time`] from a floating-point second count, saturating at the
/// extremes and mapping `NaN` to [`Time::INVALID`].
#[must_use]
pub fn from_seconds(s: f64) -> Time {
    if s.is_nan() {
        return Time::INVALID;
    }
    if s >= i64::MAX as f64 {
        return Time {
            sec: i64::MAX,
            nsec: 0,
        };
    }
    if s <= i64::MIN as f64 {
        return Time {
            sec: i64::MIN,
            nsec: 0,
        };
    }
    let sec = s.trunc() as i64;
    let nsec = ((s - s.trunc()) * NSEC_PER_SEC as f64).round() as i64;
    normalize(Time { sec, nsec })
}

fn clock_gettime(clock: libc::clockid_t) -> Result<Time> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, fully-owned `timespec` the kernel only writes into.
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
        return Err(TaoError::new("clock_gettime", ErrorKind::SystemError(errno)));
    }
    Ok(Time {
        sec: ts.tv_sec as i64,
        nsec: ts.tv_nsec as i64,
    })
}

/// The current value of `CLOCK_MONOTONIC`. Never decreases within one boot,
/// not comparable across machines, and immune to wall-clock adjustment.
pub fn now_monotonic() -> Result<Time> {
    clock_gettime(libc::CLOCK_MONOTONIC)
}

/// The current value of `CLOCK_REALTIME` ("wall clock").
pub fn now_realtime() -> Result<Time> {
    clock_gettime(libc::CLOCK_REALTIME)
}

/// Compute an absolute deadline `duration_secs` seconds from realtime now,
/// saturating to [`Time::MAX`] on overflow.
pub fn absolute_deadline(duration_secs: f64) -> Result<Time> {
    let now = now_realtime()?;
    let d = from_seconds(duration_secs);
    if d == Time::INVALID {
        return Err(TaoError::new("absolute_deadline", ErrorKind::BadArgument));
    }
    Ok(checked_add_saturating(now, d))
}

fn checked_add_saturating(a: Time, b: Time) -> Time {
    match a.sec.checked_add(b.sec) {
        Some(sec) => normalize(Time {
            sec,
            nsec: a.nsec.saturating_add(b.nsec),
        }),
        None => Time::MAX,
    }
}

/// `false` iff `deadline` is the saturation sentinel produced when an
/// absolute deadline overflowed — i.e. "never times out".
#[must_use]
pub fn is_finite(deadline: Time) -> bool {
    deadline != Time::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let t = Time {
            sec: 1,
            nsec: 3_500_000_000,
        };
        let once = normalize(t);
        let twice = normalize(once);
        assert_eq!(once, twice);
        assert!((0..NSEC_PER_SEC).contains(&once.nsec));
        assert_eq!(once, Time { sec: 4, nsec: 500_000_000 });
    }

    #[test]
    fn normalize_handles_negative_nsec() {
        let t = Time { sec: 5, nsec: -1 };
        let n = normalize(t);
        assert_eq!(n, Time { sec: 4, nsec: NSEC_PER_SEC - 1 });
    }

    #[test]
    fn from_seconds_nan_is_invalid() {
        assert_eq!(from_seconds(f64::NAN), Time::INVALID);
        assert!(!from_seconds(1.0).eq(&Time::INVALID));
    }

    #[test]
    fn from_seconds_saturates() {
        assert_eq!(from_seconds(f64::INFINITY).sec, i64::MAX);
        assert_eq!(from_seconds(f64::NEG_INFINITY).sec, i64::MIN);
    }

    #[test]
    fn from_seconds_round_trips_small_values() {
        let t = from_seconds(1.5);
        assert_eq!(t, Time { sec: 1, nsec: 500_000_000 });
        assert!((to_seconds(t) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn add_and_sub_agree() {
        let a = Time { sec: 10, nsec: 0 };
        let b = Time { sec: 0, nsec: 25_000_000 };
        let sum = add(a, b);
        assert_eq!(sum, Time { sec: 10, nsec: 25_000_000 });
        assert_eq!(sub(sum, b), a);
    }

    #[test]
    fn monotonic_does_not_go_backwards() {
        let a = now_monotonic().unwrap();
        let b = now_monotonic().unwrap();
        assert!(b >= a);
    }

    #[test]
    fn absolute_deadline_is_finite_for_small_durations() {
        let d = absolute_deadline(1.0).unwrap();
        assert!(is_finite(d));
    }

    #[test]
    fn absolute_deadline_saturates_on_overflow() {
        let d = absolute_deadline(f64::MAX).unwrap();
        assert!(!is_finite(d));
        assert_eq!(d, Time::MAX);
    }

    /// P6: `normalize` is idempotent for any `{sec, nsec}` pair, and its
    /// output always has `0 <= nsec < 1e9`.
    #[test]
    fn property_p6_normalize_is_idempotent() {
        use proptest::prelude::*;
        proptest!(|(sec in any::<i64>(), nsec in any::<i64>())| {
            let t = Time { sec, nsec };
            prop_assume!(t != Time::INVALID);
            let once = normalize(t);
            let twice = normalize(once);
            prop_assert_eq!(once, twice);
            prop_assert!((0..NSEC_PER_SEC).contains(&once.nsec));
        });
    }
}

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Absolute point on the UTC clock, second/nanosecond split.
/// Timed lock and wait operations take deadlines in this form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        let extra = nsec / NANOS_PER_SEC;
        Self {
            sec: sec.saturating_add(extra as i64),
            nsec: nsec % NANOS_PER_SEC,
        }
    }
}

/// Current UTC time.
pub fn timespec_get() -> Timespec {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => Timespec {
            sec: since.as_secs() as i64,
            nsec: since.subsec_nanos(),
        },
        Err(before) => {
            let back = before.duration();
            Timespec {
                sec: -(back.as_secs() as i64),
                nsec: back.subsec_nanos(),
            }
        }
    }
}

/// UTC deadline `dur` from now.
pub fn timespec_after(dur: Duration) -> Timespec {
    let now = timespec_get();
    let mut sec = now.sec.saturating_add(dur.as_secs() as i64);
    let mut nsec = now.nsec + dur.subsec_nanos();
    if nsec >= NANOS_PER_SEC {
        nsec -= NANOS_PER_SEC;
        sec = sec.saturating_add(1);
    }
    Timespec { sec, nsec }
}

/// Monotonic time since the first call on this process.
pub fn monotonic_now() -> Duration {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed()
}

/// Time left until `deadline` on the UTC clock, zero if already past.
pub(crate) fn remaining_until(deadline: &Timespec) -> Duration {
    let now = timespec_get();
    if *deadline <= now {
        return Duration::ZERO;
    }
    let mut sec = deadline.sec - now.sec;
    let nsec = if deadline.nsec >= now.nsec {
        deadline.nsec - now.nsec
    } else {
        sec -= 1;
        NANOS_PER_SEC + deadline.nsec - now.nsec
    };
    if sec < 0 {
        return Duration::ZERO;
    }
    Duration::new(sec as u64, nsec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_in_the_past_has_no_remaining_time() {
        let past = Timespec { sec: 0, nsec: 0 };
        assert_eq!(remaining_until(&past), Duration::ZERO);
    }

    #[test]
    fn timespec_after_orders_with_now() {
        let now = timespec_get();
        let later = timespec_after(Duration::from_secs(5));
        assert!(later > now);
    }

    #[test]
    fn nanosecond_overflow_carries_into_seconds() {
        let ts = Timespec::new(1, 1_500_000_000);
        assert_eq!(ts.sec, 2);
        assert_eq!(ts.nsec, 500_000_000);
    }
}

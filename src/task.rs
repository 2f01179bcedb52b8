//! Periodic timing for rate-limited loops.
//!
//! [`Task`] paces a loop at a fixed period. On Linux it is backed by a
//! timerfd, which both blocks precisely and exposes a descriptor that
//! poll-based workers can multiplex with their shutdown event. Elsewhere
//! (or when timerfd creation fails) it falls back to chunked sleeping
//! against a monotonic deadline and reports missed periods the same way.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};

use rustix::fd::BorrowedFd;

#[cfg(target_os = "linux")]
use rustix::fd::{AsFd, OwnedFd};
#[cfg(target_os = "linux")]
use rustix::time::{
    timerfd_create, timerfd_settime, Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags,
    Timespec,
};

/// Sleep granularity of the fallback path; bounds oversleep on systems
/// with coarse scheduler ticks.
const SLEEP_CHUNK: Duration = Duration::from_millis(50);

/// A periodic timer.
///
/// [`Task::wait`] blocks until the next period boundary and returns how
/// many periods elapsed since the previous wait: 1 when the loop keeps
/// up, more when it fell behind.
#[derive(Debug)]
pub struct Task {
    period: Duration,
    #[cfg(target_os = "linux")]
    fd: Option<OwnedFd>,
    next: Instant,
}

impl Task {
    /// Timer firing `rate` times per second.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] unless `rate` is finite and positive.
    pub fn rate(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Config(format!("invalid timer rate {rate}")));
        }
        let period = Duration::try_from_secs_f64(1.0 / rate)
            .map_err(|_| Error::Config(format!("invalid timer rate {rate}")))?;
        Self::interval(period)
    }

    /// Timer firing every `period`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `period` is zero.
    pub fn interval(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config("timer period must be non-zero".into()));
        }
        Ok(Self {
            period,
            #[cfg(target_os = "linux")]
            fd: arm_timerfd(period),
            next: Instant::now() + period,
        })
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The timer's descriptor, readable whenever a period has elapsed.
    /// `None` in sleep mode; callers needing poll-based multiplexing must
    /// check this up front.
    #[cfg(target_os = "linux")]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// The timer's descriptor; always `None` without timerfd support.
    #[cfg(not(target_os = "linux"))]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    /// Block until the next period boundary, returning the number of
    /// elapsed periods (≥ 1).
    pub fn wait(&mut self) -> Result<u64> {
        #[cfg(target_os = "linux")]
        if let Some(fd) = &self.fd {
            loop {
                let mut buf = [0u8; 8];
                match rustix::io::read(fd, &mut buf) {
                    Ok(_) => return Ok(u64::from_ne_bytes(buf)),
                    Err(rustix::io::Errno::INTR) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.wait_sleeping()
    }

    fn wait_sleeping(&mut self) -> Result<u64> {
        let now = Instant::now();
        let steps = if now < self.next {
            let mut remaining = self.next - now;
            while !remaining.is_zero() {
                std::thread::sleep(remaining.min(SLEEP_CHUNK));
                remaining = self.next.saturating_duration_since(Instant::now());
            }
            1
        } else {
            1 + ((now - self.next).as_nanos() / self.period.as_nanos()) as u64
        };

        self.next += self.period.saturating_mul(steps.min(u64::from(u32::MAX)) as u32);
        Ok(steps)
    }
}

#[cfg(target_os = "linux")]
fn arm_timerfd(period: Duration) -> Option<OwnedFd> {
    let spec = Itimerspec {
        it_interval: Timespec {
            tv_sec: period.as_secs() as i64,
            tv_nsec: i64::from(period.subsec_nanos()),
        },
        it_value: Timespec {
            tv_sec: period.as_secs() as i64,
            tv_nsec: i64::from(period.subsec_nanos()),
        },
    };

    let fd = match timerfd_create(TimerfdClockId::Monotonic, TimerfdFlags::CLOEXEC) {
        Ok(fd) => fd,
        Err(err) => {
            tracing::warn!(%err, "timerfd unavailable, pacing with sleeps");
            return None;
        }
    };
    match timerfd_settime(&fd, TimerfdTimerFlags::empty(), &spec) {
        Ok(_) => Some(fd),
        Err(err) => {
            tracing::warn!(%err, "timerfd arm failed, pacing with sleeps");
            None
        }
    }
}

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

/// Source of wall clock and monotonic time, and the only way the
/// acquisition code is allowed to block without doing network I/O.
/// Swapping it out lets the poll loop and the interval loop run without
/// real delays.
pub trait Clock {
    /// Current local time, used for camera file names.
    fn now(&self) -> DateTime<Local>;
    /// Monotonic time, used to measure waits and durations. Unaffected
    /// by steps of the wall clock.
    fn instant(&self) -> Instant;
    /// Block the calling thread.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }

    fn instant(&self) -> Instant {
        (**self).instant()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// A clock that only moves when slept on. Records every sleep.
#[cfg(test)]
pub mod manual {
    use super::Clock;
    use chrono::{DateTime, Local, TimeZone};
    use std::{
        cell::RefCell,
        time::{Duration, Instant},
    };

    pub struct ManualClock {
        now: RefCell<DateTime<Local>>,
        started: Instant,
        slept: RefCell<Duration>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl ManualClock {
        /// Start the clock at the given local date and time.
        pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
            let start = Local
                .with_ymd_and_hms(year, month, day, hour, min, sec)
                .single()
                .expect("Ambiguous local time");
            Self {
                now: RefCell::new(start),
                started: Instant::now(),
                slept: RefCell::new(Duration::ZERO),
                sleeps: RefCell::new(Vec::new()),
            }
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.borrow().clone()
        }

        /// Step the wall clock back, as an NTP correction would. Monotonic
        /// time is left alone.
        pub fn step_back(&self, by: Duration) {
            let step = chrono::Duration::from_std(by).expect("Step out of range");
            let previous = *self.now.borrow() - step;
            *self.now.borrow_mut() = previous;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.borrow()
        }

        fn instant(&self) -> Instant {
            self.started + *self.slept.borrow()
        }

        fn sleep(&self, duration: Duration) {
            let step = chrono::Duration::from_std(duration).expect("Sleep out of range");
            let next = *self.now.borrow() + step;
            *self.now.borrow_mut() = next;
            *self.slept.borrow_mut() += duration;
            self.sleeps.borrow_mut().push(duration);
        }
    }
}

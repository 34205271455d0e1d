use beacon_core::config::Timezone;
use chrono::{Local, NaiveDateTime, Utc};

/// Source of wall-clock time for `DailyAt` matching.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host clock, read in local time or UTC.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Timezone,
}

impl SystemClock {
    pub fn new(tz: Timezone) -> Self {
        Self { tz }
    }

    pub fn local() -> Self {
        Self::new(Timezone::Local)
    }

    pub fn utc() -> Self {
        Self::new(Timezone::Utc)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        match self.tz {
            Timezone::Local => Local::now().naive_local(),
            Timezone::Utc => Utc::now().naive_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_clock_tracks_chrono_utc() {
        let before = Utc::now().naive_utc();
        let now = SystemClock::utc().now();
        let after = Utc::now().naive_utc();
        assert!(before <= now && now <= after);
    }

    #[test]
    fn local_clock_tracks_chrono_local() {
        let before = Local::now().naive_local();
        let now = SystemClock::local().now();
        let after = Local::now().naive_local();
        assert!(before <= now && now <= after);
    }
}

//! Current-time source shared by the reconciler and every writer of
//! start/end timestamps.
//!
//! All instants are stored in UTC. The clock additionally carries the civil
//! timezone in which users enter wall-clock times, so a naive `09:00` typed
//! into the availability form is interpreted the same way everywhere.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

/// Timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

/// Source of "now" plus the civil timezone used to read local input.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The civil timezone for interpreting naive local timestamps.
    fn timezone(&self) -> Tz;

    /// Interpret a naive wall-clock time in the civil timezone.
    ///
    /// Ambiguous times (DST fold) resolve to the earlier instant; times that
    /// do not exist (DST gap) yield `None`.
    fn localize(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.timezone().from_local_datetime(&local) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => None,
        }
    }

    /// Render an instant in the civil timezone.
    fn to_local(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone())
    }
}

/// Wall clock pinned to a fixed civil timezone.
#[derive(Debug, Clone, Copy)]
pub struct CivilClock {
    tz: Tz,
}

impl CivilClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Build from an IANA name such as `Asia/Kolkata`.
    pub fn from_name(name: &str) -> Result<Self, String> {
        let tz: Tz = name
            .trim()
            .parse()
            .map_err(|_| format!("Unknown timezone: {}", name))?;
        Ok(Self::new(tz))
    }
}

impl Default for CivilClock {
    fn default() -> Self {
        Self::new(chrono_tz::Asia::Kolkata)
    }
}

impl Clock for CivilClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
    tz: Tz,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_timezone(now, chrono_tz::Asia::Kolkata)
    }

    pub fn with_timezone(now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            now: RwLock::new(now),
            tz,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

//! Software wall clock that survives deep sleep.
//!
//! There is no trustworthy RTC on the master, so the date is kept as a
//! persisted timestamp that is advanced by the armed sleep duration on every
//! wake.

use core::fmt::{self, Write};

use thiserror_no_std::Error;

use crate::storage::{FileSystem, StorageError};

/// State file holding the last persisted timestamp.
pub const CLOCK_FILE: &str = "DATETIME.TXT";

/// Length of `YYYY-MM-DDTHH:MM:SS`.
pub const ISO_LEN: usize = 19;

/// Rendered timestamp. Sized for the widest year a `u16` can hold.
pub type IsoTimestamp = heapless::String<24>;

/// Date used on first boot and whenever the persisted one is unusable.
pub const DEFAULT_DATETIME: VirtualDateTime = VirtualDateTime {
    year: 2026,
    month: 1,
    day: 17,
    hour: 0,
    minute: 0,
    second: 0,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("persisted timestamp is malformed")]
    Malformed,
    #[error("clock storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

pub const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub const fn days_in_month(month: u8, year: u16) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

impl VirtualDateTime {
    /// Add `seconds`, carrying through every field up to the year.
    pub fn advance(&mut self, seconds: u32) {
        let total = self.second as u64 + seconds as u64;
        self.second = (total % 60) as u8;

        let total = self.minute as u64 + total / 60;
        self.minute = (total % 60) as u8;

        let total = self.hour as u64 + total / 60;
        self.hour = (total % 24) as u8;

        let mut days = total / 24;
        while days > 0 {
            let remaining = days_in_month(self.month, self.year).saturating_sub(self.day) as u64;
            if days <= remaining {
                self.day += days as u8;
                break;
            }

            days -= remaining + 1;
            self.day = 1;
            if self.month == 12 {
                self.month = 1;
                self.year = self.year.saturating_add(1);
            } else {
                self.month += 1;
            }
        }
    }

    pub fn is_normalized(&self) -> bool {
        (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.month, self.year)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    /// Parse the leading `YYYY-MM-DDTHH:MM:SS` of `text`.
    ///
    /// Trailing content (the newline the clock file ends with) is ignored.
    pub fn parse_iso8601(text: &str) -> Result<Self, ClockError> {
        let bytes = text.as_bytes();
        if bytes.len() < ISO_LEN {
            return Err(ClockError::Malformed);
        }

        let separators = [(4, b'-'), (7, b'-'), (10, b'T'), (13, b':'), (16, b':')];
        if separators.iter().any(|&(at, sep)| bytes[at] != sep) {
            return Err(ClockError::Malformed);
        }

        let field = |start: usize, len: usize| -> Result<u16, ClockError> {
            bytes[start..start + len].iter().try_fold(0u16, |acc, &b| {
                if b.is_ascii_digit() {
                    Ok(acc * 10 + (b - b'0') as u16)
                } else {
                    Err(ClockError::Malformed)
                }
            })
        };

        let parsed = Self {
            year: field(0, 4)?,
            month: field(5, 2)? as u8,
            day: field(8, 2)? as u8,
            hour: field(11, 2)? as u8,
            minute: field(14, 2)? as u8,
            second: field(17, 2)? as u8,
        };

        if !parsed.is_normalized() {
            return Err(ClockError::Malformed);
        }

        Ok(parsed)
    }
}

impl Default for VirtualDateTime {
    fn default() -> Self {
        DEFAULT_DATETIME
    }
}

impl fmt::Display for VirtualDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Owner of the master's notion of "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualClock {
    now: VirtualDateTime,
}

impl VirtualClock {
    pub const fn new(now: VirtualDateTime) -> Self {
        Self { now }
    }

    /// Clock starting at [`DEFAULT_DATETIME`].
    pub const fn seeded() -> Self {
        Self::new(DEFAULT_DATETIME)
    }

    /// Restore the clock from storage.
    ///
    /// On first boot (no state file) the default is seeded and persisted
    /// right away. A state file that cannot be parsed yields
    /// [`ClockError::Malformed`]; recovering from it is up to the caller.
    pub fn load<F: FileSystem>(fs: &mut F) -> Result<Self, ClockError> {
        if !fs.exists(CLOCK_FILE)? {
            let clock = Self::seeded();
            clock.persist(fs)?;
            log::info!("[CLOCK] no persisted time, seeded {}", clock.now);
            return Ok(clock);
        }

        let mut buf = [0u8; 32];
        let read = fs.read_at(CLOCK_FILE, 0, &mut buf)?;
        let text = core::str::from_utf8(&buf[..read]).map_err(|_| ClockError::Malformed)?;
        let now = VirtualDateTime::parse_iso8601(text)?;

        log::debug!("[CLOCK] restored {}", now);
        Ok(Self { now })
    }

    /// Overwrite the state file with the current time.
    pub fn persist<F: FileSystem>(&self, fs: &mut F) -> Result<(), StorageError> {
        let mut line: heapless::String<32> = heapless::String::new();
        writeln!(line, "{}", self.now).map_err(|_| StorageError::Io {
            operation: "format clock",
        })?;
        fs.create(CLOCK_FILE, line.as_bytes())
    }

    pub fn advance(&mut self, seconds: u32) {
        self.now.advance(seconds);
    }

    pub fn format(&self) -> IsoTimestamp {
        let mut out = IsoTimestamp::new();
        // Capacity covers the widest u16 year, so this cannot overflow.
        let _ = write!(out, "{}", self.now);
        out
    }

    pub const fn now(&self) -> VirtualDateTime {
        self.now
    }
}

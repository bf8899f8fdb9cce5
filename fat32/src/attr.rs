//! Directory-entry attribute bits and the packed date/time fields that ride
//! alongside them.

use core::fmt;

bitflags::bitflags! {
    /// The attribute byte of a short (8.3) directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        /// Read-only bit. Informational only; this crate never writes.
        const READ_ONLY = 0x01;
        /// Hidden bit, honored by [`crate::dir::list`]'s [`ListFlags::HIDDEN`].
        const HIDDEN = 0x02;
        /// System bit.
        const SYSTEM = 0x04;
        /// Volume label entry. Never a real file or directory.
        const VOLUME_ID = 0x08;
        /// Set on every directory entry, including `.` and `..`.
        const DIRECTORY = 0x10;
        /// Archive bit.
        const ARCHIVE = 0x20;
        /// The four bits that, combined, mark an entry as an LFN continuation
        /// rather than a short entry.
        const LFN = Self::READ_ONLY.bits() | Self::HIDDEN.bits() | Self::SYSTEM.bits() | Self::VOLUME_ID.bits();
    }
}

bitflags::bitflags! {
    /// Controls which fields [`crate::dir::list`] includes per entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListFlags: u8 {
        /// Include the long name when the entry carries one.
        const LONG_NAME = 0x01;
        /// Include the packed 8.3 short name.
        const SHORT_NAME = 0x02;
        /// Include entries with the hidden attribute set. Without this bit
        /// hidden entries are skipped entirely.
        const HIDDEN = 0x04;
        /// Include the creation timestamp.
        const CREATION = 0x08;
        /// Include the last-access date.
        const LAST_ACCESS = 0x10;
        /// Include the last-modified timestamp.
        const LAST_MODIFIED = 0x20;
    }
}

/// A FAT32 packed date/time, decoded into its civil fields.
///
/// `second` carries only even values: the on-disk field stores seconds in
/// 2-second units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Four-digit year.
    pub year: u16,
    /// 1-based month.
    pub month: u8,
    /// 1-based day of month.
    pub day: u8,
    /// Hour, 0-23. `None` when decoded from a date-only field.
    pub hour: Option<u8>,
    /// Minute, 0-59.
    pub minute: Option<u8>,
    /// Second, 0-58, always even.
    pub second: Option<u8>,
}

impl Timestamp {
    pub(crate) fn from_date(date: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: None,
            minute: None,
            second: None,
        }
    }

    pub(crate) fn from_date_time(date: u16, time: u16) -> Self {
        let mut ts = Self::from_date(date);
        ts.hour = Some((time >> 11) as u8);
        ts.minute = Some(((time >> 5) & 0x3F) as u8);
        ts.second = Some(((time & 0x1F) * 2) as u8);
        ts
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)?;
        if let (Some(h), Some(m), Some(s)) = (self.hour, self.minute, self.second) {
            write!(f, " {h:02}:{m:02}:{s:02}")?;
        }
        Ok(())
    }
}

//! The directory resolver: short/long entry parsing and the three public
//! operations built on it, `cd`, `list`, and `read_file`.

use core::fmt;

use heapless::{String, Vec};

use crate::attr::{Attributes, ListFlags, Timestamp};
use crate::block::BlockDevice;
use crate::cursor::DirCursor;
use crate::error::FatError;
use crate::fat::ChainCursor;
use crate::geometry::FatBoot;

const ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = 512 / ENTRY_SIZE;
const MAX_LFN_ENTRIES: u8 = 20;

/// A byte-oriented sink for raw file contents.
///
/// [`read_file`] cannot use [`core::fmt::Write`] for its output: file bytes
/// are not guaranteed to be valid UTF-8. Anything that can accept one byte
/// at a time — a UART transmitter, an in-memory buffer — implements this.
pub trait ByteSink {
    /// Emits a single byte.
    fn write_byte(&mut self, byte: u8);
}

/// A short (8.3) directory entry, copied out of its backing sector so the
/// scan loop can move on without holding a borrow into a stack buffer.
#[derive(Debug, Clone, Copy)]
pub struct ShortEntry {
    raw: [u8; ENTRY_SIZE],
}

impl ShortEntry {
    fn from_slice(slice: &[u8]) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(slice);
        Self { raw }
    }

    /// The packed 11-byte name field, unmodified.
    #[must_use]
    pub fn name_raw(&self) -> [u8; 11] {
        let mut buf = [0u8; 11];
        buf.copy_from_slice(&self.raw[0..11]);
        buf
    }

    /// Attribute bits of this entry.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.raw[11])
    }

    /// First cluster this entry's data (or sub-directory) starts at.
    #[must_use]
    pub fn first_cluster(&self) -> u32 {
        let hi = u32::from(u16::from_le_bytes([self.raw[20], self.raw[21]]));
        let lo = u32::from(u16::from_le_bytes([self.raw[26], self.raw[27]]));
        (hi << 16) | lo
    }

    /// File size in bytes. Always `0` for a directory entry.
    #[must_use]
    pub fn file_size(&self) -> u32 {
        u32::from_le_bytes([self.raw[28], self.raw[29], self.raw[30], self.raw[31]])
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created(&self) -> Timestamp {
        let time = u16::from_le_bytes([self.raw[14], self.raw[15]]);
        let date = u16::from_le_bytes([self.raw[16], self.raw[17]]);
        Timestamp::from_date_time(date, time)
    }

    /// Last-access date. FAT32 stores no time-of-day for this field.
    #[must_use]
    pub fn last_access(&self) -> Timestamp {
        let date = u16::from_le_bytes([self.raw[18], self.raw[19]]);
        Timestamp::from_date(date)
    }

    /// Last-modified timestamp.
    #[must_use]
    pub fn last_modified(&self) -> Timestamp {
        let time = u16::from_le_bytes([self.raw[22], self.raw[23]]);
        let date = u16::from_le_bytes([self.raw[24], self.raw[25]]);
        Timestamp::from_date_time(date, time)
    }

    /// The packed name and extension, trimmed of padding and joined with a
    /// `.` when the extension is non-empty.
    #[must_use]
    pub fn short_name(&self) -> String<12> {
        let name = trim_spaces(&self.raw[0..8]);
        let ext = trim_spaces(&self.raw[8..11]);
        let mut out = String::new();
        let _ = out.push_str(name);
        if !ext.is_empty() {
            let _ = out.push('.');
            let _ = out.push_str(ext);
        }
        out
    }
}

fn trim_spaces(raw: &[u8]) -> &str {
    let len = raw.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    core::str::from_utf8(&raw[..len]).unwrap_or("")
}

/// Whether a directory scan should keep going or stop at the entry just
/// visited.
pub(crate) enum ScanControl {
    Continue,
    Stop,
}

/// Walks the cluster chain rooted at `start_cluster`, calling `visit` for
/// every live (non-deleted, non-end) entry.
///
/// LFN continuation runs are accumulated by ordinal as they're encountered
/// — highest ordinal first, since that's the physical order FAT32 stores
/// them in — and handed to `visit` already reassembled in reading order.
/// This naturally covers an LFN run landing entirely in one sector, ending
/// at the last slot of a sector, or spanning into the next sector: all
/// three are just instances of the same per-entry accumulation, not special
/// cases.
fn scan_dir<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    start_cluster: u32,
    mut visit: impl FnMut(ShortEntry, Option<&str>) -> Result<ScanControl, FatError<D::Error>>,
) -> Result<(), FatError<D::Error>> {
    let mut chain = ChainCursor::new(start_cluster);
    let mut buf = [0u8; 512];
    dev.read_block(chain.lba(boot), &mut buf).map_err(FatError::Device)?;

    let mut run: Option<(u8, Vec<String<13>, 20>)> = None;
    let mut slot = 0usize;

    loop {
        if slot == ENTRIES_PER_SECTOR {
            match chain.advance(dev, boot)? {
                Some(lba) => {
                    dev.read_block(lba, &mut buf).map_err(FatError::Device)?;
                    slot = 0;
                    continue;
                }
                None => return Ok(()),
            }
        }

        let off = slot * ENTRY_SIZE;
        let id = buf[off];

        if id == 0x00 {
            return Ok(());
        }
        if id == 0xE5 {
            run = None;
            slot += 1;
            continue;
        }

        let attr = buf[off + 11];
        if attr == Attributes::LFN.bits() {
            let ordinal = id & 0x1F;
            let last_logical = id & 0x40 != 0;
            if ordinal == 0 || ordinal > MAX_LFN_ENTRIES {
                log::warn!("corrupt LFN entry: ordinal {ordinal} out of range");
                return Err(FatError::CorruptFatEntry);
            }
            let chunk = lfn_name_chunk(&buf[off..off + ENTRY_SIZE]);

            if last_logical {
                let mut chunks = Vec::new();
                let _ = chunks.push(chunk);
                run = Some((ordinal, chunks));
            } else {
                match &mut run {
                    Some((expected, chunks)) if *expected == ordinal + 1 => {
                        *expected = ordinal;
                        let _ = chunks.push(chunk);
                    }
                    _ => {
                        log::warn!("corrupt LFN entry: ordinal {ordinal} out of sequence");
                        return Err(FatError::CorruptFatEntry);
                    }
                }
            }
            slot += 1;
            continue;
        }

        let entry = ShortEntry::from_slice(&buf[off..off + ENTRY_SIZE]);
        let long_name = if let Some((expected, chunks)) = run.take() {
            if expected != 1 {
                log::warn!("corrupt LFN run: {expected} entries still expected at SFN");
                return Err(FatError::CorruptFatEntry);
            }
            let mut name: String<256> = String::new();
            for chunk in chunks.iter().rev() {
                let _ = name.push_str(chunk);
            }
            Some(name)
        } else {
            None
        };

        let control = visit(entry, long_name.as_deref())?;
        slot += 1;
        if matches!(control, ScanControl::Stop) {
            return Ok(());
        }
    }
}

/// Extracts the ASCII-filtered name fragment from one LFN entry's three
/// name spans, dropping the UTF-16 high byte and stopping at the first
/// `0x0000` terminator.
fn lfn_name_chunk(raw: &[u8]) -> String<13> {
    let mut s: String<13> = String::new();
    let spans: [(usize, usize); 3] = [(1, 11), (14, 26), (28, 32)];
    'spans: for (start, end) in spans {
        let mut i = start;
        while i < end {
            let low = raw[i];
            if low == 0 {
                break 'spans;
            }
            if (1..=126).contains(&low) {
                let _ = s.push(low as char);
            }
            i += 2;
        }
    }
    s
}

/// Rejects empty, space-leading, all-space, and forbidden-character names,
/// shared by `cd` and `read_file` since FAT32 disallows the same characters
/// in either.
fn validate_name<E>(name: &str, invalid: FatError<E>) -> Result<(), FatError<E>> {
    if name.is_empty() || name.starts_with(' ') || name.chars().all(|c| c == ' ') {
        return Err(invalid);
    }
    const FORBIDDEN: &[char] = &[
        '"', '*', '/', ':', '<', '>', '?', '\\', '|', 0x7f as char,
    ];
    if name.chars().any(|c| FORBIDDEN.contains(&c) || (c as u32) < 0x20) {
        return Err(invalid);
    }
    Ok(())
}

fn sfn_matches_name_only(entry: &ShortEntry, name: &str) -> bool {
    let raw_name = trim_spaces(&entry.raw[0..8]);
    raw_name.eq_ignore_ascii_case(name)
}

fn sfn_matches_name_and_ext(entry: &ShortEntry, name: &str) -> bool {
    entry.short_name().eq_ignore_ascii_case(name)
}

/// Finds the parent directory's first cluster by scanning `dir_cluster`'s
/// own chain for its `".."` entry, rather than trusting a fixed byte
/// offset. Returns `0` when the chain carries no such entry (the root
/// directory, which has neither `.` nor `..`).
fn find_dotdot_cluster<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    dir_cluster: u32,
) -> Result<u32, FatError<D::Error>> {
    const DOT_DOT: [u8; 11] = [b'.', b'.', b' ', b' ', b' ', b' ', b' ', b' ', b' ', b' ', b' '];
    let mut found = 0u32;
    scan_dir(dev, boot, dir_cluster, |entry, long_name| {
        if long_name.is_none() && entry.name_raw() == DOT_DOT {
            found = entry.first_cluster();
            return Ok(ScanControl::Stop);
        }
        Ok(ScanControl::Continue)
    })?;
    Ok(found)
}

/// Resolves `name` against `cur` and returns the cursor for the child
/// directory.
///
/// `"."` returns a clone of `cur`. `".."` at the root is a no-op; elsewhere
/// it locates the parent via its own `".."` entry. Any other name is
/// matched first against reassembled long names (case-insensitive), then —
/// only when no LFN preceded the short entry and `name` is 8 characters or
/// fewer — against the short entry's bare 8-character name field.
///
/// # Errors
///
/// [`FatError::InvalidDirName`] for an empty, all-space, or
/// forbidden-character name. [`FatError::EndOfDirectory`] when the chain
/// ends without a match.
pub fn cd<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    cur: &DirCursor,
    name: &str,
) -> Result<DirCursor, FatError<D::Error>> {
    validate_name(name, FatError::InvalidDirName)?;

    if name == "." {
        return Ok(cur.clone());
    }
    if name == ".." {
        if cur.is_root(boot) {
            return Ok(cur.clone());
        }
        let parent_cluster = find_dotdot_cluster(dev, boot, cur.first_cluster())?;
        if parent_cluster == 0 {
            return Ok(DirCursor::root(boot.root_cluster()));
        }
        return Ok(cur.pop_segment(boot, parent_cluster));
    }

    let want_short = name.len() <= 8;
    let mut found: Option<(u32, String<12>)> = None;
    scan_dir(dev, boot, cur.first_cluster(), |entry, long_name| {
        if !entry.attributes().contains(Attributes::DIRECTORY)
            || entry.attributes().contains(Attributes::VOLUME_ID)
        {
            return Ok(ScanControl::Continue);
        }
        let matched = match long_name {
            Some(ln) => ln.eq_ignore_ascii_case(name),
            None => want_short && sfn_matches_name_only(&entry, name),
        };
        if matched {
            found = Some((entry.first_cluster(), entry.short_name()));
            return Ok(ScanControl::Stop);
        }
        Ok(ScanControl::Continue)
    })?;

    match found {
        Some((cluster, short_name)) => {
            log::info!("cd {name}: resolved to cluster {cluster}");
            Ok(cur.push_segment(boot, name, &short_name, cluster))
        }
        None => Err(FatError::EndOfDirectory),
    }
}

/// Like [`cd`] but resolves `".."` from [`FatError::EndOfDirectory`] into
/// [`FatError::DirNotFound`] and a plain miss the same way, giving the
/// otherwise-unused `DirNotFound` kind a caller that actually produces it.
///
/// Walks `path`, a `/`-separated sequence of names, applying [`cd`] once
/// per segment starting from `cur`.
///
/// # Errors
///
/// [`FatError::DirNotFound`] if any segment fails to resolve. Other
/// [`FatError`] variants propagate from [`cd`] unchanged.
pub fn resolve_path<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    cur: &DirCursor,
    path: &str,
) -> Result<DirCursor, FatError<D::Error>> {
    let mut at = cur.clone();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        at = match cd(dev, boot, &at, segment) {
            Err(FatError::EndOfDirectory) => return Err(FatError::DirNotFound),
            other => other?,
        };
    }
    Ok(at)
}

/// Lists the entries of `cur`, writing one line per visible entry to `out`.
///
/// Volume-label entries are always skipped. Hidden entries are skipped
/// unless `flags` contains [`ListFlags::HIDDEN`]. The whole chain is
/// walked; there is no cap on directory size.
///
/// # Errors
///
/// Propagates [`FatError::Device`] and [`FatError::CorruptFatEntry`] from
/// the underlying scan. Formatting failures on `out` are swallowed, since a
/// diagnostic sink has nowhere further to report them.
pub fn list<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    cur: &DirCursor,
    flags: ListFlags,
    out: &mut impl fmt::Write,
) -> Result<(), FatError<D::Error>> {
    scan_dir(dev, boot, cur.first_cluster(), |entry, long_name| {
        if entry.attributes().contains(Attributes::VOLUME_ID) {
            return Ok(ScanControl::Continue);
        }
        if entry.attributes().contains(Attributes::HIDDEN) && !flags.contains(ListFlags::HIDDEN) {
            return Ok(ScanControl::Continue);
        }

        let mut printed_name = false;
        if flags.contains(ListFlags::LONG_NAME) {
            if let Some(ln) = long_name {
                let _ = out.write_str(ln);
                printed_name = true;
            }
        }
        if flags.contains(ListFlags::SHORT_NAME) {
            if printed_name {
                let _ = out.write_str(" (");
                let _ = write!(out, "{}", entry.short_name());
                let _ = out.write_str(")");
            } else {
                let _ = write!(out, "{}", entry.short_name());
            }
        } else if !printed_name {
            let _ = write!(out, "{}", entry.short_name());
        }

        if entry.attributes().contains(Attributes::DIRECTORY) {
            let _ = out.write_str("/");
        } else {
            let _ = write!(out, "  {} bytes", entry.file_size());
        }
        if flags.contains(ListFlags::CREATION) {
            let _ = write!(out, "  created {}", entry.created());
        }
        if flags.contains(ListFlags::LAST_ACCESS) {
            let _ = write!(out, "  accessed {}", entry.last_access());
        }
        if flags.contains(ListFlags::LAST_MODIFIED) {
            let _ = write!(out, "  modified {}", entry.last_modified());
        }
        let _ = out.write_str("\n");

        Ok(ScanControl::Continue)
    })
}

/// Emits the contents of file `name`, found in `cur`, byte by byte through
/// `out`. `\n` is expanded to `\r\n`; `0x00` bytes are dropped; every other
/// byte passes through unchanged.
///
/// Matching tries reassembled long names first, then — only when no LFN
/// preceded the short entry and `name` is 12 characters or fewer — the
/// synthesized `name[.ext]` built from the short entry's 11-byte name
/// field. Directory entries are never matched.
///
/// # Errors
///
/// [`FatError::InvalidFileName`] for an empty, all-space, or
/// forbidden-character name. [`FatError::FileNotFound`] when no entry
/// matches. [`FatError::EndOfFile`] should the cluster chain end before the
/// recorded size is exhausted — a corrupt size field or a torn chain.
pub fn read_file<D: BlockDevice>(
    dev: &mut D,
    boot: &FatBoot,
    cur: &DirCursor,
    name: &str,
    out: &mut impl ByteSink,
) -> Result<(), FatError<D::Error>> {
    validate_name(name, FatError::InvalidFileName)?;

    let want_short = name.len() <= 12;
    let mut found: Option<(u32, u32)> = None;
    scan_dir(dev, boot, cur.first_cluster(), |entry, long_name| {
        if entry.attributes().contains(Attributes::DIRECTORY)
            || entry.attributes().contains(Attributes::VOLUME_ID)
        {
            return Ok(ScanControl::Continue);
        }
        let matched = match long_name {
            Some(ln) => ln.eq_ignore_ascii_case(name),
            None => want_short && sfn_matches_name_and_ext(&entry, name),
        };
        if matched {
            found = Some((entry.first_cluster(), entry.file_size()));
            return Ok(ScanControl::Stop);
        }
        Ok(ScanControl::Continue)
    })?;

    let (cluster, size) = found.ok_or(FatError::FileNotFound)?;
    if size == 0 {
        return Ok(());
    }

    let mut remaining = size as usize;
    let mut chain = ChainCursor::new(cluster);
    let mut buf = [0u8; 512];
    dev.read_block(chain.lba(boot), &mut buf).map_err(FatError::Device)?;

    loop {
        let take = remaining.min(512);
        for &byte in &buf[..take] {
            if byte == 0 {
                continue;
            }
            if byte == b'\n' {
                out.write_byte(b'\r');
            }
            out.write_byte(byte);
        }
        remaining -= take;
        if remaining == 0 {
            return Ok(());
        }

        match chain.advance(dev, boot)? {
            Some(lba) => {
                dev.read_block(lba, &mut buf).map_err(FatError::Device)?;
            }
            None => return Err(FatError::EndOfFile),
        }
    }
}

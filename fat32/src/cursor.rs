//! The "current directory" handle: an owned value carrying enough of a
//! directory entry (and its ancestry) to resolve further names against it.

use heapless::String;

use crate::geometry::FatBoot;

/// Upper bound on a reconstructed long name, matching FAT32's own 255 UCS-2
/// character ceiling plus a byte of headroom.
pub const MAX_NAME_LEN: usize = 256;
/// Upper bound on a `/`-joined path built from [`MAX_NAME_LEN`]-bounded
/// segments. Not a FAT32 limit — a practical cap for this crate's
/// stack-resident buffers.
pub const MAX_PATH_LEN: usize = 256;

/// A resolved directory, named two ways (long and 8.3) along with its
/// parent's path, also named two ways.
///
/// Acquired once via [`DirCursor::root`] and threaded through `cd` calls by
/// value; there is no mutable, shared, or lazily-initialized "current
/// directory" anywhere in this crate.
#[derive(Debug, Clone)]
pub struct DirCursor {
    first_cluster: u32,
    long_name: String<MAX_NAME_LEN>,
    short_name: String<12>,
    long_parent_path: String<MAX_PATH_LEN>,
    short_parent_path: String<MAX_PATH_LEN>,
}

impl DirCursor {
    /// The cursor for the volume root: `long_name` and `short_name` are both
    /// `"/"`, and the parent paths are empty (the root has no parent).
    #[must_use]
    pub fn root(root_cluster: u32) -> Self {
        let mut long_name = String::new();
        let _ = long_name.push('/');
        let mut short_name = String::new();
        let _ = short_name.push('/');
        Self {
            first_cluster: root_cluster,
            long_name,
            short_name,
            long_parent_path: String::new(),
            short_parent_path: String::new(),
        }
    }

    /// First cluster of this directory's own entry stream.
    #[must_use]
    pub const fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// This directory's long name, or `"/"` at the root.
    #[must_use]
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// This directory's packed 8.3 name, or `"/"` at the root.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// `true` when this cursor names the volume root.
    #[must_use]
    pub const fn is_root(&self, boot: &FatBoot) -> bool {
        self.first_cluster == boot.root_cluster()
    }

    /// The full `/`-joined long-name path from the root to this directory.
    #[must_use]
    pub fn long_full_path(&self, boot: &FatBoot) -> String<MAX_PATH_LEN> {
        Self::join(self.is_root(boot), &self.long_parent_path, &self.long_name)
    }

    /// The full `/`-joined short-name path from the root to this directory.
    #[must_use]
    pub fn short_full_path(&self, boot: &FatBoot) -> String<MAX_PATH_LEN> {
        Self::join(self.is_root(boot), &self.short_parent_path, &self.short_name)
    }

    fn join(is_root: bool, parent_path: &str, name: &str) -> String<MAX_PATH_LEN> {
        let mut out = String::new();
        if is_root {
            let _ = out.push('/');
            return out;
        }
        if parent_path == "/" || parent_path.is_empty() {
            let _ = out.push('/');
        } else {
            let _ = out.push_str(parent_path);
            let _ = out.push('/');
        }
        let _ = out.push_str(name);
        out
    }

    /// Builds the cursor for a child directory found by `cd`.
    pub(crate) fn push_segment(
        &self,
        boot: &FatBoot,
        long_name: &str,
        short_name: &str,
        cluster: u32,
    ) -> Self {
        let mut new_long_name = String::new();
        let _ = new_long_name.push_str(long_name);
        let mut new_short_name = String::new();
        let _ = new_short_name.push_str(short_name);
        Self {
            first_cluster: cluster,
            long_name: new_long_name,
            short_name: new_short_name,
            long_parent_path: self.long_full_path(boot),
            short_parent_path: self.short_full_path(boot),
        }
    }

    /// Builds the cursor for the parent directory found by `cd("..")`,
    /// reconstructing the parent's own name and ancestry purely from the
    /// path strings already carried by `self` — no extra disk scan beyond
    /// the one that located `parent_cluster`.
    pub(crate) fn pop_segment(&self, boot: &FatBoot, parent_cluster: u32) -> Self {
        let long_full_parent = if self.long_parent_path.is_empty() {
            "/"
        } else {
            self.long_parent_path.as_str()
        };
        let short_full_parent = if self.short_parent_path.is_empty() {
            "/"
        } else {
            self.short_parent_path.as_str()
        };

        let (grandparent_long, parent_long_name) = split_path(long_full_parent);
        let (grandparent_short, parent_short_name) = split_path(short_full_parent);

        if parent_long_name.is_empty() {
            return Self::root(boot.root_cluster());
        }

        let mut long_name = String::new();
        let _ = long_name.push_str(parent_long_name);
        let mut short_name = String::new();
        let _ = short_name.push_str(parent_short_name);
        let mut long_parent_path = String::new();
        let _ = long_parent_path.push_str(grandparent_long);
        let mut short_parent_path = String::new();
        let _ = short_parent_path.push_str(grandparent_short);

        Self {
            first_cluster: parent_cluster,
            long_name,
            short_name,
            long_parent_path,
            short_parent_path,
        }
    }
}

/// Splits a `/`-joined path into `(parent, last_segment)`. The root path
/// (`"/"` or empty) splits to `("", "")`.
fn split_path(path: &str) -> (&str, &str) {
    if path.is_empty() || path == "/" {
        return ("", "");
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("/", trimmed),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The remote share owner being browsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerName(String);

impl PeerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Directory separator used by one peer's share. All paths returned by a
/// single peer are assumed to use the same separator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSeparator {
    Backslash,
    Slash,
}

impl PathSeparator {
    pub const fn as_char(self) -> char {
        match self {
            Self::Backslash => '\\',
            Self::Slash => '/',
        }
    }

    /// Scan paths for the first occurrence of either candidate separator.
    /// Shares with only root-level directories have no separator to find;
    /// callers fall back to [`PathSeparator::default`].
    pub fn detect<'a>(paths: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        for path in paths {
            for ch in path.chars() {
                match ch {
                    '\\' => return Some(Self::Backslash),
                    '/' => return Some(Self::Slash),
                    _ => {}
                }
            }
        }
        None
    }
}

impl Default for PathSeparator {
    // Soulseek-style shares are Windows paths more often than not.
    fn default() -> Self {
        Self::Backslash
    }
}

/// A single file within a directory, named relative to that directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub length_seconds: Option<u32>,
}

/// One directory in a peer's share. `full_path` uniquely identifies the
/// record within a snapshot. `children` starts empty and is populated by the
/// materializer or by lazy expansion in the view's working copy; the
/// `children_loaded`/`loading` flags belong to that working copy and are
/// never mutated on snapshot-owned records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub full_path: String,
    pub file_count: usize,
    pub locked: bool,
    pub files: Vec<FileRecord>,
    pub children: Vec<DirectoryRecord>,
    pub children_loaded: bool,
    pub loading: bool,
}

impl DirectoryRecord {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            file_count: 0,
            locked: false,
            files: Vec::new(),
            children: Vec::new(),
            children_loaded: false,
            loading: false,
        }
    }

    /// Last path segment, e.g. `"C"` for `"A\B\C"`.
    pub fn display_name(&self, separator: PathSeparator) -> &str {
        display_name_of(&self.full_path, separator)
    }

    /// Count of separator-delimited segments; a root directory has depth 1.
    pub fn depth(&self, separator: PathSeparator) -> usize {
        self.full_path
            .trim_end_matches(separator.as_char())
            .split(separator.as_char())
            .count()
    }

    /// All segments but the last, or `None` for a root directory.
    pub fn parent_path(&self, separator: PathSeparator) -> Option<&str> {
        let trimmed = self.full_path.trim_end_matches(separator.as_char());
        trimmed
            .rfind(separator.as_char())
            .map(|idx| &trimmed[..idx])
    }
}

/// Last path segment of `path` under `separator`.
pub fn display_name_of(path: &str, separator: PathSeparator) -> &str {
    let trimmed = path.trim_end_matches(separator.as_char());
    match trimmed.rfind(separator.as_char()) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Trim trailing separators; an empty result means the share root.
pub fn normalize_parent(path: &str, separator: PathSeparator) -> &str {
    path.trim_end_matches(separator.as_char())
}

/// `child` is an immediate child of normalized `parent` iff it extends the
/// parent by exactly one segment. The root (empty parent) owns every path
/// without a separator.
pub fn is_immediate_child(child: &str, parent: &str, separator: PathSeparator) -> bool {
    let sep = separator.as_char();
    if parent.is_empty() {
        return !child.is_empty() && !child.contains(sep);
    }
    let Some(rest) = child.strip_prefix(parent) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix(sep) else {
        return false;
    };
    !rest.is_empty() && !rest.contains(sep)
}

/// Join a directory path and a relative name with the share's separator.
pub fn join_path(parent: &str, name: &str, separator: PathSeparator) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{}{name}", separator.as_char())
    }
}

// Loose remote shapes, as deserialized off the wire.

/// Directory entry as the remote peer reports it. Fields are optional
/// because remote listings are not trustworthy; ingestion normalizes them
/// and drops anything without a usable name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteDirectory {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_count: Option<u32>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub bit_depth: Option<u32>,
    #[serde(default)]
    pub length_seconds: Option<u32>,
}

/// The full listing returned by a successful remote browse.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteListing {
    #[serde(default)]
    pub directories: Vec<RemoteDirectory>,
    #[serde(default)]
    pub locked_directories: Vec<RemoteDirectory>,
}

fn normalize_file(raw: RemoteFile) -> Option<FileRecord> {
    let filename = raw.filename.filter(|name| !name.is_empty())?;
    Some(FileRecord {
        filename,
        size: raw.size.unwrap_or(0),
        bitrate: raw.bitrate,
        sample_rate: raw.sample_rate,
        bit_depth: raw.bit_depth,
        length_seconds: raw.length_seconds,
    })
}

/// Normalize loose remote records, dropping malformed entries rather than
/// propagating them. Returns the records plus the dropped count.
pub fn normalize_directories(
    raw: Vec<RemoteDirectory>,
    locked: bool,
) -> (Vec<DirectoryRecord>, usize) {
    let mut dropped = 0;
    let mut records = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(name) = entry.name.filter(|name| !name.is_empty()) else {
            dropped += 1;
            continue;
        };
        let files: Vec<FileRecord> = entry.files.into_iter().filter_map(normalize_file).collect();
        let file_count = match entry.file_count {
            Some(count) => count as usize,
            None => files.len(),
        };
        records.push(DirectoryRecord {
            full_path: name,
            file_count,
            locked: locked || entry.locked,
            files,
            children: Vec::new(),
            children_loaded: false,
            loading: false,
        });
    }
    (records, dropped)
}

/// Aggregate counts over one snapshot, including the locked portion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShareStats {
    pub directories: usize,
    pub files: usize,
    pub locked_directories: usize,
    pub locked_files: usize,
}

#[derive(Clone, Copy, Debug)]
enum DirSlot {
    Open(usize),
    Locked(usize),
}

/// Immutable point-in-time listing for one peer. Created only by a
/// successful remote fetch and replaced wholesale by the cache, never
/// patched field-by-field.
#[derive(Clone, Debug)]
pub struct ListingSnapshot {
    pub peer: PeerName,
    pub separator: PathSeparator,
    pub directories: Vec<DirectoryRecord>,
    pub locked_directories: Vec<DirectoryRecord>,
    pub fetched_at: DateTime<Utc>,
    index: HashMap<String, DirSlot>,
}

impl ListingSnapshot {
    pub fn from_remote(peer: PeerName, listing: RemoteListing) -> Self {
        let separator = PathSeparator::detect(
            listing
                .directories
                .iter()
                .chain(&listing.locked_directories)
                .filter_map(|d| d.name.as_deref()),
        )
        .unwrap_or_default();

        let (directories, dropped_open) = normalize_directories(listing.directories, false);
        let (locked_directories, dropped_locked) =
            normalize_directories(listing.locked_directories, true);
        let dropped = dropped_open + dropped_locked;
        if dropped > 0 {
            tracing::debug!(peer = %peer, dropped, "dropped malformed directory records");
        }

        let mut index = HashMap::with_capacity(directories.len() + locked_directories.len());
        for (pos, record) in directories.iter().enumerate() {
            index.insert(record.full_path.clone(), DirSlot::Open(pos));
        }
        for (pos, record) in locked_directories.iter().enumerate() {
            index.insert(record.full_path.clone(), DirSlot::Locked(pos));
        }

        Self {
            peer,
            separator,
            directories,
            locked_directories,
            fetched_at: Utc::now(),
            index,
        }
    }

    pub fn directory(&self, path: &str) -> Option<&DirectoryRecord> {
        match self.index.get(path)? {
            DirSlot::Open(pos) => self.directories.get(*pos),
            DirSlot::Locked(pos) => self.locked_directories.get(*pos),
        }
    }

    /// Open and locked directories in listing order.
    pub fn all_directories(&self) -> impl Iterator<Item = &DirectoryRecord> {
        self.directories.iter().chain(&self.locked_directories)
    }

    /// Records that sit exactly one level below `parent` (untrimmed).
    pub fn immediate_children(&self, parent: &str) -> Vec<&DirectoryRecord> {
        let parent = normalize_parent(parent, self.separator);
        self.all_directories()
            .filter(|record| is_immediate_child(&record.full_path, parent, self.separator))
            .collect()
    }

    pub fn stats(&self) -> ShareStats {
        ShareStats {
            directories: self.directories.len(),
            files: self.directories.iter().map(|d| d.file_count).sum(),
            locked_directories: self.locked_directories.len(),
            locked_files: self.locked_directories.iter().map(|d| d.file_count).sum(),
        }
    }
}

/// A page derived from a filtered set; counts always reflect the filtered
/// set, never the unfiltered one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedView<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Page through `items` with `page` clamped to `[1, total_pages]`.
/// `page_size` must already be clamped by the caller.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> PaginatedView<T> {
    let total_count = items.len();
    let total_pages = total_count.div_ceil(page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = (page - 1) * page_size;
    let items: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(page_size)
        .collect();
    PaginatedView {
        items,
        total_count,
        page,
        page_size,
        total_pages,
        has_next: page < total_pages,
        has_previous: page > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_dir(name: &str) -> RemoteDirectory {
        RemoteDirectory {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn detects_separator_from_first_occurrence() {
        assert_eq!(
            PathSeparator::detect(["Music", "Music\\Jazz"]),
            Some(PathSeparator::Backslash)
        );
        assert_eq!(
            PathSeparator::detect(["Music", "Music/Jazz"]),
            Some(PathSeparator::Slash)
        );
        assert_eq!(PathSeparator::detect(["Music", "Video"]), None);
    }

    #[test]
    fn display_name_is_last_segment() {
        let record = DirectoryRecord::new("A\\B\\C");
        assert_eq!(record.display_name(PathSeparator::Backslash), "C");
        assert_eq!(record.depth(PathSeparator::Backslash), 3);
        assert_eq!(record.parent_path(PathSeparator::Backslash), Some("A\\B"));

        let root = DirectoryRecord::new("A");
        assert_eq!(root.display_name(PathSeparator::Backslash), "A");
        assert_eq!(root.parent_path(PathSeparator::Backslash), None);
    }

    #[test]
    fn immediate_child_requires_separator_boundary() {
        let sep = PathSeparator::Slash;
        assert!(is_immediate_child("A/B", "A", sep));
        assert!(!is_immediate_child("A/B/C", "A", sep));
        // "AB" shares a string prefix with "A" but is not its child.
        assert!(!is_immediate_child("AB/C", "A", sep));
        assert!(is_immediate_child("A", "", sep));
        assert!(!is_immediate_child("A/B", "", sep));
    }

    #[test]
    fn ingestion_drops_malformed_records() {
        let raw = vec![
            raw_dir("Music"),
            RemoteDirectory::default(),
            RemoteDirectory {
                name: Some(String::new()),
                ..Default::default()
            },
        ];
        let (records, dropped) = normalize_directories(raw, false);
        assert_eq!(records.len(), 1);
        assert_eq!(dropped, 2);
        assert_eq!(records[0].full_path, "Music");
    }

    #[test]
    fn ingestion_counts_files_when_count_missing() {
        let raw = vec![RemoteDirectory {
            name: Some("Music".to_string()),
            file_count: None,
            files: vec![
                RemoteFile {
                    filename: Some("a.flac".to_string()),
                    size: Some(10),
                    ..Default::default()
                },
                RemoteFile::default(), // missing name, dropped
            ],
            ..Default::default()
        }];
        let (records, _) = normalize_directories(raw, false);
        assert_eq!(records[0].files.len(), 1);
        assert_eq!(records[0].file_count, 1);
    }

    #[test]
    fn snapshot_indexes_locked_and_open_directories() {
        let listing = RemoteListing {
            directories: vec![raw_dir("Music"), raw_dir("Music\\Jazz")],
            locked_directories: vec![raw_dir("Private")],
        };
        let snapshot = ListingSnapshot::from_remote(PeerName::from("peer"), listing);
        assert_eq!(snapshot.separator, PathSeparator::Backslash);
        assert!(snapshot.directory("Music\\Jazz").is_some());
        assert!(snapshot.directory("Private").is_some_and(|d| d.locked));
        assert!(snapshot.directory("Nope").is_none());
        assert_eq!(snapshot.stats().directories, 2);
        assert_eq!(snapshot.stats().locked_directories, 1);
    }

    #[test]
    fn snapshot_is_debug_formattable() {
        let listing = RemoteListing {
            directories: vec![raw_dir("Music")],
            locked_directories: vec![],
        };
        let snapshot = ListingSnapshot::from_remote(PeerName::from("alice"), listing);
        let rendered = format!("{snapshot:?}");
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("Music"));
    }

    #[test]
    fn pagination_clamps_and_counts() {
        let items: Vec<usize> = (0..250).collect();
        let page = paginate(items.clone(), 3, 100);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 50);
        assert!(!page.has_next);
        assert!(page.has_previous);

        // Out-of-range pages clamp rather than error.
        let page = paginate(items, 99, 100);
        assert_eq!(page.page, 3);

        let empty = paginate(Vec::<usize>::new(), 5, 100);
        assert_eq!(empty.page, 1);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_previous);
    }
}

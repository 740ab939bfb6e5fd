use crate::model::{DirectoryRecord, PathSeparator};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Extra rows rendered above and below the visible viewport so small
/// scrolls never hit an unrendered row.
pub const OVERSCAN: usize = 10;

/// One visible line of the flattened tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeRow {
    pub path: String,
    pub display_name: String,
    pub level: usize,
    pub is_collapsed: bool,
    pub has_children: bool,
    pub children_loaded: bool,
    pub loading: bool,
    pub locked: bool,
    pub file_count: usize,
}

/// Mutable working copy of a materialized forest, for interactive display.
/// Snapshot records are cloned in; expand/collapse and lazy-load flags live
/// here and never touch the cached snapshot.
#[derive(Clone, Debug, Default)]
pub struct TreeView {
    separator: PathSeparator,
    roots: Vec<DirectoryRecord>,
    collapsed: HashSet<String>,
}

impl TreeView {
    pub fn new(roots: Vec<DirectoryRecord>, separator: PathSeparator) -> Self {
        Self {
            separator,
            roots,
            collapsed: HashSet::new(),
        }
    }

    /// Start in lazy mode: top-level directories only, none of them loaded.
    /// Expanding a row later fills in its children via
    /// [`TreeView::complete_lazy_load`].
    pub fn lazy_roots(
        records: impl IntoIterator<Item = DirectoryRecord>,
        separator: PathSeparator,
    ) -> Self {
        let mut roots: Vec<DirectoryRecord> = records
            .into_iter()
            .filter(|record| record.parent_path(separator).is_none())
            .map(|mut record| {
                record.children = Vec::new();
                record.children_loaded = false;
                record
            })
            .collect();
        roots.sort_by_cached_key(|record| record.display_name(separator).to_lowercase());
        Self {
            separator,
            roots,
            collapsed: HashSet::new(),
        }
    }

    pub fn roots(&self) -> &[DirectoryRecord] {
        &self.roots
    }

    pub fn separator(&self) -> PathSeparator {
        self.separator
    }

    pub fn is_collapsed(&self, path: &str) -> bool {
        self.collapsed.contains(path)
    }

    pub fn collapse(&mut self, path: impl Into<String>) {
        self.collapsed.insert(path.into());
    }

    pub fn expand(&mut self, path: &str) {
        self.collapsed.remove(path);
    }

    pub fn toggle(&mut self, path: &str) {
        if !self.collapsed.remove(path) {
            self.collapsed.insert(path.to_string());
        }
    }

    /// Collapse every directory currently known to the view. Directories
    /// that have not been lazy-loaded yet are unaffected; they collapse
    /// once their paths become known.
    pub fn collapse_all(&mut self) {
        let mut paths = Vec::new();
        for root in &self.roots {
            collect_paths(root, &mut paths);
        }
        self.collapsed.extend(paths);
    }

    pub fn expand_all(&mut self) {
        self.collapsed.clear();
    }

    pub fn collapsed_paths(&self) -> impl Iterator<Item = &str> {
        self.collapsed.iter().map(String::as_str)
    }

    pub fn restore_collapsed(&mut self, paths: impl IntoIterator<Item = String>) {
        self.collapsed.extend(paths);
    }

    /// Depth-first flatten, skipping the subtrees of collapsed rows.
    pub fn flatten(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        for root in &self.roots {
            self.flatten_node(root, 0, &mut rows);
        }
        rows
    }

    fn flatten_node(&self, node: &DirectoryRecord, level: usize, rows: &mut Vec<TreeRow>) {
        let is_collapsed = self.collapsed.contains(&node.full_path);
        rows.push(TreeRow {
            path: node.full_path.clone(),
            display_name: node.display_name(self.separator).to_string(),
            level,
            is_collapsed,
            // Unloaded nodes may still have children; show them expandable.
            has_children: !node.children.is_empty() || !node.children_loaded,
            children_loaded: node.children_loaded,
            loading: node.loading,
            locked: node.locked,
            file_count: node.file_count,
        });
        if is_collapsed {
            return;
        }
        for child in &node.children {
            self.flatten_node(child, level + 1, rows);
        }
    }

    /// Mark a node as fetching its children. Returns `false` when no fetch
    /// should be issued: unknown path, already loading, or already loaded.
    pub fn begin_lazy_load(&mut self, path: &str) -> bool {
        match find_node_mut(&mut self.roots, path) {
            Some(node) if !node.loading && !node.children_loaded => {
                node.loading = true;
                true
            }
            _ => false,
        }
    }

    /// Attach fetched children and expand the node.
    pub fn complete_lazy_load(&mut self, path: &str, children: Vec<DirectoryRecord>) {
        let separator = self.separator;
        if let Some(node) = find_node_mut(&mut self.roots, path) {
            node.loading = false;
            node.children_loaded = true;
            node.children = children
                .into_iter()
                .map(|mut child| {
                    child.children = Vec::new();
                    child.children_loaded = false;
                    child
                })
                .collect();
            node.children
                .sort_by_cached_key(|child| child.display_name(separator).to_lowercase());
        }
        self.collapsed.remove(path);
    }

    /// Clear the loading flag without marking the node loaded, so the next
    /// expand retries the fetch.
    pub fn fail_lazy_load(&mut self, path: &str) {
        if let Some(node) = find_node_mut(&mut self.roots, path) {
            node.loading = false;
        }
    }

    /// Every directory path currently known to the view, in display order.
    pub fn known_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for root in &self.roots {
            collect_paths(root, &mut paths);
        }
        paths
    }
}

fn collect_paths(node: &DirectoryRecord, out: &mut Vec<String>) {
    out.push(node.full_path.clone());
    for child in &node.children {
        collect_paths(child, out);
    }
}

fn find_node_mut<'a>(
    nodes: &'a mut [DirectoryRecord],
    path: &str,
) -> Option<&'a mut DirectoryRecord> {
    for node in nodes {
        if node.full_path == path {
            return Some(node);
        }
        // Descend only into subtrees that can contain the path.
        if path.starts_with(node.full_path.as_str()) {
            if let Some(found) = find_node_mut(&mut node.children, path) {
                return Some(found);
            }
        }
    }
    None
}

/// Half-open row range `[start, end)` to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowBounds {
    pub start: usize,
    pub end: usize,
}

/// The slice of rows worth rendering for a viewport of `viewport_rows`
/// scrolled to `scroll_offset`, padded by [`OVERSCAN`] on both sides.
pub fn visible_window(row_count: usize, scroll_offset: usize, viewport_rows: usize) -> WindowBounds {
    let start = scroll_offset.saturating_sub(OVERSCAN).min(row_count);
    let end = scroll_offset
        .saturating_add(viewport_rows)
        .saturating_add(OVERSCAN)
        .min(row_count);
    WindowBounds { start, end }
}

/// Interactive state worth surviving a restart. Stored gzip-compressed;
/// a missing or unreadable file falls back to defaults rather than failing
/// startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedViewState {
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub collapsed_paths: Vec<String>,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub page: usize,
}

/// Default location for the persisted view state file.
pub fn default_state_path() -> Option<PathBuf> {
    dirs_next::cache_dir().map(|dir| dir.join("goombay").join("view-state.json.gz"))
}

pub fn save_state(path: &Path, state: &PersistedViewState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(state)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    std::fs::write(path, encoder.finish()?)?;
    Ok(())
}

/// Fire-and-forget save off the async runtime, so interaction never waits
/// on disk.
pub fn save_state_deferred(path: PathBuf, state: PersistedViewState) {
    tokio::task::spawn_blocking(move || {
        if let Err(error) = save_state(&path, &state) {
            tracing::warn!(path = %path.display(), %error, "failed to persist view state");
        }
    });
}

pub fn load_state(path: &Path) -> PersistedViewState {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return PersistedViewState::default(),
    };
    let mut json = String::new();
    if let Err(error) = GzDecoder::new(bytes.as_slice()).read_to_string(&mut json) {
        tracing::warn!(path = %path.display(), %error, "unreadable view state, starting fresh");
        return PersistedViewState::default();
    }
    match serde_json::from_str(&json) {
        Ok(state) => state,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "corrupt view state, starting fresh");
            PersistedViewState::default()
        }
    }
}

/// Generation-token debouncer for filter input. Each keystroke arms a new
/// token; only the token still current after the quiet period (and after
/// the search returns) may apply its results, so stale responses are
/// discarded no matter how they interleave.
#[derive(Clone, Debug)]
pub struct SearchDebouncer {
    generation: Arc<AtomicU64>,
    delay: Duration,
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            delay,
        }
    }

    /// Invalidate all earlier tokens and return the new current one.
    pub fn arm(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Wait out the quiet period; `true` iff `token` is still current.
    pub async fn wait(&self, token: u64) -> bool {
        tokio::time::sleep(self.delay).await;
        self.is_current(token)
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == token
    }
}

use crate::model::{DirectoryRecord, PathSeparator};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Inputs at or below this size use the depth-map strategy; larger shares
/// use the single-pass map strategy.
pub const MATERIALIZE_THRESHOLD: usize = 5_000;

/// What to do with a record whose parent path was never listed by the peer.
/// `Drop` is the observed behavior of the sampled system; `SynthesizeParents`
/// keeps deep paths reachable by inventing placeholder intermediates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrphanPolicy {
    #[default]
    Drop,
    SynthesizeParents,
}

/// Turns a flat set of directory records into an ordered forest. Strategy
/// is picked by input size; both strategies produce trees with identical
/// parent/child membership for well-formed input, so callers never observe
/// a different shape depending on how large a share is.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeMaterializer {
    orphan_policy: OrphanPolicy,
    threshold: Option<usize>,
}

impl TreeMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    #[cfg(test)]
    fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn materialize(
        &self,
        records: Vec<DirectoryRecord>,
        separator: PathSeparator,
    ) -> Vec<DirectoryRecord> {
        let threshold = self.threshold.unwrap_or(MATERIALIZE_THRESHOLD);
        if records.len() <= threshold {
            self.materialize_depth_map(records, separator)
        } else {
            self.materialize_efficient(records, separator)
        }
    }

    /// Small-input strategy: bucket records by separator-delimited depth,
    /// treat the minimum depth as the root level, and resolve children by
    /// prefix matching against the next bucket down.
    pub fn materialize_depth_map(
        &self,
        mut records: Vec<DirectoryRecord>,
        separator: PathSeparator,
    ) -> Vec<DirectoryRecord> {
        if records.is_empty() {
            return Vec::new();
        }
        if self.orphan_policy == OrphanPolicy::SynthesizeParents {
            synthesize_missing_parents(&mut records, separator);
        }

        let mut buckets: BTreeMap<usize, Vec<Option<DirectoryRecord>>> = BTreeMap::new();
        for record in records {
            buckets
                .entry(record.depth(separator))
                .or_default()
                .push(Some(record));
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by_cached_key(|record| {
                record
                    .as_ref()
                    .map(|r| r.full_path.to_lowercase())
                    .unwrap_or_default()
            });
        }

        let root_depth = *buckets.keys().next().expect("buckets are non-empty");
        let mut roots: Vec<DirectoryRecord> = buckets
            .remove(&root_depth)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        for root in &mut roots {
            attach_children(root, root_depth + 1, &mut buckets, separator);
        }

        let stranded: usize = buckets
            .values()
            .map(|bucket| bucket.iter().filter(|slot| slot.is_some()).count())
            .sum();
        if stranded > 0 {
            tracing::debug!(stranded, "records unreachable from any root");
        }
        roots
    }

    /// Large-input strategy: one pass to index every path, a second pass to
    /// link each record to its immediate parent via O(1) lookup.
    pub fn materialize_efficient(
        &self,
        mut records: Vec<DirectoryRecord>,
        separator: PathSeparator,
    ) -> Vec<DirectoryRecord> {
        if self.orphan_policy == OrphanPolicy::SynthesizeParents {
            synthesize_missing_parents(&mut records, separator);
        }

        let index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.full_path.clone(), pos))
            .collect();

        let mut child_ids: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
        let mut root_ids: Vec<usize> = Vec::new();
        let mut orphans = 0usize;
        for (pos, record) in records.iter().enumerate() {
            match record.parent_path(separator) {
                None => root_ids.push(pos),
                Some(parent) => match index.get(parent) {
                    Some(&parent_pos) => child_ids[parent_pos].push(pos),
                    None => orphans += 1,
                },
            }
        }
        if orphans > 0 {
            tracing::debug!(orphans, "dropped orphan directory records");
        }

        let mut slots: Vec<Option<DirectoryRecord>> = records.into_iter().map(Some).collect();
        let mut roots: Vec<DirectoryRecord> = root_ids
            .into_iter()
            .map(|pos| assemble(pos, &mut slots, &child_ids, separator))
            .collect();
        sort_siblings(&mut roots, separator);
        roots
    }
}

fn attach_children(
    node: &mut DirectoryRecord,
    depth: usize,
    buckets: &mut BTreeMap<usize, Vec<Option<DirectoryRecord>>>,
    separator: PathSeparator,
) {
    node.children_loaded = true;
    let Some(bucket) = buckets.get_mut(&depth) else {
        return;
    };
    let prefix = format!("{}{}", node.full_path, separator.as_char());
    let mut children = Vec::new();
    for slot in bucket.iter_mut() {
        if slot
            .as_ref()
            .is_some_and(|record| record.full_path.starts_with(&prefix))
        {
            children.push(slot.take().expect("checked above"));
        }
    }
    for mut child in children {
        attach_children(&mut child, depth + 1, buckets, separator);
        node.children.push(child);
    }
}

fn assemble(
    pos: usize,
    slots: &mut Vec<Option<DirectoryRecord>>,
    child_ids: &[Vec<usize>],
    separator: PathSeparator,
) -> DirectoryRecord {
    let mut node = slots[pos].take().expect("each record is assembled once");
    node.children_loaded = true;
    node.children = child_ids[pos]
        .iter()
        .map(|&child| assemble(child, slots, child_ids, separator))
        .collect();
    sort_siblings(&mut node.children, separator);
    node
}

fn sort_siblings(siblings: &mut [DirectoryRecord], separator: PathSeparator) {
    siblings.sort_by_cached_key(|record| record.display_name(separator).to_lowercase());
}

/// Invent placeholder records for every ancestor path that the peer never
/// listed, so orphaned subtrees stay attached.
fn synthesize_missing_parents(records: &mut Vec<DirectoryRecord>, separator: PathSeparator) {
    let mut known: HashSet<String> = records
        .iter()
        .map(|record| record.full_path.clone())
        .collect();
    let mut created = Vec::new();
    for record in records.iter() {
        let mut path = record.full_path.as_str();
        while let Some(idx) = path.rfind(separator.as_char()) {
            path = &path[..idx];
            if path.is_empty() || !known.insert(path.to_string()) {
                break;
            }
            created.push(DirectoryRecord::new(path));
        }
    }
    if !created.is_empty() {
        tracing::debug!(count = created.len(), "synthesized placeholder parents");
        records.extend(created);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: PathSeparator = PathSeparator::Slash;

    fn records(paths: &[&str]) -> Vec<DirectoryRecord> {
        paths.iter().map(|p| DirectoryRecord::new(*p)).collect()
    }

    /// Parent/child membership, ignoring order, for isomorphism checks.
    fn edges(roots: &[DirectoryRecord]) -> Vec<(String, String)> {
        fn walk(node: &DirectoryRecord, out: &mut Vec<(String, String)>) {
            for child in &node.children {
                out.push((node.full_path.clone(), child.full_path.clone()));
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for root in roots {
            walk(root, &mut out);
        }
        out.sort();
        out
    }

    fn root_paths(roots: &[DirectoryRecord]) -> Vec<String> {
        roots.iter().map(|r| r.full_path.clone()).collect()
    }

    #[test]
    fn builds_expected_forest_from_flat_records() {
        let input = records(&["A", "A/B", "A/B/C", "Z"]);
        for roots in [
            TreeMaterializer::new().materialize_depth_map(input.clone(), SEP),
            TreeMaterializer::new().materialize_efficient(input, SEP),
        ] {
            assert_eq!(root_paths(&roots), ["A", "Z"]);
            assert_eq!(roots[0].children.len(), 1);
            assert_eq!(roots[0].children[0].full_path, "A/B");
            assert_eq!(roots[0].children[0].children[0].full_path, "A/B/C");
            assert!(roots[1].children.is_empty());
        }
    }

    #[test]
    fn strategies_are_isomorphic_on_well_formed_input() {
        let mut paths = Vec::new();
        for root in ["rock", "Jazz", "ambient"] {
            paths.push(root.to_string());
            for album in ["a1", "B2", "c3"] {
                paths.push(format!("{root}/{album}"));
                for disc in ["d1", "D2"] {
                    paths.push(format!("{root}/{album}/{disc}"));
                }
            }
        }
        // Listing order from a peer is arbitrary.
        paths.reverse();
        let input: Vec<DirectoryRecord> =
            paths.iter().map(|p| DirectoryRecord::new(p.clone())).collect();

        let depth = TreeMaterializer::new().materialize_depth_map(input.clone(), SEP);
        let efficient = TreeMaterializer::new().materialize_efficient(input, SEP);
        assert_eq!(edges(&depth), edges(&efficient));
        assert_eq!(root_paths(&depth), root_paths(&efficient));
    }

    #[test]
    fn string_prefix_alone_is_not_parentage() {
        let input = records(&["A", "AB", "AB/C", "A/D"]);
        let roots = TreeMaterializer::new().materialize_depth_map(input.clone(), SEP);
        let a = roots.iter().find(|r| r.full_path == "A").unwrap();
        assert_eq!(edges(&roots).len(), 2);
        assert_eq!(a.children.len(), 1);
        assert_eq!(a.children[0].full_path, "A/D");

        let roots = TreeMaterializer::new().materialize_efficient(input, SEP);
        let ab = roots.iter().find(|r| r.full_path == "AB").unwrap();
        assert_eq!(ab.children[0].full_path, "AB/C");
    }

    #[test]
    fn orphans_are_dropped_by_default() {
        let input = records(&["A", "A/B/C", "Z"]);
        let roots = TreeMaterializer::new().materialize_efficient(input, SEP);
        assert_eq!(root_paths(&roots), ["A", "Z"]);
        assert!(edges(&roots).is_empty());
    }

    #[test]
    fn orphan_parents_can_be_synthesized() {
        let input = records(&["A", "A/B/C", "Z"]);
        let roots = TreeMaterializer::new()
            .with_orphan_policy(OrphanPolicy::SynthesizeParents)
            .materialize_efficient(input, SEP);
        let a = roots.iter().find(|r| r.full_path == "A").unwrap();
        assert_eq!(a.children[0].full_path, "A/B");
        assert_eq!(a.children[0].file_count, 0);
        assert_eq!(a.children[0].children[0].full_path, "A/B/C");
    }

    #[test]
    fn orphan_policy_applies_to_both_strategies() {
        let input = records(&["A", "A/B/C", "Z"]);

        // Default policy strands the deep record on both strategies.
        let roots = TreeMaterializer::new().materialize_depth_map(input.clone(), SEP);
        let a = roots.iter().find(|r| r.full_path == "A").unwrap();
        assert!(a.children.is_empty());

        // Synthesis holds regardless of which strategy the size dispatch
        // picks; a 3-record input goes through the depth map.
        for roots in [
            TreeMaterializer::new()
                .with_orphan_policy(OrphanPolicy::SynthesizeParents)
                .materialize_depth_map(input.clone(), SEP),
            TreeMaterializer::new()
                .with_orphan_policy(OrphanPolicy::SynthesizeParents)
                .materialize(input.clone(), SEP),
        ] {
            let a = roots.iter().find(|r| r.full_path == "A").unwrap();
            assert_eq!(a.children[0].full_path, "A/B");
            assert_eq!(a.children[0].children[0].full_path, "A/B/C");
        }
    }

    #[test]
    fn siblings_sort_case_insensitively() {
        let input = records(&["m/beta", "m", "m/Alpha", "m/gamma"]);
        let roots = TreeMaterializer::new().materialize_efficient(input, SEP);
        let names: Vec<&str> = roots[0]
            .children
            .iter()
            .map(|c| c.display_name(SEP))
            .collect();
        assert_eq!(names, ["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn threshold_switches_strategy_transparently() {
        let input = records(&["A", "A/B", "Z"]);
        let small = TreeMaterializer::new()
            .with_threshold(10)
            .materialize(input.clone(), SEP);
        let large = TreeMaterializer::new()
            .with_threshold(1)
            .materialize(input, SEP);
        assert_eq!(edges(&small), edges(&large));
    }
}

//! Scanning of a Subversion history to discover, per configured branch, the
//! set of revisions touching it and any copy operation that created it.

use std::collections::BTreeMap;

mod dump;
mod source;

pub(crate) use dump::ReadError;
pub(crate) use source::DumpSource;

use crate::FHashMap;

/// Where a branch lives in the repository at each revision.
#[derive(Debug)]
pub(crate) struct BranchDefinition {
    revision_paths: BTreeMap<u32, String>,
}

impl BranchDefinition {
    pub(crate) fn new<'a>(revision_paths: impl IntoIterator<Item = (u32, &'a str)>) -> Self {
        Self {
            revision_paths: revision_paths
                .into_iter()
                .map(|(revision, path)| (revision, normalize_path(path).to_owned()))
                .collect(),
        }
    }

    /// The branch's path at `revision`, i.e. the path of the greatest
    /// revision-path entry not after `revision`.
    pub(crate) fn path_at(&self, revision: u32) -> Option<&str> {
        self.revision_paths
            .range(..=revision)
            .next_back()
            .map(|(_, path)| path.as_str())
    }
}

/// Strips leading and trailing slashes so that paths from the configuration
/// and paths from the dump compare equal.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/').trim_end_matches('/')
}

/// Returns whether `path` is `branch_path` itself or lies below it. An empty
/// branch path is the repository root, which contains everything.
pub(crate) fn path_is_within(path: &str, branch_path: &str) -> bool {
    branch_path.is_empty()
        || path == branch_path
        || (path.len() > branch_path.len()
            && path.starts_with(branch_path)
            && path.as_bytes()[branch_path.len()] == b'/')
}

/// The result of scanning the history: everything the topology resolution
/// needs to know about the raw repository.
pub(crate) struct RepositoryInformation {
    pub(crate) latest_revision: u32,
    /// Per branch (in configuration order), the sorted revisions touching it.
    pub(crate) branch_revisions: Vec<(String, Vec<u32>)>,
    /// For branches whose creation was observed as a copy in the history,
    /// the copy source as `(path, revision)`.
    pub(crate) branch_creation_points: FHashMap<String, (String, u32)>,
}

pub(crate) struct RepositoryScanner {
    branches: Vec<(String, BranchDefinition)>,
}

impl RepositoryScanner {
    pub(crate) fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    pub(crate) fn add_branch(&mut self, name: &str, definition: BranchDefinition) {
        self.branches.push((name.to_owned(), definition));
    }

    /// Walks the dump stream and assigns every revision to the branches
    /// whose paths it touches. `progress` is invoked once per revision.
    ///
    /// A revision that only touches paths outside all configured branches is
    /// assigned to none; a path matching several branches is assigned to the
    /// one with the most specific (longest) branch path, or skipped if that
    /// is ambiguous.
    pub(crate) fn identify_branches(
        &self,
        source: &mut dyn std::io::BufRead,
        last_revision: Option<u32>,
        progress: &mut dyn FnMut(u32),
    ) -> Result<RepositoryInformation, ReadError> {
        let mut revisions: Vec<Vec<u32>> = vec![Vec::new(); self.branches.len()];
        let mut creation_points: Vec<Option<(String, u32)>> = vec![None; self.branches.len()];

        let mut reader = dump::DumpReader::new(source)?;
        let mut current_rev = 0;
        let mut latest_revision = 0;

        while let Some(record) = reader.next_record()? {
            match record {
                dump::Record::Rev(rev) => {
                    if last_revision.is_some_and(|last| rev.rev_no > last) {
                        break;
                    }
                    current_rev = rev.rev_no;
                    latest_revision = latest_revision.max(current_rev);
                    progress(current_rev);
                }
                dump::Record::Node(node) => {
                    let path = String::from_utf8_lossy(&node.path);
                    let path = normalize_path(&path);
                    let Some(branch_i) = self.find_branch(path, current_rev) else {
                        continue;
                    };

                    let first_touch = revisions[branch_i].is_empty();
                    if revisions[branch_i].last() != Some(&current_rev) {
                        revisions[branch_i].push(current_rev);
                    }

                    // A copy that brings the branch's own root into existence
                    // marks its creation point.
                    if first_touch
                        && creation_points[branch_i].is_none()
                        && matches!(node.action, dump::NodeAction::Add | dump::NodeAction::Replace)
                        && Some(path) == self.branches[branch_i].1.path_at(current_rev)
                    {
                        if let Some(copy_from) = node.copy_from {
                            let copy_path = String::from_utf8_lossy(&copy_from.path);
                            creation_points[branch_i] = Some((
                                normalize_path(&copy_path).to_owned(),
                                copy_from.rev,
                            ));
                        }
                    }
                }
            }
        }

        let branch_revisions = self
            .branches
            .iter()
            .zip(revisions)
            .map(|((name, _), revisions)| (name.clone(), revisions))
            .collect();
        let branch_creation_points = self
            .branches
            .iter()
            .zip(creation_points)
            .filter_map(|((name, _), point)| point.map(|point| (name.clone(), point)))
            .collect();

        Ok(RepositoryInformation {
            latest_revision,
            branch_revisions,
            branch_creation_points,
        })
    }

    fn find_branch(&self, path: &str, revision: u32) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut ambiguous = false;
        for (branch_i, (_, definition)) in self.branches.iter().enumerate() {
            let Some(branch_path) = definition.path_at(revision) else {
                continue;
            };
            if !path_is_within(path, branch_path) {
                continue;
            }
            match best {
                Some((_, best_len)) if best_len > branch_path.len() => {}
                Some((_, best_len)) if best_len == branch_path.len() => ambiguous = true,
                _ => {
                    best = Some((branch_i, branch_path.len()));
                    ambiguous = false;
                }
            }
        }
        if ambiguous { None } else { best.map(|(i, _)| i) }
    }
}

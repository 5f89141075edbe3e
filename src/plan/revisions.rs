use crate::FHashMap;

/// Per-branch sorted revision sets, supporting floor lookups ("the nearest
/// revision of this branch at or below N").
#[derive(Debug)]
pub(crate) struct RevisionSets {
    branches: Vec<(String, Vec<u32>)>,
    by_name: FHashMap<String, usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LookupError {
    UnknownBranch { branch: String },
    NoRevisionAtOrBelow { branch: String, revision: u32 },
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::UnknownBranch { ref branch } => {
                write!(f, "unknown branch \"{branch}\"")
            }
            Self::NoRevisionAtOrBelow { ref branch, revision } => write!(
                f,
                "branch \"{branch}\" has no revision at or below {revision}",
            ),
        }
    }
}

impl RevisionSets {
    pub(crate) fn new() -> Self {
        Self {
            branches: Vec::new(),
            by_name: FHashMap::default(),
        }
    }

    /// Registers a branch with its revisions. Revisions must already be
    /// sorted ascending, as produced by the history scan.
    pub(crate) fn insert(&mut self, branch: &str, revisions: Vec<u32>) {
        debug_assert!(revisions.is_sorted());
        self.by_name
            .insert(branch.to_owned(), self.branches.len());
        self.branches.push((branch.to_owned(), revisions));
    }

    pub(crate) fn contains_branch(&self, branch: &str) -> bool {
        self.by_name.contains_key(branch)
    }

    pub(crate) fn revisions(&self, branch: &str) -> Option<&[u32]> {
        self.by_name
            .get(branch)
            .map(|&i| self.branches[i].1.as_slice())
    }

    /// Branches in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.branches
            .iter()
            .map(|(name, revisions)| (name.as_str(), revisions.as_slice()))
    }

    /// The greatest revision of `branch` that is `<= revision`.
    pub(crate) fn nearest_at_or_below(
        &self,
        branch: &str,
        revision: u32,
    ) -> Result<u32, LookupError> {
        let revisions = self
            .revisions(branch)
            .ok_or_else(|| LookupError::UnknownBranch {
                branch: branch.to_owned(),
            })?;
        let i = revisions.partition_point(|&r| r <= revision);
        if i == 0 {
            return Err(LookupError::NoRevisionAtOrBelow {
                branch: branch.to_owned(),
                revision,
            });
        }
        Ok(revisions[i - 1])
    }
}

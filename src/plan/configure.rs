//! Resolution of the configured branch topology against the scanned history.
//!
//! Every tag, origin and merge reference is resolved here to a concrete
//! `(branch, revision)` point, with revisions floored onto the target
//! branch's own revision set. The worklist only ever sees resolved points.

use crate::FHashMap;
use crate::config::{Config, MergeSourceRef, SourceRef};
use crate::svn::{BranchDefinition, RepositoryInformation, path_is_within};

use super::revisions::{LookupError, RevisionSets};

/// A resolved point in history: a revision known to exist on the branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BranchPoint {
    pub(crate) branch: String,
    pub(crate) revision: u32,
}

#[derive(Debug)]
pub(crate) struct BranchTag {
    pub(crate) name: String,
    pub(crate) message_revision: u32,
}

#[derive(Debug)]
pub(crate) struct ConfiguredBranch {
    pub(crate) name: String,
    pub(crate) definition: BranchDefinition,
    pub(crate) origin: Option<BranchPoint>,
    /// Resolved merge sources, keyed by the trigger revision on this branch.
    pub(crate) merges: FHashMap<u32, BranchPoint>,
    /// Tags keyed by the floored revision they annotate.
    pub(crate) tags: FHashMap<u32, BranchTag>,
    /// Commit message replacements, keyed by revision.
    pub(crate) fixes: FHashMap<u32, String>,
}

#[derive(Debug)]
pub(crate) struct ConfiguredBranches {
    pub(crate) branches: Vec<ConfiguredBranch>,
    pub(crate) revision_sets: RevisionSets,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConfigureError {
    Lookup(LookupError),
    UnknownTag {
        tag: String,
    },
    /// No scanned revision touched the branch's configured paths.
    BranchWithoutRevisions {
        branch: String,
    },
    /// A branch was created by copying from a path that no configured branch
    /// occupies at the copy revision.
    NoBranchAtPath {
        branch: String,
        path: String,
        revision: u32,
    },
    /// The copy source path matches several configured branches equally well.
    AmbiguousCreationPoint {
        branch: String,
        path: String,
        revision: u32,
    },
}

impl From<LookupError> for ConfigureError {
    #[inline]
    fn from(e: LookupError) -> Self {
        Self::Lookup(e)
    }
}

impl std::fmt::Display for ConfigureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Lookup(ref e) => e.fmt(f),
            Self::UnknownTag { ref tag } => write!(f, "unknown tag \"{tag}\""),
            Self::BranchWithoutRevisions { ref branch } => {
                write!(f, "no revision touches branch \"{branch}\"")
            }
            Self::NoBranchAtPath {
                ref branch,
                ref path,
                revision,
            } => write!(
                f,
                "branch \"{branch}\" was copied from \"{path}\" at revision {revision}, \
                 which no configured branch occupies",
            ),
            Self::AmbiguousCreationPoint {
                ref branch,
                ref path,
                revision,
            } => write!(
                f,
                "branch \"{branch}\" was copied from \"{path}\" at revision {revision}, \
                 which matches more than one configured branch",
            ),
        }
    }
}

/// Resolves tag and branch references to [`BranchPoint`]s. Tags must all be
/// registered before any reference is resolved.
struct RefResolver<'a> {
    revision_sets: &'a RevisionSets,
    tag_points: FHashMap<String, BranchPoint>,
}

impl<'a> RefResolver<'a> {
    fn new(revision_sets: &'a RevisionSets) -> Self {
        Self {
            revision_sets,
            tag_points: FHashMap::default(),
        }
    }

    fn register_tag(&mut self, tag: &str, point: BranchPoint) {
        self.tag_points.insert(tag.to_owned(), point);
    }

    fn resolve_tag(&self, tag: &str) -> Result<BranchPoint, ConfigureError> {
        self.tag_points
            .get(tag)
            .cloned()
            .ok_or_else(|| ConfigureError::UnknownTag {
                tag: tag.to_owned(),
            })
    }

    fn resolve_point(&self, branch: &str, revision: u32) -> Result<BranchPoint, ConfigureError> {
        let revision = self.revision_sets.nearest_at_or_below(branch, revision)?;
        Ok(BranchPoint {
            branch: branch.to_owned(),
            revision,
        })
    }

    fn resolve_source(&self, source: &SourceRef) -> Result<BranchPoint, ConfigureError> {
        match *source {
            SourceRef::Tag { ref tag } => self.resolve_tag(tag),
            SourceRef::Branch {
                ref branch,
                revision,
            } => self.resolve_point(branch, revision),
        }
    }

    fn resolve_merge_source(
        &self,
        trigger_revision: u32,
        source: &MergeSourceRef,
    ) -> Result<BranchPoint, ConfigureError> {
        match *source {
            MergeSourceRef::Tag { ref tag } => self.resolve_tag(tag),
            MergeSourceRef::Branch {
                ref branch,
                source_revision,
            } => self.resolve_point(branch, source_revision.unwrap_or(trigger_revision)),
        }
    }
}

/// Combines the verified configuration with the scan results into fully
/// resolved branches.
pub(crate) fn configure_branches(
    config: &Config,
    info: &RepositoryInformation,
) -> Result<ConfiguredBranches, ConfigureError> {
    let mut revision_sets = RevisionSets::new();
    for (name, revisions) in info.branch_revisions.iter() {
        revision_sets.insert(name, revisions.clone());
    }

    let definitions: Vec<BranchDefinition> = config
        .branches
        .iter()
        .map(|branch| {
            BranchDefinition::new(
                branch
                    .revision_paths
                    .iter()
                    .map(|rp| (rp.revision, rp.path.as_str())),
            )
        })
        .collect();

    for branch in config.branches.iter() {
        if revision_sets
            .revisions(&branch.name)
            .is_none_or(<[u32]>::is_empty)
        {
            return Err(ConfigureError::BranchWithoutRevisions {
                branch: branch.name.clone(),
            });
        }
    }

    // Tags first, so that origins and merges can reference tags declared on
    // any branch regardless of order.
    let mut resolver = RefResolver::new(&revision_sets);
    for branch in config.branches.iter() {
        for tag in branch.tags.iter() {
            let point = resolver.resolve_point(&branch.name, tag.revision)?;
            resolver.register_tag(&tag.name, point);
        }
    }

    // Origins may look at every branch's definition, so they are resolved
    // before the definitions move into the configured branches.
    let mut origins = Vec::with_capacity(config.branches.len());
    for branch in config.branches.iter() {
        let origin = match branch.origin {
            Some(ref source) => Some(resolver.resolve_source(source)?),
            None => match info.branch_creation_points.get(&branch.name) {
                Some(&(ref copy_path, copy_rev)) => Some(resolve_creation_point(
                    config,
                    &definitions,
                    &resolver,
                    &branch.name,
                    copy_path,
                    copy_rev,
                )?),
                None => None,
            },
        };
        origins.push(origin);
    }

    let mut branches = Vec::with_capacity(config.branches.len());
    for ((branch, definition), origin) in config.branches.iter().zip(definitions).zip(origins) {
        let mut merges = FHashMap::default();
        for merge in branch.merges.iter() {
            let source = resolver.resolve_merge_source(merge.revision, &merge.source)?;
            merges.insert(merge.revision, source);
        }

        let mut tags = FHashMap::default();
        for tag in branch.tags.iter() {
            let revision = revision_sets.nearest_at_or_below(&branch.name, tag.revision)?;
            tags.insert(
                revision,
                BranchTag {
                    name: tag.name.clone(),
                    message_revision: tag.message_revision,
                },
            );
        }

        let fixes = branch
            .fixes
            .iter()
            .map(|fix| (fix.revision, fix.message.clone()))
            .collect();

        branches.push(ConfiguredBranch {
            name: branch.name.clone(),
            definition,
            origin,
            merges,
            tags,
            fixes,
        });
    }

    Ok(ConfiguredBranches {
        branches,
        revision_sets,
    })
}

/// Maps an observed copy operation onto the configured branch occupying the
/// copy source path, preferring the most specific branch path.
fn resolve_creation_point(
    config: &Config,
    definitions: &[BranchDefinition],
    resolver: &RefResolver<'_>,
    branch_name: &str,
    copy_path: &str,
    copy_rev: u32,
) -> Result<BranchPoint, ConfigureError> {
    let mut best: Option<(&str, usize)> = None;
    let mut ambiguous = false;
    for (other, definition) in config.branches.iter().zip(definitions) {
        if other.name == branch_name {
            continue;
        }
        let Some(other_path) = definition.path_at(copy_rev) else {
            continue;
        };
        if !path_is_within(copy_path, other_path) {
            continue;
        }
        match best {
            Some((_, best_len)) if best_len > other_path.len() => {}
            Some((_, best_len)) if best_len == other_path.len() => ambiguous = true,
            _ => {
                best = Some((&other.name, other_path.len()));
                ambiguous = false;
            }
        }
    }

    if ambiguous {
        return Err(ConfigureError::AmbiguousCreationPoint {
            branch: branch_name.to_owned(),
            path: copy_path.to_owned(),
            revision: copy_rev,
        });
    }
    let Some((source_branch, _)) = best else {
        return Err(ConfigureError::NoBranchAtPath {
            branch: branch_name.to_owned(),
            path: copy_path.to_owned(),
            revision: copy_rev,
        });
    };
    resolver.resolve_point(source_branch, copy_rev)
}

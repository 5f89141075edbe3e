//! Ordering of branch revisions into a replayable plan.
//!
//! Every revision of every branch becomes a node in a dependency graph:
//! each revision depends on its predecessor on the same branch, the first
//! revision of a branch depends on the branch's origin point, and a merge
//! trigger depends on the merged source point. A depth-first post-order
//! walk, visiting branches in configuration order and revisions ascending,
//! then yields a deterministic plan in which every commit appears after all
//! of its parents.

use smallvec::SmallVec;

use crate::FHashMap;

use super::configure::ConfiguredBranches;

/// Input to [`Worklist::new`]: one branch with its revisions and resolved
/// origin and merge points. Referenced revisions must exist on the
/// referenced branch.
pub(crate) struct WorklistBranch {
    pub(crate) name: String,
    pub(crate) revisions: Vec<u32>,
    pub(crate) origin: Option<(String, u32)>,
    /// `(trigger revision, source branch, source revision)` triples.
    pub(crate) merges: Vec<(u32, String, u32)>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WorklistError {
    UnknownBranch { branch: String },
    UnknownRevision { branch: String, revision: u32 },
    Cycle { branch: String, revision: u32 },
}

impl std::fmt::Display for WorklistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::UnknownBranch { ref branch } => {
                write!(f, "unknown branch \"{branch}\"")
            }
            Self::UnknownRevision { ref branch, revision } => {
                write!(f, "branch \"{branch}\" has no revision {revision}")
            }
            Self::Cycle { ref branch, revision } => write!(
                f,
                "dependency cycle through revision {revision} of branch \"{branch}\"",
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PlanStep {
    pub(crate) branch: String,
    pub(crate) revision: u32,
}

#[derive(Debug)]
struct Node {
    branch: u32,
    revision: u32,
    deps: SmallVec<[u32; 2]>,
}

#[derive(Debug)]
pub(crate) struct Worklist {
    branch_names: Vec<String>,
    nodes: Vec<Node>,
}

impl Worklist {
    pub(crate) fn new(branches: &[WorklistBranch]) -> Result<Self, WorklistError> {
        let mut branch_names = Vec::with_capacity(branches.len());
        let mut nodes = Vec::new();
        let mut node_index = FHashMap::<(u32, u32), u32>::default();

        for (branch_i, branch) in branches.iter().enumerate() {
            branch_names.push(branch.name.clone());
            for &revision in branch.revisions.iter() {
                node_index.insert((branch_i as u32, revision), nodes.len() as u32);
                nodes.push(Node {
                    branch: branch_i as u32,
                    revision,
                    deps: SmallVec::new(),
                });
            }
        }

        let find_branch = |name: &str| -> Result<u32, WorklistError> {
            branches
                .iter()
                .position(|b| b.name == name)
                .map(|i| i as u32)
                .ok_or_else(|| WorklistError::UnknownBranch {
                    branch: name.to_owned(),
                })
        };
        let find_node = |node_index: &FHashMap<(u32, u32), u32>,
                         branch: u32,
                         revision: u32|
         -> Result<u32, WorklistError> {
            node_index.get(&(branch, revision)).copied().ok_or_else(|| {
                WorklistError::UnknownRevision {
                    branch: branches[branch as usize].name.clone(),
                    revision,
                }
            })
        };

        for (branch_i, branch) in branches.iter().enumerate() {
            let branch_i = branch_i as u32;

            // The predecessor edge, or the origin edge for the first
            // revision, always comes before any merge edge.
            let mut prev: Option<u32> = match branch.origin {
                Some((ref origin_branch, origin_rev)) => {
                    let origin_branch = find_branch(origin_branch)?;
                    Some(find_node(&node_index, origin_branch, origin_rev)?)
                }
                None => None,
            };
            for &revision in branch.revisions.iter() {
                let node = find_node(&node_index, branch_i, revision)?;
                if let Some(prev) = prev {
                    nodes[node as usize].deps.push(prev);
                }
                prev = Some(node);
            }

            for &(trigger, ref source_branch, source_rev) in branch.merges.iter() {
                let trigger_node = find_node(&node_index, branch_i, trigger)?;
                let source_branch = find_branch(source_branch)?;
                let source_node = find_node(&node_index, source_branch, source_rev)?;
                nodes[trigger_node as usize].deps.push(source_node);
            }
        }

        Ok(Self {
            branch_names,
            nodes,
        })
    }

    pub(crate) fn from_configured(
        configured: &ConfiguredBranches,
    ) -> Result<Self, WorklistError> {
        let branches: Vec<WorklistBranch> = configured
            .branches
            .iter()
            .map(|branch| {
                let revisions = configured
                    .revision_sets
                    .revisions(&branch.name)
                    .unwrap_or(&[])
                    .to_vec();
                let mut merges: Vec<(u32, String, u32)> = branch
                    .merges
                    .iter()
                    .map(|(&trigger, source)| {
                        (trigger, source.branch.clone(), source.revision)
                    })
                    .collect();
                merges.sort_unstable_by_key(|&(trigger, _, _)| trigger);
                WorklistBranch {
                    name: branch.name.clone(),
                    revisions,
                    origin: branch
                        .origin
                        .as_ref()
                        .map(|origin| (origin.branch.clone(), origin.revision)),
                    merges,
                }
            })
            .collect();
        Self::new(&branches)
    }

    /// Produces the replay order. Fails if the dependency graph contains a
    /// cycle, naming one revision on it.
    pub(crate) fn create_plan(&self) -> Result<Vec<PlanStep>, WorklistError> {
        const UNVISITED: u8 = 0;
        const VISITING: u8 = 1;
        const DONE: u8 = 2;

        let mut state = vec![UNVISITED; self.nodes.len()];
        let mut plan = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(u32, u32)> = Vec::new();

        for root in 0..self.nodes.len() {
            if state[root] != UNVISITED {
                continue;
            }
            state[root] = VISITING;
            stack.push((root as u32, 0));

            while let Some(top) = stack.last_mut() {
                let (node_i, dep_cursor) = (top.0, top.1);
                let node = &self.nodes[node_i as usize];
                if let Some(&dep) = node.deps.get(dep_cursor as usize) {
                    top.1 += 1;
                    match state[dep as usize] {
                        UNVISITED => {
                            state[dep as usize] = VISITING;
                            stack.push((dep, 0));
                        }
                        VISITING => {
                            let dep_node = &self.nodes[dep as usize];
                            return Err(WorklistError::Cycle {
                                branch: self.branch_names[dep_node.branch as usize].clone(),
                                revision: dep_node.revision,
                            });
                        }
                        _ => {}
                    }
                } else {
                    state[node_i as usize] = DONE;
                    plan.push(PlanStep {
                        branch: self.branch_names[node.branch as usize].clone(),
                        revision: node.revision,
                    });
                    stack.pop();
                }
            }
        }

        Ok(plan)
    }
}

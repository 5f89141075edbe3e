//! Branch topology resolution and replay planning.

pub(crate) mod configure;
pub(crate) mod revisions;
pub(crate) mod worklist;

pub(crate) use configure::{ConfiguredBranches, configure_branches};
pub(crate) use worklist::{PlanStep, Worklist};

/// Writes the plan as line-oriented text, one replay step per line:
///
/// ```text
/// # 4 steps, 2 branches
/// main@1 path=/trunk
/// main@3 path=/trunk tag=v1
/// second@4 path=/branches/second origin=main@3
/// main@5 path=/trunk merge=second@4 fix
/// ```
pub(crate) fn write_plan(
    out: &mut dyn std::io::Write,
    plan: &[PlanStep],
    configured: &ConfiguredBranches,
) -> Result<(), std::io::Error> {
    writeln!(out, "# {} steps, {} branches", plan.len(), configured.branches.len())?;

    let mut started: Vec<bool> = vec![false; configured.branches.len()];
    for step in plan.iter() {
        let branch_i = configured
            .branches
            .iter()
            .position(|b| b.name == step.branch)
            .expect("plan step for unconfigured branch");
        let branch = &configured.branches[branch_i];

        write!(out, "{}@{}", step.branch, step.revision)?;
        if let Some(path) = branch.definition.path_at(step.revision) {
            write!(out, " path=/{path}")?;
        }
        if !started[branch_i] {
            started[branch_i] = true;
            if let Some(ref origin) = branch.origin {
                write!(out, " origin={}@{}", origin.branch, origin.revision)?;
            }
        }
        if let Some(merge) = branch.merges.get(&step.revision) {
            write!(out, " merge={}@{}", merge.branch, merge.revision)?;
        }
        if let Some(tag) = branch.tags.get(&step.revision) {
            write!(out, " tag={}", tag.name)?;
        }
        if branch.fixes.contains_key(&step.revision) {
            write!(out, " fix")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

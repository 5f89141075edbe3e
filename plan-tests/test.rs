use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::defs;

pub(crate) fn run_test(test_path: &Path) -> Result<(), String> {
    let temp_dir = get_tmp_dir()?;
    let svn_replay_bin = Path::new(env!("CARGO_BIN_EXE_svn-replay"));

    let test_def_raw =
        std::fs::read(test_path).map_err(|e| format!("failed to read {test_path:?}: {e}"))?;

    let test_def: defs::Test = serde_yaml::from_slice(&test_def_raw)
        .map_err(|e| format!("failed to parse {test_path:?}: {e}"))?;

    let config_path = temp_dir.join("config.toml");
    std::fs::write(&config_path, test_def.config.as_bytes())
        .map_err(|e| format!("failed to write {config_path:?}: {e}"))?;

    let svn_dump_path = temp_dir.join("svn-dump");
    std::fs::write(&svn_dump_path, make_svn_dump(&test_def))
        .map_err(|e| format!("failed to write {svn_dump_path:?}: {e}"))?;

    let plan_path = temp_dir.join("plan.txt");
    let log_path = temp_dir.join("plan.log");

    run_plan(
        svn_replay_bin,
        &config_path,
        &svn_dump_path,
        &plan_path,
        &log_path,
        test_def.failed.into(),
    )?;

    if let Some(ref expected_logs) = test_def.logs {
        check_log(&log_path, expected_logs)?;
    }

    if !test_def.failed {
        check_plan(&plan_path, &test_def.plan)?;
    }

    std::fs::remove_dir_all(&temp_dir)
        .map_err(|e| format!("failed to remove {temp_dir:?}: {e}"))?;

    Ok(())
}

fn get_tmp_dir() -> Result<PathBuf, String> {
    static NEXT_DIR: AtomicU32 = AtomicU32::new(0);

    let mut path = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
    path.push(format!(
        "plan-test-{:08x}-{:08x}",
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed),
    ));

    match std::fs::create_dir(&path) {
        Ok(()) => Ok(path),
        Err(e) => Err(format!("failed to create directory {path:?}: {e}")),
    }
}

fn make_svn_dump(test_def: &defs::Test) -> Vec<u8> {
    let mut dump = Vec::<u8>::new();

    dump.extend(b"SVN-fs-dump-format-version: 2\n\n");

    let rev_props = b"PROPS-END\n";

    dump.extend(b"Revision-number: 0\n");
    writeln!(dump, "Prop-content-length: {}", rev_props.len()).unwrap();
    writeln!(dump, "Content-length: {}", rev_props.len()).unwrap();
    dump.extend(b"\n");
    dump.extend(rev_props);
    dump.extend(b"\n");

    let mut prev_svn_rev_no = 0;
    for svn_rev in test_def.svn_revs.iter() {
        let svn_rev_no = svn_rev.no.unwrap_or(prev_svn_rev_no + 1);

        writeln!(dump, "Revision-number: {svn_rev_no}").unwrap();
        writeln!(dump, "Prop-content-length: {}", rev_props.len()).unwrap();
        writeln!(dump, "Content-length: {}", rev_props.len()).unwrap();
        dump.extend(b"\n");
        dump.extend(rev_props);
        dump.extend(b"\n");

        for svn_node in svn_rev.nodes.iter() {
            dump.extend(b"Node-path: ");
            dump.extend(svn_node.path.as_bytes());
            dump.extend(b"\n");

            dump.extend(b"Node-kind: ");
            dump.extend(match svn_node.kind {
                defs::SvnNodeKind::File => b"file".as_slice(),
                defs::SvnNodeKind::Dir => b"dir".as_slice(),
            });
            dump.extend(b"\n");

            dump.extend(b"Node-action: ");
            dump.extend(match svn_node.action {
                defs::SvnNodeAction::Change => b"change".as_slice(),
                defs::SvnNodeAction::Add => b"add".as_slice(),
                defs::SvnNodeAction::Delete => b"delete".as_slice(),
                defs::SvnNodeAction::Replace => b"replace".as_slice(),
            });
            dump.extend(b"\n");

            if let Some(ref copy_from_path) = svn_node.copy_from_path {
                dump.extend(b"Node-copyfrom-path: ");
                dump.extend(copy_from_path.as_bytes());
                dump.extend(b"\n");
                writeln!(
                    dump,
                    "Node-copyfrom-rev: {}",
                    svn_node.copy_from_rev.unwrap_or(prev_svn_rev_no),
                )
                .unwrap();
            }

            dump.extend(b"Content-length: 0\n");
            dump.extend(b"\n");
            dump.extend(b"\n");
        }

        prev_svn_rev_no = svn_rev_no;
    }

    dump
}

fn run_plan(
    plan_bin: &Path,
    config_path: &Path,
    svn_dump_path: &Path,
    plan_path: &Path,
    log_path: &Path,
    expect_exit_code: i32,
) -> Result<(), String> {
    let mut plan_cmd = std::process::Command::new(plan_bin);
    plan_cmd
        .arg("--no-progress")
        .arg("--config")
        .arg(config_path)
        .arg("--src")
        .arg(svn_dump_path)
        .arg("--plan-out")
        .arg(plan_path)
        .arg("--log-file")
        .arg(log_path);

    let cmd_out = plan_cmd
        .output()
        .map_err(|e| format!("failed to run {plan_bin:?}: {e}"))?;
    drop(plan_cmd);

    if cmd_out.status.code() != Some(expect_exit_code) {
        return Err(format!(
            "planner finished with exit code {}\nstdout:\n{}stderr:\n{}",
            cmd_out.status,
            String::from_utf8_lossy(&cmd_out.stdout),
            String::from_utf8_lossy(&cmd_out.stderr),
        ));
    }

    Ok(())
}

fn check_plan(plan_path: &Path, expected: &[String]) -> Result<(), String> {
    let plan_data = std::fs::read_to_string(plan_path)
        .map_err(|e| format!("failed to read {plan_path:?}: {e}"))?;

    let plan_lines: Vec<&str> = plan_data
        .lines()
        .filter(|line| !line.starts_with('#'))
        .collect();

    if plan_lines != expected {
        return Err(format!(
            "unexpected plan:\nexpected:\n{}\nactual:\n{}",
            expected.join("\n"),
            plan_lines.join("\n"),
        ));
    }

    Ok(())
}

// Each line of the expected pattern is a level prefix ("D ", "I ", "W " or
// "E ") followed by a message; some line of the log must carry that level
// and contain the message.
fn check_log(log_path: &Path, expected_pattern: &str) -> Result<(), String> {
    let log_data = std::fs::read_to_string(log_path)
        .map_err(|e| format!("failed to read {log_path:?}: {e}"))?;

    for pattern_line in expected_pattern.lines() {
        if pattern_line.is_empty() {
            continue;
        }

        let (level, message) = if let Some(line) = pattern_line.strip_prefix("D ") {
            ("DEBUG", line)
        } else if let Some(line) = pattern_line.strip_prefix("I ") {
            ("INFO", line)
        } else if let Some(line) = pattern_line.strip_prefix("W ") {
            ("WARN", line)
        } else if let Some(line) = pattern_line.strip_prefix("E ") {
            ("ERROR", line)
        } else {
            return Err(format!("invalid log pattern line: {pattern_line:?}"));
        };

        let found = log_data
            .lines()
            .any(|log_line| log_line.contains(level) && log_line.contains(message));
        if !found {
            return Err(format!(
                "log line {pattern_line:?} not found in {log_path:?}:\n{log_data}",
            ));
        }
    }

    Ok(())
}

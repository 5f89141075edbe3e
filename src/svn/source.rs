use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub(crate) enum OpenError {
    MetadataFetchError {
        path: PathBuf,
        error: std::io::Error,
    },
    FileOpenError {
        path: PathBuf,
        error: std::io::Error,
    },
    SpawnProcessError {
        arg0: OsString,
        error: std::io::Error,
    },
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetadataFetchError { path, error } => {
                write!(f, "failed to fetch metadata for {path:?}: {error}")
            }
            Self::FileOpenError { path, error } => {
                write!(f, "failed to open file {path:?}: {error}")
            }
            Self::SpawnProcessError { arg0, error } => {
                write!(f, "failed to spawn process {arg0:?}: {error}")
            }
        }
    }
}

/// A stream of SVN dump data, from a dump file, a local repository (via
/// `svnadmin dump`) or a remote repository (via `svnrdump dump`).
pub(crate) enum DumpSource {
    File(std::io::BufReader<std::fs::File>),
    Command(
        std::process::Child,
        std::io::BufReader<std::process::ChildStdout>,
    ),
}

impl DumpSource {
    pub(crate) fn open(src: &str) -> Result<Self, OpenError> {
        if src.contains("://") {
            return Self::spawn_dump_command("svnrdump", &["dump", src, "-q"]);
        }

        let path = Path::new(src);
        let path_meta = std::fs::metadata(path).map_err(|e| OpenError::MetadataFetchError {
            path: path.to_path_buf(),
            error: e,
        })?;
        if path_meta.file_type().is_dir() {
            Self::spawn_dump_command("svnadmin", &["dump", src, "-q"])
        } else {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| OpenError::FileOpenError {
                    path: path.to_path_buf(),
                    error: e,
                })?;
            Ok(Self::File(std::io::BufReader::new(file)))
        }
    }

    fn spawn_dump_command(arg0: &str, args: &[&str]) -> Result<Self, OpenError> {
        let mut child = std::process::Command::new(arg0)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|e| OpenError::SpawnProcessError {
                arg0: arg0.into(),
                error: e,
            })?;
        let stdout = child.stdout.take().unwrap();
        Ok(Self::Command(child, std::io::BufReader::new(stdout)))
    }

    pub(crate) fn stream(&mut self) -> &mut dyn std::io::BufRead {
        match self {
            Self::File(file) => file,
            Self::Command(_, stdout) => stdout,
        }
    }

    /// The stream does not have to be consumed up to EOF before closing.
    pub(crate) fn close(self) -> Result<(), std::io::Error> {
        match self {
            Self::File(_) => Ok(()),
            Self::Command(mut child, stdout) => {
                // A child still writing blocks until the pipe read end is
                // gone, so it must be released before reaping. An abandoned
                // child dies from the broken pipe or the kill; only an
                // actual non-zero exit code counts as failure.
                drop(stdout);
                let _ = child.kill();
                let exit_code = child.wait()?;
                match exit_code.code() {
                    Some(code) if code != 0 => Err(std::io::Error::other(format!(
                        "process finished with code {code}"
                    ))),
                    _ => Ok(()),
                }
            }
        }
    }
}

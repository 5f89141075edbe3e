use std::collections::HashMap;
use std::io::Read as _;

// SVN dump file format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/dump-load-format.txt
//
// Only record headers are of interest here (revision numbers, node paths,
// actions and copy sources); property and text content is skipped unread.

pub(crate) enum Record {
    Rev(RevRecord),
    Node(NodeRecord),
}

pub(crate) struct RevRecord {
    pub(crate) rev_no: u32,
}

pub(crate) struct NodeRecord {
    pub(crate) path: Vec<u8>,
    pub(crate) action: NodeAction,
    pub(crate) copy_from: Option<NodeCopyFrom>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeAction {
    Change,
    Add,
    Delete,
    Replace,
}

impl NodeAction {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"change" => Some(Self::Change),
            b"add" => Some(Self::Add),
            b"delete" => Some(Self::Delete),
            b"replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NodeCopyFrom {
    pub(crate) rev: u32,
    pub(crate) path: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum ReadError {
    Io(std::io::Error),
    BrokenHeader,
    InvalidVersion { version: Vec<u8> },
    MissingHeaderEntry { key: Vec<u8> },
    InvalidHeaderEntry { key: Vec<u8>, value: Vec<u8> },
    UnknownRecordType,
}

impl From<std::io::Error> for ReadError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => write!(f, "failed to read source: {e}"),
            Self::BrokenHeader => write!(f, "broken header"),
            Self::InvalidVersion { ref version } => {
                write!(f, "invalid version: \"{}\"", version.escape_ascii())
            }
            Self::MissingHeaderEntry { ref key } => {
                write!(f, "missing header entry: \"{}\"", key.escape_ascii())
            }
            Self::InvalidHeaderEntry { ref key, ref value } => write!(
                f,
                "invalid value of header entry \"{}\": \"{}\"",
                key.escape_ascii(),
                value.escape_ascii(),
            ),
            Self::UnknownRecordType => write!(f, "unknown record type"),
        }
    }
}

pub(crate) struct DumpReader<'a> {
    source: &'a mut dyn std::io::BufRead,
}

impl<'a> DumpReader<'a> {
    pub(crate) fn new(source: &'a mut dyn std::io::BufRead) -> Result<Self, ReadError> {
        let header = parse_header(source)?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        let version_key = b"SVN-fs-dump-format-version";
        let raw_version =
            header
                .get(version_key.as_slice())
                .ok_or_else(|| ReadError::MissingHeaderEntry {
                    key: version_key.to_vec(),
                })?;
        if raw_version != b"2" && raw_version != b"3" {
            return Err(ReadError::InvalidVersion {
                version: raw_version.clone(),
            });
        }

        Ok(Self { source })
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<Record>, ReadError> {
        loop {
            let Some(header) = parse_header(self.source)? else {
                return Ok(None);
            };

            // Content (properties and text) is skipped; its size is known
            // from the headers.
            let content_len = match get_num_entry::<u64>(&header, b"Content-length")? {
                Some(len) => len,
                None => {
                    get_num_entry::<u64>(&header, b"Prop-content-length")?.unwrap_or(0)
                        + get_num_entry::<u64>(&header, b"Text-content-length")?.unwrap_or(0)
                }
            };

            if header.contains_key(b"UUID".as_slice()) {
                skip_content(self.source, content_len)?;
                continue;
            }

            if let Some(rev_no) = get_num_entry::<u32>(&header, b"Revision-number")? {
                skip_content(self.source, content_len)?;
                return Ok(Some(Record::Rev(RevRecord { rev_no })));
            }

            let node_path_key = b"Node-path";
            if let Some(raw_path) = header.get(node_path_key.as_slice()) {
                let action_key = b"Node-action";
                let raw_action =
                    header
                        .get(action_key.as_slice())
                        .ok_or_else(|| ReadError::MissingHeaderEntry {
                            key: action_key.to_vec(),
                        })?;
                let action =
                    NodeAction::parse(raw_action).ok_or_else(|| ReadError::InvalidHeaderEntry {
                        key: action_key.to_vec(),
                        value: raw_action.clone(),
                    })?;

                let copy_from_rev = get_num_entry::<u32>(&header, b"Node-copyfrom-rev")?;
                let copy_from_path = header.get(b"Node-copyfrom-path".as_slice());
                let copy_from = match (copy_from_rev, copy_from_path) {
                    (None, None) => None,
                    (Some(rev), Some(path)) => Some(NodeCopyFrom {
                        rev,
                        path: path.clone(),
                    }),
                    (Some(_), None) => {
                        return Err(ReadError::MissingHeaderEntry {
                            key: b"Node-copyfrom-path".to_vec(),
                        });
                    }
                    (None, Some(_)) => {
                        return Err(ReadError::MissingHeaderEntry {
                            key: b"Node-copyfrom-rev".to_vec(),
                        });
                    }
                };

                skip_content(self.source, content_len)?;
                return Ok(Some(Record::Node(NodeRecord {
                    path: raw_path.clone(),
                    action,
                    copy_from,
                })));
            }

            return Err(ReadError::UnknownRecordType);
        }
    }
}

type RecordHeader = HashMap<Vec<u8>, Vec<u8>>;

fn parse_header(r: &mut dyn std::io::BufRead) -> Result<Option<RecordHeader>, ReadError> {
    let mut buf = Vec::new();
    r.read_until(b'\n', &mut buf)?;
    while buf == b"\n" {
        buf.clear();
        r.read_until(b'\n', &mut buf)?;
    }
    if buf.is_empty() {
        return Ok(None);
    }
    let mut map = HashMap::new();
    // A blank line ends the header, as does end of stream.
    while buf != b"\n" && !buf.is_empty() {
        let line = match buf.strip_suffix(b"\n") {
            Some(line) => line,
            None => buf.as_slice(),
        };

        let sep_pos = line
            .windows(2)
            .position(|n| n == b": ")
            .ok_or(ReadError::BrokenHeader)?;
        map.insert(line[..sep_pos].to_vec(), line[(sep_pos + 2)..].to_vec());

        buf.clear();
        r.read_until(b'\n', &mut buf)?;
    }

    Ok(Some(map))
}

fn get_num_entry<T: std::str::FromStr>(
    header: &RecordHeader,
    key: &[u8],
) -> Result<Option<T>, ReadError> {
    header
        .get(key)
        .map(|raw| {
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<T>().ok())
                .ok_or_else(|| ReadError::InvalidHeaderEntry {
                    key: key.to_vec(),
                    value: raw.clone(),
                })
        })
        .transpose()
}

fn skip_content(r: &mut dyn std::io::BufRead, len: u64) -> Result<(), std::io::Error> {
    std::io::copy(&mut r.take(len), &mut std::io::sink()).and_then(|copied| {
        if copied == len {
            Ok(())
        } else {
            Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
        }
    })
}

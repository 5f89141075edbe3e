//! User-supplied conversion configuration.
//!
//! Several configuration files can be given; they are merged in order with
//! [`Config::merge`] before [`Config::verify`] checks them as a whole.

/// Sentinel revision meaning "latest"; sorts after every real revision.
pub(crate) const HEAD_REVISION: u32 = u32::MAX;

#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) general: General,
    #[serde(default = "Vec::new")]
    pub(crate) branches: Vec<Branch>,
    #[serde(default = "Vec::new")]
    pub(crate) committers: Vec<Committer>,
    #[serde(default = "Vec::new")]
    pub(crate) filters: Vec<String>,
}

#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct General {
    #[serde(rename = "subversion-url")]
    pub(crate) subversion_url: Option<String>,
    #[serde(rename = "last-revision")]
    pub(crate) last_revision: Option<u32>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Branch {
    pub(crate) name: String,
    pub(crate) origin: Option<SourceRef>,
    #[serde(rename = "revision-paths", default = "Vec::new")]
    pub(crate) revision_paths: Vec<RevisionPath>,
    #[serde(default = "Vec::new")]
    pub(crate) merges: Vec<Merge>,
    #[serde(default = "Vec::new")]
    pub(crate) tags: Vec<Tag>,
    #[serde(default = "Vec::new")]
    pub(crate) fixes: Vec<Fix>,
}

/// A reference to a point on another branch, either via a tag name or as an
/// explicit branch and revision.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum SourceRef {
    Tag { tag: String },
    Branch { branch: String, revision: u32 },
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RevisionPath {
    #[serde(deserialize_with = "de_revision")]
    pub(crate) revision: u32,
    pub(crate) path: String,
}

#[derive(serde::Deserialize)]
pub(crate) struct Merge {
    /// The revision on the declaring branch at which the merge commit occurs.
    #[serde(default)]
    pub(crate) revision: u32,
    #[serde(flatten)]
    pub(crate) source: MergeSourceRef,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum MergeSourceRef {
    Tag {
        tag: String,
    },
    Branch {
        branch: String,
        /// Revision to merge from the source branch. Defaults to the merge's
        /// own trigger revision.
        #[serde(rename = "source-revision", default)]
        source_revision: Option<u32>,
    },
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Tag {
    pub(crate) revision: u32,
    pub(crate) name: String,
    /// The revision whose commit message supplies the tag annotation.
    #[serde(rename = "message-revision")]
    pub(crate) message_revision: u32,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Fix {
    pub(crate) revision: u32,
    pub(crate) message: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Committer {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) email: String,
}

#[derive(Debug)]
pub(crate) struct ConfigError {
    problems: Vec<String>,
}

impl ConfigError {
    pub(crate) fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} configuration problem(s): ", self.problems.len())?;
        for (i, problem) in self.problems.iter().enumerate() {
            if i != 0 {
                f.write_str("; ")?;
            }
            f.write_str(problem)?;
        }
        Ok(())
    }
}

impl Config {
    /// Merges `other` into `self`, with `other` taking precedence: general
    /// fields are overridden when set, committers are merged by id, a
    /// non-empty branch list replaces the previous one, filters concatenate.
    pub(crate) fn merge(self, other: Config) -> Config {
        let mut committers: Vec<Committer> = self
            .committers
            .into_iter()
            .filter(|c| !other.committers.iter().any(|oc| oc.id == c.id))
            .collect();
        committers.extend(other.committers);

        let mut filters = self.filters;
        filters.extend(other.filters);

        Config {
            general: General {
                subversion_url: other.general.subversion_url.or(self.general.subversion_url),
                last_revision: other.general.last_revision.or(self.general.last_revision),
            },
            branches: if other.branches.is_empty() {
                self.branches
            } else {
                other.branches
            },
            committers,
            filters,
        }
    }

    /// Checks structural and referential integrity, collecting every problem
    /// instead of stopping at the first one.
    pub(crate) fn verify(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for branch in self.branches.iter() {
            if is_invalid_ref_name(&branch.name) {
                problems.push(format!("invalid branch name: {:?}", branch.name));
            }
            if branch.revision_paths.is_empty() {
                problems.push(format!("branch {:?} has no revision paths", branch.name));
            }
        }

        let branch_names: Vec<&str> = self.branches.iter().map(|b| b.name.as_str()).collect();
        for (i, name) in branch_names.iter().enumerate() {
            if branch_names[..i].contains(name) {
                problems.push(format!("duplicate branch name: {name:?}"));
            }
        }

        let tag_names: Vec<&str> = self
            .branches
            .iter()
            .flat_map(|b| b.tags.iter())
            .map(|t| t.name.as_str())
            .collect();
        for (i, name) in tag_names.iter().enumerate() {
            if tag_names[..i].contains(name) {
                problems.push(format!("duplicate tag name: {name:?}"));
            }
            if is_invalid_ref_name(name) {
                problems.push(format!("invalid tag name: {name:?}"));
            }
        }

        for branch in self.branches.iter() {
            match branch.origin {
                Some(SourceRef::Tag { ref tag }) => {
                    if !tag_names.contains(&tag.as_str()) {
                        problems.push(format!(
                            "origin of branch {:?} references unknown tag {tag:?}",
                            branch.name,
                        ));
                    }
                }
                Some(SourceRef::Branch { branch: ref origin_branch, .. }) => {
                    if !branch_names.contains(&origin_branch.as_str()) {
                        problems.push(format!(
                            "origin of branch {:?} references unknown branch {origin_branch:?}",
                            branch.name,
                        ));
                    }
                }
                None => {}
            }

            for merge in branch.merges.iter() {
                match merge.source {
                    MergeSourceRef::Tag { ref tag } => {
                        if !tag_names.contains(&tag.as_str()) {
                            problems.push(format!(
                                "merge into branch {:?} references unknown tag {tag:?}",
                                branch.name,
                            ));
                        }
                    }
                    MergeSourceRef::Branch { branch: ref source_branch, .. } => {
                        if !branch_names.contains(&source_branch.as_str()) {
                            problems.push(format!(
                                "merge into branch {:?} references unknown branch {source_branch:?}",
                                branch.name,
                            ));
                        }
                    }
                }
                if merge.revision == 0 {
                    problems.push(format!(
                        "merge into branch {:?} has no trigger revision",
                        branch.name,
                    ));
                }
            }
        }

        let committer_ids: Vec<&str> = self.committers.iter().map(|c| c.id.as_str()).collect();
        for (i, id) in committer_ids.iter().enumerate() {
            if committer_ids[..i].contains(id) {
                problems.push(format!("duplicate committer id: {id:?}"));
            }
        }

        for filter in self.filters.iter() {
            if let Err(e) = regex_automata::meta::Regex::new(filter) {
                problems.push(format!("invalid filter pattern {filter:?}: {e}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }
}

/// Ref-name safety rules shared by branch and tag names, following the rules
/// of `git check-ref-format`.
fn is_invalid_ref_name(name: &str) -> bool {
    name.is_empty()
        || name
            .split('/')
            .any(|seg| seg.starts_with('.') || seg.ends_with(".lock"))
        || name.contains("..")
        || name.chars().any(|c| {
            matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[') || c < ' ' || c == '\u{7f}'
        })
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains("//")
        || name.ends_with('.')
        || name.contains("@{")
        || name == "@"
        || name.contains('\\')
}

fn de_revision<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct RevisionVisitor;

    impl serde::de::Visitor<'_> for RevisionVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a revision number or \"HEAD\"")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("revision {v} out of range")))
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("revision {v} out of range")))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<u32, E> {
            if v == "HEAD" {
                Ok(HEAD_REVISION)
            } else {
                Err(E::custom(format!("invalid revision {v:?}")))
            }
        }
    }

    deserializer.deserialize_any(RevisionVisitor)
}

#[cfg(test)]
mod test {
    use super::{Config, HEAD_REVISION, MergeSourceRef, SourceRef, is_invalid_ref_name};

    fn parse(raw: &str) -> Config {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(indoc::indoc! {r#"
            filters = ["\\.bin$"]

            [general]
            subversion-url = "file:///tmp/repo"
            last-revision = 100

            [[branches]]
            name = "main"
            revision-paths = [
                { revision = 1, path = "/trunk" },
                { revision = "HEAD", path = "/trunk2" },
            ]

            [[branches.tags]]
            revision = 10
            name = "v1"
            message-revision = 11

            [[branches]]
            name = "feature"
            origin = { tag = "v1" }
            revision-paths = [{ revision = 12, path = "/branches/feature" }]

            [[branches.merges]]
            revision = 20
            branch = "main"
            source-revision = 19

            [[branches.fixes]]
            revision = 13
            message = "fixed message"

            [[committers]]
            id = "alice"
            name = "Alice"
            email = "alice@example.com"
        "#});

        assert_eq!(config.general.subversion_url.as_deref(), Some("file:///tmp/repo"));
        assert_eq!(config.general.last_revision, Some(100));
        assert_eq!(config.branches.len(), 2);

        let main = &config.branches[0];
        assert_eq!(main.name, "main");
        assert!(main.origin.is_none());
        assert_eq!(main.revision_paths[0].revision, 1);
        assert_eq!(main.revision_paths[1].revision, HEAD_REVISION);
        assert_eq!(main.tags[0].name, "v1");
        assert_eq!(main.tags[0].message_revision, 11);

        let feature = &config.branches[1];
        assert_eq!(feature.origin, Some(SourceRef::Tag { tag: "v1".into() }));
        assert_eq!(feature.merges[0].revision, 20);
        assert_eq!(
            feature.merges[0].source,
            MergeSourceRef::Branch {
                branch: "main".into(),
                source_revision: Some(19),
            },
        );
        assert_eq!(feature.fixes[0].revision, 13);

        assert_eq!(config.committers[0].id, "alice");
        assert_eq!(config.filters, ["\\.bin$"]);

        config.verify().unwrap();
    }

    #[test]
    fn test_parse_origin_by_branch_and_merge_by_tag() {
        let config = parse(indoc::indoc! {r#"
            [[branches]]
            name = "main"
            revision-paths = [{ revision = 1, path = "/trunk" }]

            [[branches.tags]]
            revision = 3
            name = "v1"
            message-revision = 3

            [[branches]]
            name = "feature"
            origin = { branch = "main", revision = 3 }
            revision-paths = [{ revision = 4, path = "/branches/feature" }]

            [[branches.merges]]
            revision = 7
            tag = "v1"
        "#});

        assert_eq!(
            config.branches[1].origin,
            Some(SourceRef::Branch {
                branch: "main".into(),
                revision: 3,
            }),
        );
        assert_eq!(
            config.branches[1].merges[0].source,
            MergeSourceRef::Tag { tag: "v1".into() },
        );

        config.verify().unwrap();
    }

    #[test]
    fn test_merge_configs() {
        let base = parse(indoc::indoc! {r#"
            filters = ["a"]

            [general]
            subversion-url = "file:///base"
            last-revision = 10

            [[branches]]
            name = "old"
            revision-paths = [{ revision = 1, path = "/old" }]

            [[committers]]
            id = "alice"
            name = "Alice"
            email = "alice@base"
        "#});
        let overlay = parse(indoc::indoc! {r#"
            filters = ["b"]

            [general]
            subversion-url = "file:///overlay"

            [[branches]]
            name = "new"
            revision-paths = [{ revision = 1, path = "/new" }]

            [[committers]]
            id = "alice"
            name = "Alice"
            email = "alice@overlay"

            [[committers]]
            id = "bob"
            name = "Bob"
            email = "bob@overlay"
        "#});

        let merged = base.merge(overlay);
        assert_eq!(merged.general.subversion_url.as_deref(), Some("file:///overlay"));
        assert_eq!(merged.general.last_revision, Some(10));
        assert_eq!(merged.branches.len(), 1);
        assert_eq!(merged.branches[0].name, "new");
        assert_eq!(merged.committers.len(), 2);
        assert_eq!(merged.committers[0].email, "alice@overlay");
        assert_eq!(merged.filters, ["a", "b"]);
    }

    #[test]
    fn test_verify_collects_all_problems() {
        let config = parse(indoc::indoc! {r#"
            [[branches]]
            name = "bad name"
            revision-paths = [{ revision = 1, path = "/a" }]

            [[branches]]
            name = "main"

            [[branches]]
            name = "main"
            revision-paths = [{ revision = 1, path = "/b" }]
            origin = { tag = "no-such-tag" }

            [[branches.merges]]
            revision = 0
            branch = "missing"
        "#});

        let e = config.verify().unwrap_err();
        let problems = e.problems();
        assert!(problems.iter().any(|p| p.contains("invalid branch name")));
        assert!(problems.iter().any(|p| p.contains("no revision paths")));
        assert!(problems.iter().any(|p| p.contains("duplicate branch name")));
        assert!(problems.iter().any(|p| p.contains("unknown tag \"no-such-tag\"")));
        assert!(problems.iter().any(|p| p.contains("unknown branch \"missing\"")));
        assert!(problems.iter().any(|p| p.contains("no trigger revision")));
        assert_eq!(problems.len(), 6);
    }

    #[test]
    fn test_verify_rejects_bad_filter_pattern() {
        let config = parse(indoc::indoc! {r#"
            filters = ["("]
        "#});
        let e = config.verify().unwrap_err();
        assert!(e.problems()[0].contains("invalid filter pattern"));
    }

    #[test]
    fn test_ref_name_validity() {
        for name in ["main", "feature/one", "v1.2.3", "a-b_c", "@at"] {
            assert!(!is_invalid_ref_name(name), "{name:?}");
        }
        for name in [
            "",
            "a b",
            "/lead",
            "trail/",
            "dou//ble",
            ".dot",
            "seg/.dot",
            "end.",
            "a.lock",
            "a.lock/b",
            "a..b",
            "a~b",
            "a^b",
            "a:b",
            "a?b",
            "a*b",
            "a[b",
            "a@{b",
            "@",
            "a\\b",
            "a\u{7f}b",
        ] {
            assert!(is_invalid_ref_name(name), "{name:?}");
        }
    }
}

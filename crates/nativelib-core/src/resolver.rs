//! Candidate locations for a library inside the resource bundle.

use std::fmt;

use crate::platform::PlatformTag;

/// Root that bundles conventionally place their native libraries under.
pub const DEFAULT_SEARCH_ROOT: &str = "natives/";
/// The bundle root itself.
pub const ARCHIVE_ROOT: &str = "";
/// Root used by bundles that follow the `META-INF` layout.
pub const META_INF_LIB_ROOT: &str = "META-INF/lib";

/// One place a library may be stored, e.g. `natives/linux_64/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    root: String,
    directory: String,
}

impl Candidate {
    /// The search root as the caller supplied it.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Normalized directory prefix including the platform tag and trailing
    /// `/`.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Full resource path of `file_name` under this candidate.
    pub fn resource_path(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.directory)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directory)
    }
}

/// Computes candidate directories for one platform tag.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    tag: PlatformTag,
}

impl Resolver {
    pub fn new(tag: PlatformTag) -> Self {
        Self { tag }
    }

    pub fn tag(&self) -> PlatformTag {
        self.tag
    }

    /// Directory for this platform under `root`.
    ///
    /// `natives`, `natives/` and `natives//` all normalize to
    /// `natives/{tag}/`; the empty root yields `{tag}/`.
    pub fn platform_path(&self, root: &str) -> String {
        let trimmed = root.trim_end_matches('/');
        if trimmed.is_empty() {
            format!("{}/", self.tag)
        } else {
            format!("{trimmed}/{}/", self.tag)
        }
    }

    /// Candidate directories in search order: `natives/`, the bundle root,
    /// `META-INF/lib`, then `extra_roots` in the order given.
    pub fn candidate_paths<S: AsRef<str>>(&self, extra_roots: &[S]) -> Vec<Candidate> {
        [DEFAULT_SEARCH_ROOT, ARCHIVE_ROOT, META_INF_LIB_ROOT]
            .into_iter()
            .chain(extra_roots.iter().map(AsRef::as_ref))
            .map(|root| Candidate {
                root: root.to_string(),
                directory: self.platform_path(root),
            })
            .collect()
    }
}

//! Workspace identity and root location.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

/// URI scheme that marks a workspace as locally addressable.
pub const LOCAL_SCHEME: &str = "file";

/// A logical project root supplied by the host.
///
/// Equality and hashing cover both fields, so two entries naming the same
/// folder under different names are distinct workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Workspace {
    /// Opaque identifier chosen by the host.
    pub name: String,
    /// Root location: a URI (`file:///…`) or a bare filesystem path.
    pub uri: String,
}

impl Workspace {
    /// Create a workspace from a name and root URI.
    #[must_use]
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    /// Create a workspace rooted at a local directory, encoding the path as a
    /// `file://` URI. A relative path is kept as a bare path.
    #[must_use]
    pub fn from_path(name: impl Into<String>, path: &Path) -> Self {
        let uri = Url::from_file_path(path)
            .map_or_else(|()| path.to_string_lossy().into_owned(), String::from);
        Self::new(name, uri)
    }

    /// URI scheme, or `None` for a bare path.
    ///
    /// Single-letter prefixes are drive letters, not schemes.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.uri.split_once(':')?;
        let mut chars = scheme.chars();
        let valid = scheme.len() > 1
            && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
        valid.then_some(scheme)
    }

    /// Filesystem root of the workspace when it is locally addressable.
    ///
    /// Returns `None` for any scheme other than `file`, and for a `file` URI
    /// naming a remote host; a bare path (including a Windows drive path) is
    /// its own root.
    #[must_use]
    pub fn local_root(&self) -> Option<PathBuf> {
        match self.scheme() {
            Some(scheme) if scheme.eq_ignore_ascii_case(LOCAL_SCHEME) => {
                Url::parse(&self.uri).ok()?.to_file_path().ok()
            }
            Some(_) => None,
            None if self.uri.trim().is_empty() => None,
            None => Some(PathBuf::from(&self.uri)),
        }
    }

    /// Whether the workspace may be supervised at all.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local_root().is_some()
    }
}

impl Display for Workspace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.uri)
    }
}

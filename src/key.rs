//! Database keys
//!
//! A key is a folder path plus a 64-bit hash naming one blob in that folder.

use std::fmt;

/// Address of a single blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HdbKey {
    /// Folder segments, outermost first
    pub path: Vec<String>,

    /// Blob identifier inside the folder
    pub hash: u64,
}

impl HdbKey {
    pub fn new<S: AsRef<str>>(path: &[S], hash: u64) -> Self {
        Self {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            hash,
        }
    }

    /// Key at the root folder
    pub fn root(hash: u64) -> Self {
        Self { path: Vec::new(), hash }
    }
}

impl fmt::Display for HdbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}#{}", self.path.join("/"), self.hash)
    }
}

// plantvault/src/removable/deny.rs
use std::path::Path;

/// Paths a backup destination may never be, nor contain.
const PROTECTED: &[&str] = &[
    "/",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/home",
    "/lib",
    "/lib64",
    "/opt",
    "/proc",
    "/root",
    "/run",
    "/sbin",
    "/srv",
    "/sys",
    "/tmp",
    "/usr",
    "/var",
    "/snap",
    "/System",
    "/Library",
    "/Applications",
    "/Users",
    "/private",
    "/Volumes/Macintosh HD",
    "C:\\",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
    "C:\\ProgramData",
    "C:\\Users",
];

/// Trees whose descendants are never a removable mount either.
const SYSTEM_SUBTREES: &[&str] = &[
    "/boot",
    "/dev",
    "/etc",
    "/proc",
    "/sys",
    "/usr",
    "/var",
    "/snap",
    "/System",
    "/private",
    "C:\\Windows",
    "C:\\Program Files",
];

/// Normalized comparison of candidate destinations against system locations.
#[derive(Debug, Clone)]
pub struct DenyList {
    protected: Vec<String>,
    subtrees: Vec<String>,
}

impl Default for DenyList {
    fn default() -> Self {
        Self {
            protected: PROTECTED.iter().map(|p| normalize(p)).collect(),
            subtrees: SYSTEM_SUBTREES.iter().map(|p| normalize(p)).collect(),
        }
    }
}

impl DenyList {
    /// Adds a path that must never be used, e.g. the local backup directory.
    pub fn with_protected(mut self, path: &Path) -> Self {
        self.protected.push(normalize(&path.to_string_lossy()));
        self
    }

    /// Whether `candidate` equals or contains a protected path, or sits inside a system tree.
    pub fn rejects(&self, candidate: &Path) -> bool {
        let candidate = normalize(&candidate.to_string_lossy());
        if candidate.is_empty() {
            return true;
        }

        let contains_protected = self
            .protected
            .iter()
            .any(|protected| is_same_or_ancestor(&candidate, protected));
        let inside_system = self
            .subtrees
            .iter()
            .any(|tree| is_same_or_ancestor(tree, &candidate));

        contains_protected || inside_system
    }
}

/// Lower-cased, forward slashes, no trailing separator except for a bare root.
fn normalize(path: &str) -> String {
    let mut text = path.trim().replace('\\', "/").to_lowercase();
    while text.len() > 1 && text.ends_with('/') {
        text.pop();
    }
    text
}

fn is_same_or_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == path {
        return true;
    }
    let prefix = if ancestor.ends_with('/') {
        ancestor.to_string()
    } else {
        format!("{}/", ancestor)
    };
    path.starts_with(&prefix)
}

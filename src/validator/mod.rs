//! Safety Validator: the single authority answering "may this path be
//! deleted?". No other component performs ad-hoc path checks — the
//! Cleanup Executor calls [`validate_delete_target`] for every candidate
//! before it reaches a [`crate::deleter::Deleter`].
//!
//! The validator is deterministic and pure aside from the symlink
//! resolution in step 5, which is the only filesystem access it performs.

use std::path::{Path, PathBuf};

use crate::core::paths::{contains_parent_dir_component, lexically_clean, make_absolute, resolve_absolute_path};

/// Directories that must never be deleted, regardless of configuration.
/// Configuration may extend this list; it can never remove from it.
const PROTECTED_PATHS: &[&str] = &["/", "/etc", "/bin", "/sbin", "/usr", "/boot"];

/// Component-name prefix treated as protected wherever it appears as a
/// top-level directory (`/lib`, `/lib32`, `/lib64`, `/libexec`, ...).
const PROTECTED_LIB_PREFIX: &str = "lib";

/// Why a candidate path was rejected for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The cleaned path still contains an unresolved `..` component.
    Traversal,
    /// The path equals, or is contained within, a protected directory.
    ProtectedPath,
    /// The path does not lie within any configured/allowed root.
    OutsideRoot,
    /// The path's fully-resolved (symlink-following) form escapes every
    /// allowed root even though its lexical form did not.
    SymlinkEscape,
}

impl RejectReason {
    /// The `secondary_reason` tag recorded in the audit store for a `SKIP`
    /// row caused by this rejection.
    #[must_use]
    pub const fn as_secondary_reason(&self) -> &'static str {
        match self {
            Self::Traversal => "traversal",
            Self::ProtectedPath => "protected_path",
            Self::OutsideRoot => "outside_root",
            Self::SymlinkEscape => "symlink_escape",
        }
    }

    /// Whether this rejection indicates likely misconfiguration or an
    /// attack attempt, rather than an ordinary race (file already gone,
    /// etc). The Executor increments a dedicated error-class counter for
    /// these (spec §4.5 step 4).
    #[must_use]
    pub const fn is_safety_incident(&self) -> bool {
        matches!(self, Self::ProtectedPath | Self::SymlinkEscape)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_secondary_reason())
    }
}

/// The set of protected paths, extensible by configuration (additive only).
#[derive(Debug, Clone)]
pub struct ProtectedSet {
    extra: Vec<PathBuf>,
}

impl ProtectedSet {
    /// Build the protected set from configuration-supplied additions. The
    /// hard-coded base list is always included and cannot be overridden.
    #[must_use]
    pub fn new(additional: Vec<PathBuf>) -> Self {
        Self {
            extra: additional.into_iter().map(|p| lexically_clean(&make_absolute(&p))).collect(),
        }
    }

    fn contains(&self, cleaned: &Path) -> bool {
        for base in PROTECTED_PATHS {
            let base_path = Path::new(base);
            if is_prefix_or_equal(base_path, cleaned) {
                return true;
            }
        }
        if is_under_protected_lib_dir(cleaned) {
            return true;
        }
        self.extra.iter().any(|p| is_prefix_or_equal(p, cleaned))
    }
}

impl Default for ProtectedSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// `true` if `ancestor` equals `path`, or is a component-boundary-aligned
/// prefix of it (i.e. an ancestor directory).
fn is_prefix_or_equal(ancestor: &Path, path: &Path) -> bool {
    path.starts_with(ancestor)
}

fn is_under_protected_lib_dir(cleaned: &Path) -> bool {
    let mut components = cleaned.components();
    // Skip the RootDir component.
    if !matches!(components.next(), Some(std::path::Component::RootDir)) {
        return false;
    }
    match components.next() {
        Some(std::path::Component::Normal(name)) => name
            .to_str()
            .is_some_and(|s| s.starts_with(PROTECTED_LIB_PREFIX)),
        _ => false,
    }
}

/// The set of Roots currently authorized for deletion, used purely for
/// membership checks (lexical and resolved).
#[derive(Debug, Clone, Default)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().map(|p| lexically_clean(&make_absolute(&p))).collect(),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|r| path.starts_with(r))
    }
}

/// Validate that `path` may be deleted under `allowed_roots` with the given
/// additional `protected` extensions, following the five ordered checks.
/// The first failing step returns its reason; no step past it runs.
///
/// # Errors
///
/// Returns the first applicable [`RejectReason`].
pub fn validate_delete_target(
    path: &Path,
    allowed_roots: &AllowedRoots,
    protected: &ProtectedSet,
) -> Result<(), RejectReason> {
    // Step 1: normalize.
    let absolute = make_absolute(path);
    let cleaned = lexically_clean(&absolute);

    // Step 2: traversal check — on the cleaned path, not the raw input.
    if contains_parent_dir_component(&cleaned) {
        return Err(RejectReason::Traversal);
    }

    // Step 3: protected-path check.
    if protected.contains(&cleaned) {
        return Err(RejectReason::ProtectedPath);
    }

    // Step 4: allowed-root check (lexical).
    if !allowed_roots.contains(&cleaned) {
        return Err(RejectReason::OutsideRoot);
    }

    // Step 5: symlink-escape check — fully resolve symlinks (including
    // intermediate components) and re-check root membership.
    let resolved = resolve_absolute_path(&cleaned);
    if !allowed_roots.contains(&resolved) {
        return Err(RejectReason::SymlinkEscape);
    }

    Ok(())
}

//! Constants shared across the crate.

/// Application name, used for directory names and lock metadata.
pub const APP_NAME: &str = "kiln";

/// Lock file created inside every artifact cache directory held by a resolution.
pub const LOCK_FILENAME: &str = ".kiln.lock";

/// Default artifact type of a dependency.
pub const DEFAULT_TYPE: &str = "jar";

/// Default dependency scope.
pub const DEFAULT_SCOPE: &str = "compile";

/// Suffix of snapshot versions.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Maximum number of `${...}` substitution passes when interpolating POM properties.
pub const MAX_PROPERTY_DEPTH: usize = 8;

/// Maximum number of parent POMs followed from one POM.
pub const MAX_PARENT_DEPTH: usize = 16;

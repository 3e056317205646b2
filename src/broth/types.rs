//! Wire types for broth's JSON descriptors.

use serde::{Deserialize, Serialize};

/// Kind of a file listed in a build descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildFileType {
    /// Full zip archive of the build.
    Archive,
    /// Binary patch from the previous version.
    Patch,
    /// Content-addressed signature.
    Signature,
    /// Anything this client version does not know about.
    #[serde(other)]
    Unknown,
}

/// Sub-type of a build file; patches come in a default and sometimes a
/// smaller optimized variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildFileSubType {
    /// Always present.
    Default,
    /// Present when the build pipeline produced a smaller variant.
    Optimized,
    /// Anything this client version does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for BuildFileSubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Optimized => write!(f, "optimized"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One file in a build descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFile {
    /// What the file is.
    #[serde(rename = "type")]
    pub kind: BuildFileType,
    /// Which variant it is.
    pub sub_type: BuildFileSubType,
    /// Size in bytes, as the CDN will serve it.
    pub size: u64,
}

/// The `/{version}/info` descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    /// The version the descriptor is for.
    pub version: String,
    /// Files available for this build.
    pub files: Vec<BuildFile>,
}

impl BuildInfo {
    /// Finds a file by kind and sub-type.
    #[must_use]
    pub fn find_file(&self, kind: BuildFileType, sub_type: BuildFileSubType) -> Option<&BuildFile> {
        self.files.iter().find(|f| f.kind == kind && f.sub_type == sub_type)
    }
}

/// The `upgrade-paths/{from}/{to}` descriptor: an ordered patch chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePath {
    /// Patch steps, oldest first, ending at the requested target version.
    pub patches: Vec<PatchDescriptor>,
}

/// One step of an upgrade path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDescriptor {
    /// The version this step upgrades *to*.
    pub version: String,
    /// Patch variants available for this step.
    pub files: Vec<PatchFile>,
}

/// One patch variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFile {
    /// Variant tag.
    pub sub_type: BuildFileSubType,
    /// Size in bytes.
    pub size: u64,
}

impl PatchDescriptor {
    /// Finds a patch variant by sub-type.
    #[must_use]
    pub fn find_sub_type(&self, sub_type: BuildFileSubType) -> Option<&PatchFile> {
        self.files.iter().find(|f| f.sub_type == sub_type)
    }

    /// The variant to download: the default, unless an optimized variant
    /// exists and is strictly smaller. `None` when the step has no default
    /// variant at all, which invalidates the whole patch plan.
    #[must_use]
    pub fn best_file(&self) -> Option<&PatchFile> {
        let default = self.find_sub_type(BuildFileSubType::Default)?;
        match self.find_sub_type(BuildFileSubType::Optimized) {
            Some(optimized) if optimized.size < default.size => Some(optimized),
            _ => Some(default),
        }
    }
}

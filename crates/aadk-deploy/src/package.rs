//! Choosing the installable artifact for a target.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::debug;
use walkdir::WalkDir;

use crate::builder::{BuildResults, BuildType};
use crate::error::{DeployError, Result};
use crate::target::Arch;

// Longest markers first so `-x86_64` is not read as `-x86`.
const ABI_MARKERS: [&str; 7] = [
    "arm64-v8a",
    "armeabi-v7a",
    "armeabi",
    "x86_64",
    "arm64",
    "x86",
    "arm",
];

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub(crate) fn is_debug_apk(path: &Path) -> bool {
    file_name(path).contains("-debug")
}

pub(crate) fn is_unsigned_apk(path: &Path) -> bool {
    file_name(path).ends_with("-unsigned.apk")
}

/// ABI encoded in an artifact name as a `-<abi>` segment.
pub(crate) fn abi_marker(path: &Path) -> Option<&'static str> {
    let name = file_name(path);
    ABI_MARKERS
        .iter()
        .copied()
        .find(|abi| name.contains(&format!("-{abi}")))
}

pub(crate) fn matches_build_type(path: &Path, build_type: BuildType) -> bool {
    match build_type {
        BuildType::Debug => is_debug_apk(path),
        BuildType::Release => !is_debug_apk(path),
    }
}

/// Picks the apk to install on a target of the given architecture.
///
/// Artifacts of the wrong build type are ignored. An architecture-tagged
/// artifact of the matching family wins; otherwise the first untagged
/// (universal) artifact is used.
pub fn find_best_apk_for_architecture(results: &BuildResults, arch: Arch) -> Result<PathBuf> {
    let candidates: Vec<&PathBuf> = results
        .apk_paths()
        .iter()
        .filter(|path| matches_build_type(path, results.build_type()))
        .collect();

    let tagged = candidates.iter().find(|path| {
        abi_marker(path)
            .and_then(Arch::from_abi)
            .is_some_and(|family| family == arch)
    });
    let universal = candidates.iter().find(|path| abi_marker(path).is_none());

    match tagged.or(universal) {
        Some(path) => Ok((*path).clone()),
        None => Err(DeployError::NoMatchingApk {
            arch,
            build_type: results.build_type(),
        }),
    }
}

#[derive(Debug)]
struct ApkCandidate {
    path: PathBuf,
    modified: SystemTime,
    unsigned: bool,
}

/// Signed before unsigned, then newest first, then shortest path.
fn compare_candidates(a: &ApkCandidate, b: &ApkCandidate) -> Ordering {
    a.unsigned
        .cmp(&b.unsigned)
        .then_with(|| b.modified.cmp(&a.modified))
        .then_with(|| a.path.as_os_str().len().cmp(&b.path.as_os_str().len()))
}

/// Orders apk paths for deployment. Paths whose metadata cannot be read
/// sort as the oldest.
pub fn sort_apks(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut candidates: Vec<ApkCandidate> = paths
        .into_iter()
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let unsigned = is_unsigned_apk(&path);
            ApkCandidate {
                path,
                modified,
                unsigned,
            }
        })
        .collect();
    candidates.sort_by(compare_candidates);
    candidates.into_iter().map(|c| c.path).collect()
}

/// Every `.apk` below `dir`, in deployment order.
pub fn discover_apks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|err| {
            DeployError::Io(
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir loop detected")),
            )
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("apk"))
        {
            paths.push(path.to_path_buf());
        }
    }
    debug!("found {} apk(s) under {}", paths.len(), dir.display());
    Ok(sort_apks(paths))
}

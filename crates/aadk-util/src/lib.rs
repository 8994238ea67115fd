use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEPLOY_CONFIG_FILE: &str = "deploy-config.json";

pub fn read_env_trimmed(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/aadk")
    } else {
        PathBuf::from("/tmp/aadk")
    }
}

pub fn config_file_path(file_name: &str) -> PathBuf {
    data_dir().join(file_name)
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn android_sdk_root() -> Option<PathBuf> {
    read_env_trimmed("ANDROID_SDK_ROOT")
        .or_else(|| read_env_trimmed("ANDROID_HOME"))
        .map(|root| expand_user(&root))
}

/// Android user home holding `avd/`; honours `ANDROID_AVD_HOME` and
/// `ANDROID_USER_HOME` before falling back to `~/.android`.
pub fn android_avd_home() -> PathBuf {
    if let Some(dir) = read_env_trimmed("ANDROID_AVD_HOME") {
        return expand_user(&dir);
    }
    if let Some(dir) = read_env_trimmed("ANDROID_USER_HOME") {
        return expand_user(&dir).join("avd");
    }
    expand_user("~/.android").join("avd")
}

pub fn find_command(cmd: &str) -> Option<PathBuf> {
    if cmd.contains('/') {
        let path = PathBuf::from(cmd);
        return path.is_file().then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn sdk_candidate(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if candidate.is_file() {
        return Some(candidate);
    }
    let candidate = dir.join(format!("{name}.exe"));
    candidate.is_file().then_some(candidate)
}

/// Locates an SDK tool: explicit env override, then `<sdk>/<subdir>/<name>`,
/// then whatever `PATH` resolves.
pub fn sdk_tool_path(env_key: &str, subdir: &str, name: &str) -> PathBuf {
    if let Some(path) = read_env_trimmed(env_key) {
        return expand_user(&path);
    }
    if let Some(found) = android_sdk_root().and_then(|root| sdk_candidate(&root.join(subdir), name))
    {
        return found;
    }
    find_command(name).unwrap_or_else(|| PathBuf::from(name))
}

/// `build-tools` ships one directory per version; the newest one that has
/// the tool wins.
pub fn build_tool_path(env_key: &str, name: &str) -> PathBuf {
    if let Some(path) = read_env_trimmed(env_key) {
        return expand_user(&path);
    }
    android_sdk_root()
        .and_then(|root| build_tool_in(&root, name))
        .or_else(|| find_command(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

fn build_tool_in(sdk_root: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(sdk_root.join("build-tools")).ok()?;
    let mut versions: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    versions.sort_by(|a, b| compare_versions(&version_of(b), &version_of(a)));
    versions.iter().find_map(|dir| sdk_candidate(dir, name))
}

fn version_of(path: &Path) -> Vec<u64> {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .split(['.', '-'])
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

fn compare_versions(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    a.cmp(b)
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

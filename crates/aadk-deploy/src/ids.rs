use crate::target::TargetKind;

const EMULATOR_PREFIX: &str = "emulator-";

pub(crate) fn normalize_adb_addr(addr: &str) -> String {
    let addr = addr.trim();
    let lower = addr.to_ascii_lowercase();
    for prefix in ["localhost:", "127.0.0.1:", "0.0.0.0:", "[::1]:", "[::]:"] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            return format!("localhost:{rest}");
        }
    }
    addr.to_string()
}

pub fn normalize_target_id(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.contains(':') {
        return normalize_adb_addr(trimmed);
    }
    trimmed.to_string()
}

pub(crate) fn normalize_target_id_for_compare(value: &str) -> String {
    normalize_target_id(value).to_ascii_lowercase()
}

/// adb resolves `127.0.0.1:<port>` but not every alias of the loopback
/// address, so serials are rewritten before being passed to `-s`.
pub(crate) fn canonicalize_adb_serial(addr: &str) -> String {
    let addr = addr.trim();
    for prefix in ["localhost:", "0.0.0.0:", "[::1]:", "[::]:"] {
        if let Some(rest) = addr.strip_prefix(prefix) {
            return format!("127.0.0.1:{rest}");
        }
    }
    addr.to_string()
}

pub fn classify_target_kind(id: &str) -> TargetKind {
    if emulator_port(id).is_some() {
        TargetKind::Emulator
    } else {
        TargetKind::Device
    }
}

pub(crate) fn emulator_port(id: &str) -> Option<u16> {
    id.trim().strip_prefix(EMULATOR_PREFIX)?.parse().ok()
}

pub(crate) fn emulator_id_for_port(port: u16) -> String {
    format!("{EMULATOR_PREFIX}{port}")
}

use std::path::Path;

use crate::app::error::AppError;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Resolves the configured device-bridge path to the program the runner
/// spawns. The path arrives from the platform-tools resolver as an opaque
/// string; an empty value falls back to `adb` on PATH.
pub fn resolve_bridge_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

pub fn validate_bridge_program(program: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::validation(
            "Device-bridge command is empty",
            trace_id,
        ));
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(AppError::validation(
            "Device-bridge path must point to an executable file",
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::validation(
            "Device-bridge executable not found at the configured path",
            trace_id,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/platform-tools/adb\"  "),
            "/opt/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/platform-tools/adb'  "),
            "/opt/platform-tools/adb"
        );
    }

    #[test]
    fn resolves_empty_to_path_adb() {
        assert_eq!(resolve_bridge_program(""), "adb");
        assert_eq!(resolve_bridge_program("   "), "adb");
        assert_eq!(
            resolve_bridge_program("/opt/platform-tools/adb"),
            "/opt/platform-tools/adb"
        );
    }

    #[test]
    fn validates_nonexistent_path() {
        let err =
            validate_bridge_program("/this/path/should/not/exist/adb", "test-trace").unwrap_err();
        assert!(err.error.to_lowercase().contains("not found"));
        assert_eq!(err.code, "ERR_VALIDATION");
    }
}

use regex::Regex;

use crate::app::error::AppError;
use crate::app::models::{Device, StorageInfo};

/// Parses `devices -l` output. Header/noise lines and malformed rows are
/// skipped, never fatal; trailing tokens are `key:value` pairs with
/// case-insensitive keys.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Option<Device> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    let id = tokens[0].to_string();
    if id.is_empty() {
        return None;
    }
    let status = tokens[1].to_string();
    let mut device = Device {
        is_online: status == "device",
        id,
        status,
        model: None,
        device_name: None,
        product: None,
        transport_id: None,
    };
    for token in tokens.iter().skip(2) {
        // Pairs without a proper colon split (missing, leading, trailing)
        // are skipped rather than treated as corrupt rows.
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        if key.is_empty() || value.is_empty() {
            continue;
        }
        match key.to_lowercase().as_str() {
            "model" => device.model = Some(value.to_string()),
            "device" => device.device_name = Some(value.to_string()),
            "product" => device.product = Some(value.to_string()),
            "transport_id" => device.transport_id = Some(value.to_string()),
            _ => {}
        }
    }
    Some(device)
}

/// Strips ANSI escape sequences (`ESC [ params letter`) so colored `ls`
/// output can be treated as plain filenames.
pub fn strip_ansi_codes(line: &str) -> String {
    // Compiled per call; listing volumes here are tens of lines.
    match Regex::new("\x1b\\[[0-9;]*[A-Za-z]") {
        Ok(pattern) => pattern.replace_all(line, "").into_owned(),
        Err(_) => line.to_string(),
    }
}

const MISSING_PATH_MARKERS: [&str; 2] = ["no such file or directory", "cannot access"];

/// True when combined stdout+stderr indicates the listed path simply does
/// not exist, which callers treat as an empty listing rather than an error.
pub fn is_missing_path_output(combined: &str) -> bool {
    let lowered = combined.to_lowercase();
    MISSING_PATH_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Extracts the names from `ls -1` output: one entry per line, ANSI codes
/// removed, directory markers (trailing `/`) trimmed.
pub fn parse_file_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(strip_ansi_codes)
        .map(|line| line.trim().trim_end_matches('/').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Validates an on-device hash token: exactly 32 lowercase hex characters.
/// Devices without `md5sum` print errors or busybox usage text; anything
/// not matching the format is rejected instead of trusted.
pub fn is_valid_md5_token(token: &str) -> bool {
    token.len() == 32
        && token
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
}

/// Parses a `df <path>` report into byte counts. Picks the last line that
/// references the mount (or at least does not look like the header) and
/// requires fields 1..4 to parse as integer kilobyte counts.
pub fn parse_storage_report(
    output: &str,
    mount_hint: &str,
    trace_id: &str,
) -> Result<StorageInfo, AppError> {
    let candidate = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            line.contains(mount_hint) || !line.to_lowercase().contains("filesystem")
        })
        .last()
        .ok_or_else(|| AppError::parse("df report has no data line", trace_id))?;

    let fields: Vec<&str> = candidate.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(AppError::parse(
            format!("df line has {} fields, expected at least 4", fields.len()),
            trace_id,
        ));
    }
    let total_kb: i64 = parse_kb_field(fields[1], "total", trace_id)?;
    let used_kb: i64 = parse_kb_field(fields[2], "used", trace_id)?;
    let available_kb: i64 = parse_kb_field(fields[3], "available", trace_id)?;
    Ok(StorageInfo {
        total_bytes: total_kb.saturating_mul(1024),
        used_bytes: used_kb.saturating_mul(1024),
        available_bytes: available_kb.saturating_mul(1024),
    })
}

fn parse_kb_field(field: &str, name: &str, trace_id: &str) -> Result<i64, AppError> {
    field
        .parse::<i64>()
        .map_err(|_| AppError::parse(format!("df {name} field {field:?} is not a number"), trace_id))
}

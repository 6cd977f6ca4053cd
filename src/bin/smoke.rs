use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use handheld_bridge::app::audit::CommandAuditLog;
use handheld_bridge::app::bridge::locator::{resolve_bridge_program, validate_bridge_program};
use handheld_bridge::app::bridge::service::DeviceBridgeService;
use handheld_bridge::app::config::load_config;
use handheld_bridge::app::logging::init_logging;

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    program: String,
    devices: Vec<String>,
    storage: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
    history_entries: usize,
}

fn main() {
    init_logging();
    let trace_id = Uuid::new_v4().to_string();

    let config = load_config().unwrap_or_default();
    let program = resolve_bridge_program(&config.bridge.command_path);

    let mut checks = Vec::new();
    let mut devices = Vec::new();
    let mut storage = HashMap::new();

    let started = Instant::now();
    let locator_status = match validate_bridge_program(&program, &trace_id) {
        Ok(()) => "pass",
        Err(_) => "fail",
    };
    checks.push(SmokeCheck {
        name: "locator",
        status: locator_status,
        duration_ms: started.elapsed().as_millis(),
        detail: Some(program.clone()),
    });

    let log = Arc::new(CommandAuditLog::with_capacity(config.audit.max_history_size));
    let service = Arc::new(
        DeviceBridgeService::from_config(program.clone(), &config)
            .with_emitter(log.event_emitter()),
    );

    let started = Instant::now();
    let available = service.is_available();
    checks.push(SmokeCheck {
        name: "version",
        status: if available { "pass" } else { "fail" },
        duration_ms: started.elapsed().as_millis(),
        detail: None,
    });

    if available {
        let started = Instant::now();
        let listed = service.list_devices();
        checks.push(SmokeCheck {
            name: "devices",
            status: "pass",
            duration_ms: started.elapsed().as_millis(),
            detail: Some(format!("{} device(s)", listed.len())),
        });
        for device in &listed {
            devices.push(format!(
                "{} [{}] {}",
                device.id,
                device.status,
                device.display_name()
            ));
            if device.is_online {
                if let Some(info) = service.storage_info(Some(&device.id)) {
                    storage.insert(
                        device.id.clone(),
                        format!(
                            "{:.1} GB free of {:.1} GB ({:.0}% used)",
                            info.available_gb(),
                            info.total_gb(),
                            info.used_percent()
                        ),
                    );
                }
            }
        }
    } else {
        checks.push(SmokeCheck {
            name: "devices",
            status: "skip",
            duration_ms: 0,
            detail: Some("bridge unavailable".to_string()),
        });
    }

    let failed = checks.iter().any(|check| check.status == "fail");
    let summary = SmokeSummary {
        tool: "handheld-bridge-smoke",
        status: if failed { "fail" } else { "pass" },
        trace_id,
        program,
        devices,
        storage,
        checks,
        history_entries: log.count(),
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(payload) => println!("{payload}"),
        Err(err) => eprintln!("failed to serialize smoke summary: {err}"),
    }
    if failed {
        std::process::exit(1);
    }
}

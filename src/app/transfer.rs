use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::bridge::runner::ProgressFn;
use crate::app::bridge::service::DeviceBridgeService;
use crate::app::config::AppConfig;
use crate::app::models::{CommandResult, CopyKind, FileCopyTask};

/// File name of the synthesized arcade name index, pushed next to the
/// arcade ROM set so the device UI can show titles instead of zip names.
pub const ARCADE_NAME_INDEX_FILE: &str = "arcade_names.txt";
const ARCADE_BIOS_FILE: &str = "neogeo.zip";
const ARCADE_SYSTEM_CODE: &str = "ARCADE";

/// Fallback title table used when the index cannot be fetched. Each row is
/// `zip-name<TAB>display-name`, the format the device expects.
const BUILTIN_ARCADE_NAMES: [(&str, &str); 8] = [
    ("mslug.zip", "Metal Slug"),
    ("mslug2.zip", "Metal Slug 2"),
    ("mslugx.zip", "Metal Slug X"),
    ("kof98.zip", "The King of Fighters '98"),
    ("samsho2.zip", "Samurai Shodown II"),
    ("garou.zip", "Garou: Mark of the Wolves"),
    ("lastblad.zip", "The Last Blade"),
    ("pbobblen.zip", "Puzzle Bobble"),
];

/// Optional source of a richer arcade name index. Implementations may fail
/// freely; the orchestrator falls back to the built-in table.
pub trait NameIndexFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Option<String>;
}

/// HTTP fetcher; any transport or status failure degrades to None.
pub struct HttpNameIndexFetcher;

impl NameIndexFetcher for HttpNameIndexFetcher {
    fn fetch(&self, url: &str) -> Option<String> {
        if url.trim().is_empty() {
            return None;
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        let response = client.get(url).send().ok()?;
        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "name index fetch rejected");
            return None;
        }
        response.text().ok()
    }
}

/// Batch file-copy driver for BIOS and ROM sets. Items run in input order;
/// cancellation is checked between items, and the first hard failure stops
/// the batch with prior copies left in place.
pub struct FileTransferOrchestrator {
    service: Arc<DeviceBridgeService>,
    fetcher: Arc<dyn NameIndexFetcher>,
    name_index_url: String,
}

impl FileTransferOrchestrator {
    pub fn new(service: Arc<DeviceBridgeService>) -> Self {
        Self {
            service,
            fetcher: Arc::new(HttpNameIndexFetcher),
            name_index_url: String::new(),
        }
    }

    pub fn from_config(service: Arc<DeviceBridgeService>, config: &AppConfig) -> Self {
        let mut orchestrator = Self::new(service);
        orchestrator.name_index_url = config.transfer.name_index_url.clone();
        orchestrator
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn NameIndexFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_name_index_url(mut self, url: impl Into<String>) -> Self {
        self.name_index_url = url.into();
        self
    }

    /// On-device destination for one task. ROMs land under
    /// `Roms/<directory>`, BIOS files under `BIOS`; the directory name is
    /// the system code except for the documented overrides.
    pub fn destination_for(&self, task: &FileCopyTask) -> String {
        let base = self.service.base_path();
        match task.kind {
            CopyKind::Bios => format!("{base}/BIOS/{}", task.file_name),
            CopyKind::Rom => format!(
                "{base}/Roms/{}/{}",
                system_directory(&task.system_code),
                task.file_name
            ),
        }
    }

    pub fn copy_batch(
        &self,
        tasks: &[FileCopyTask],
        device: Option<&str>,
        progress: Option<Arc<ProgressFn>>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> CommandResult {
        let mut copied = 0usize;
        for task in tasks {
            let cancelled = cancel
                .as_ref()
                .map(|flag| flag.load(Ordering::Relaxed))
                .unwrap_or(false);
            if cancelled {
                report(&progress, &format!("Cancelled before {}", task.file_name));
                return CommandResult::failure(format!(
                    "Batch cancelled before {}",
                    task.file_name
                ));
            }

            let destination = self.destination_for(task);
            report(&progress, &format!("Copying {} -> {destination}", task.file_name));
            let result = self.service.push_file(
                &task.source_path,
                &destination,
                device,
                progress.clone(),
                cancel.clone(),
            );
            if !result.succeeded {
                let detail = result
                    .error
                    .clone()
                    .unwrap_or_else(|| result.stderr.clone());
                report(
                    &progress,
                    &format!("Failed to push {}: {detail}", task.file_name),
                );
                return result;
            }
            copied += 1;

            if task.kind == CopyKind::Bios
                && task.system_code == ARCADE_SYSTEM_CODE
                && task.file_name.eq_ignore_ascii_case(ARCADE_BIOS_FILE)
            {
                let index_result = self.push_arcade_name_index(device, &progress);
                if !index_result.succeeded {
                    return index_result;
                }
            }
        }
        CommandResult::from_exit(format!("Copied {copied} files"), String::new(), Some(0))
    }

    /// Synthesizes the arcade name index and pushes it into the arcade ROM
    /// directory. The fetch may fail silently; the built-in table is the
    /// floor, never less.
    fn push_arcade_name_index(
        &self,
        device: Option<&str>,
        progress: &Option<Arc<ProgressFn>>,
    ) -> CommandResult {
        let content = self.build_name_index();
        let temp_path = std::env::temp_dir().join(format!("arcade-names-{}.txt", Uuid::new_v4()));
        if let Err(err) = fs::write(&temp_path, &content) {
            return CommandResult::failure(format!("Failed to write name index: {err}"));
        }

        let destination = format!(
            "{}/Roms/{}/{ARCADE_NAME_INDEX_FILE}",
            self.service.base_path(),
            system_directory(ARCADE_SYSTEM_CODE)
        );
        report(progress, &format!("Writing {ARCADE_NAME_INDEX_FILE}"));
        let result = self
            .service
            .push_file(&temp_path, &destination, device, None, None);
        if let Err(err) = fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), error = %err, "failed to remove temporary file");
        }
        if !result.succeeded {
            report(
                progress,
                &format!(
                    "Failed to push {ARCADE_NAME_INDEX_FILE}: {}",
                    result.error.clone().unwrap_or_else(|| result.stderr.clone())
                ),
            );
        }
        result
    }

    fn build_name_index(&self) -> String {
        if let Some(fetched) = self.fetcher.fetch(&self.name_index_url) {
            let valid: Vec<&str> = fetched
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter(|line| line.split_once('\t').is_some())
                .collect();
            if !valid.is_empty() {
                info!(entries = valid.len(), "using fetched arcade name index");
                let mut content = valid.join("\n");
                content.push('\n');
                return content;
            }
            warn!("fetched arcade name index had no usable rows");
        }
        let mut content = String::new();
        for (file, display) in BUILTIN_ARCADE_NAMES {
            content.push_str(file);
            content.push('\t');
            content.push_str(display);
            content.push('\n');
        }
        content
    }
}

/// Maps a system code to its ROM directory name. Most systems use the code
/// verbatim; the exceptions are cards whose firmware expects a different
/// folder: PICO-8 carts live in `PICO8`, Famicom Disk System shares the
/// `FC` folder.
pub fn system_directory(code: &str) -> &str {
    match code {
        "PICO" => "PICO8",
        "FDS" => "FC",
        other => other,
    }
}

fn report(progress: &Option<Arc<ProgressFn>>, message: &str) {
    if let Some(progress) = progress {
        progress(message);
    }
}

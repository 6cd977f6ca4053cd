use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::warn;

use crate::app::audit::{AuditSink, EventEmitter, TracingAuditSink};
use crate::app::models::{CommandEvent, CommandResult, CommandStatus};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_GRACE: Duration = Duration::from_millis(1000);

pub type ProgressFn = dyn Fn(&str) + Send + Sync;

pub struct RunOptions {
    pub timeout: Duration,
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<Arc<ProgressFn>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
            progress: None,
        }
    }
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Spawns the device-bridge executable and supervises it to completion.
///
/// Failures never cross this boundary as errors: timeouts, cancellation,
/// and spawn failures are all folded into a synthetic `CommandResult`
/// while the lifecycle stream reports the distinct status.
pub struct CommandRunner {
    program: String,
    emitter: Option<EventEmitter>,
    audit: Arc<dyn AuditSink>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            emitter: None,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn run(&self, args: &[String], options: &RunOptions) -> CommandResult {
        let command_text = self.command_text(args);
        let start_time = Utc::now();
        let started = Instant::now();

        self.emit(CommandEvent {
            command: command_text.clone(),
            start_time,
            end_time: None,
            duration: None,
            status: CommandStatus::Starting,
            output: None,
            error: None,
            exit_code: None,
        });
        self.audit.log_immediate(&format!("Executing: {command_text}"));

        let mut child = match Command::new(&self.program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                let message = format!("Failed to spawn command: {err}");
                self.audit
                    .log_immediate(&format!("Command failed to start: {message}"));
                return self.finish(
                    &command_text,
                    start_time,
                    started,
                    CommandStatus::Exception,
                    CommandResult::failure(message),
                );
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_buffer = Arc::new(Mutex::new(String::new()));
        let stderr_buffer = Arc::new(Mutex::new(String::new()));

        // Drain both pipes on their own threads; a chatty child blocks once
        // the pipe buffer fills, which would turn a fast command into a
        // spurious timeout. The stdout drain also splits completed lines and
        // forwards them to the progress sink as they arrive.
        let stdout_handle = stdout.map(|reader| {
            let buffer = Arc::clone(&stdout_buffer);
            let progress = options.progress.clone();
            std::thread::spawn(move || drain_stdout(reader, buffer, progress))
        });
        let stderr_handle = stderr.map(|reader| {
            let buffer = Arc::clone(&stderr_buffer);
            std::thread::spawn(move || drain_stderr(reader, buffer))
        });

        let exit_code = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status.code(),
                Ok(None) => {
                    let cancelled = options
                        .cancel
                        .as_ref()
                        .map(|flag| flag.load(Ordering::Relaxed))
                        .unwrap_or(false);
                    if cancelled || started.elapsed() > options.timeout {
                        terminate(&mut child);
                        // Grandchildren inherit the pipe write ends and may
                        // outlive the kill, so the drains cannot be joined
                        // here without blocking until those exit. Detach
                        // them; they terminate on their own at pipe EOF.
                        drop(stdout_handle);
                        drop(stderr_handle);
                        self.audit.log_immediate(&format!(
                            "Command timed out after {}ms: {command_text}",
                            started.elapsed().as_millis()
                        ));
                        return self.finish(
                            &command_text,
                            start_time,
                            started,
                            CommandStatus::Timeout,
                            CommandResult::timed_out(),
                        );
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    terminate(&mut child);
                    drop(stdout_handle);
                    drop(stderr_handle);
                    let message = format!("Failed to poll command: {err}");
                    self.audit
                        .log_immediate(&format!("Command failed: {message}"));
                    return self.finish(
                        &command_text,
                        start_time,
                        started,
                        CommandStatus::Exception,
                        CommandResult::failure(message),
                    );
                }
            }
        };

        join_drains(stdout_handle, stderr_handle);
        let stdout_text = take_buffer(&stdout_buffer);
        let stderr_text = take_buffer(&stderr_buffer);
        let result = CommandResult::from_exit(stdout_text, stderr_text, exit_code);

        let status = if result.succeeded {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        };
        self.audit.log_immediate(&format!(
            "Command {} in {}ms (exit {:?}): {command_text}",
            if result.succeeded { "succeeded" } else { "failed" },
            started.elapsed().as_millis(),
            exit_code,
        ));
        self.finish(&command_text, start_time, started, status, result)
    }

    fn command_text(&self, args: &[String]) -> String {
        let mut text = self.program.clone();
        for arg in args {
            text.push(' ');
            text.push_str(arg);
        }
        text
    }

    fn finish(
        &self,
        command_text: &str,
        start_time: chrono::DateTime<Utc>,
        started: Instant,
        status: CommandStatus,
        result: CommandResult,
    ) -> CommandResult {
        let error = result.error.clone().or_else(|| {
            if status == CommandStatus::Failed && !result.stderr.is_empty() {
                Some(result.stderr.clone())
            } else {
                None
            }
        });
        self.emit(CommandEvent {
            command: command_text.to_string(),
            start_time,
            end_time: Some(Utc::now()),
            duration: Some(started.elapsed()),
            status,
            output: Some(result.stdout.clone()).filter(|text| !text.is_empty()),
            error,
            exit_code: result.exit_code,
        });
        result
    }

    fn emit(&self, event: CommandEvent) {
        if let Some(emitter) = &self.emitter {
            emitter(event);
        }
    }
}

fn drain_stdout(
    mut reader: impl Read,
    buffer: Arc<Mutex<String>>,
    progress: Option<Arc<ProgressFn>>,
) {
    let mut temp = [0u8; 4096];
    let mut pending = String::new();
    loop {
        let read_count = match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => count,
            Err(_) => break,
        };
        let chunk = String::from_utf8_lossy(&temp[..read_count]).to_string();
        if let Ok(mut guard) = buffer.lock() {
            guard.push_str(&chunk);
        }

        if let Some(progress) = &progress {
            pending.push_str(&chunk);
            let mut start = 0usize;
            for (index, ch) in pending.char_indices() {
                if ch == '\n' || ch == '\r' {
                    let line = pending[start..index].trim();
                    if !line.is_empty() {
                        progress(line);
                    }
                    start = index + ch.len_utf8();
                }
            }
            if start > 0 {
                pending = pending[start..].to_string();
            }
        }
    }
    if let Some(progress) = &progress {
        let line = pending.trim();
        if !line.is_empty() {
            progress(line);
        }
    }
}

fn drain_stderr(mut reader: impl Read, buffer: Arc<Mutex<String>>) {
    let mut temp = [0u8; 4096];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => {
                let chunk = String::from_utf8_lossy(&temp[..count]).to_string();
                if let Ok(mut guard) = buffer.lock() {
                    guard.push_str(&chunk);
                }
            }
            Err(_) => break,
        }
    }
}

/// Kills the child and reaps it within the grace window so no zombie
/// handle outlives the call.
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let deadline = Instant::now() + KILL_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.wait();
                    return;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "failed to reap terminated child");
                return;
            }
        }
    }
}

fn join_drains(
    stdout: Option<std::thread::JoinHandle<()>>,
    stderr: Option<std::thread::JoinHandle<()>>,
) {
    if let Some(handle) = stdout {
        let _ = handle.join();
    }
    if let Some(handle) = stderr {
        let _ = handle.join();
    }
}

fn take_buffer(buffer: &Arc<Mutex<String>>) -> String {
    buffer
        .lock()
        .map(|mut guard| std::mem::take(&mut *guard))
        .unwrap_or_default()
}

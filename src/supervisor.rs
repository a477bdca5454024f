use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend_paths::{prepend_search_path, SEARCH_PATH_VAR};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(120);
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_millis(1500);
const FORCED_STOP_TIMEOUT: Duration = Duration::from_millis(1500);
const DIALOG_TITLE: &str = "Analysis Server Error";

/// Fully resolved launch plan for the analysis server process.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub library_search_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendState {
    NotStarted,
    Running { pid: u32 },
    Exited { code: Option<i32> },
    FailedToStart { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    AlreadyStopped,
    Stopped { code: Option<i32> },
}

/// User-visible failure surface. Dialogs in the app, a counter in tests.
pub trait BackendNotifier: Send + Sync {
    fn notify_error(&self, title: &str, message: &str);
}

pub struct DialogNotifier;

impl BackendNotifier for DialogNotifier {
    fn notify_error(&self, title: &str, message: &str) {
        let title = title.to_string();
        let message = message.to_string();
        thread::spawn(move || {
            let _ = rfd::MessageDialog::new()
                .set_level(rfd::MessageLevel::Error)
                .set_title(title.as_str())
                .set_description(message.as_str())
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
        });
    }
}

struct SupervisorInner {
    state: BackendState,
    child: Option<Child>,
}

/// Owns the single analysis-server child process. At most one handle is alive
/// at any time; every spawn bumps `generation` so a watcher for a superseded
/// process can never touch state owned by a newer one.
pub struct BackendSupervisor {
    notifier: Box<dyn BackendNotifier>,
    inner: Mutex<SupervisorInner>,
    generation: AtomicU64,
    restart_in_progress: AtomicBool,
    weak_self: Weak<BackendSupervisor>,
}

impl BackendSupervisor {
    pub fn new(notifier: Box<dyn BackendNotifier>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            notifier,
            inner: Mutex::new(SupervisorInner {
                state: BackendState::NotStarted,
                child: None,
            }),
            generation: AtomicU64::new(0),
            restart_in_progress: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    pub fn state(&self) -> Result<BackendState, String> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| "Supervisor state lock is poisoned.".to_string())?;
        Ok(inner.state.clone())
    }

    /// Spawns the analysis server and attaches its three observers: stdout
    /// line logger, stderr line logger, exit watcher.
    pub fn start(&self, descriptor: &BackendDescriptor) -> Result<u32, String> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| "Supervisor state lock is poisoned.".to_string())?;
        if let BackendState::Running { pid } = &inner.state {
            return Err(format!("Analysis server is already running (pid {pid})."));
        }

        let mut command = Command::new(&descriptor.program);
        command
            .args(&descriptor.args)
            .current_dir(&descriptor.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &descriptor.library_search_dir {
            command.env(
                SEARCH_PATH_VAR,
                prepend_search_path(std::env::var_os(SEARCH_PATH_VAR), dir),
            );
        }

        println!(
            "[backend] Starting analysis server: {} {:?}",
            descriptor.program.display(),
            descriptor.args
        );

        match command.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(stdout) = child.stdout.take() {
                    spawn_stream_logger(stdout, "[analysis-server]");
                }
                if let Some(stderr) = child.stderr.take() {
                    spawn_stream_logger(stderr, "[analysis-server err]");
                }
                inner.child = Some(child);
                inner.state = BackendState::Running { pid };
                drop(inner);
                self.spawn_exit_watcher(generation);
                println!("[backend] Analysis server started (pid {pid}).");
                Ok(pid)
            }
            Err(error) => {
                let reason = format!("Failed to start analysis server: {error}");
                inner.state = BackendState::FailedToStart {
                    reason: reason.clone(),
                };
                drop(inner);
                self.notifier.notify_error(DIALOG_TITLE, &reason);
                Err(reason)
            }
        }
    }

    /// Two-phase stop: request graceful termination, wait bounded, escalate
    /// to a forced kill, wait bounded again. A process that survives both is
    /// reported as an error naming the pid rather than abandoned.
    pub fn stop(&self) -> Result<StopOutcome, String> {
        let taken = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| "Supervisor state lock is poisoned.".to_string())?;
            self.generation.fetch_add(1, Ordering::SeqCst);
            inner.child.take()
        };
        let Some(mut child) = taken else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        let pid = child.id();
        println!("[backend] Stopping analysis server (pid {pid})...");
        request_graceful_termination(pid);
        if let Some(code) = wait_for_child_exit(&mut child, GRACEFUL_STOP_TIMEOUT)? {
            self.record_exit(code)?;
            return Ok(StopOutcome::Stopped { code });
        }

        child
            .kill()
            .map_err(|error| format!("Failed to force-stop analysis server pid {pid}: {error}"))?;
        if let Some(code) = wait_for_child_exit(&mut child, FORCED_STOP_TIMEOUT)? {
            self.record_exit(code)?;
            return Ok(StopOutcome::Stopped { code });
        }

        Err(format!(
            "Analysis server pid {pid} is still running after graceful and forced termination."
        ))
    }

    /// Stop-to-completion, then a fresh spawn. Serialized so two concurrent
    /// restart requests can never produce two live handles.
    pub fn restart(&self, descriptor: &BackendDescriptor) -> Result<u32, String> {
        if self
            .restart_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err("A restart is already in progress.".to_string());
        }

        let result = self.stop().and_then(|_| self.start(descriptor));
        self.restart_in_progress.store(false, Ordering::SeqCst);
        result
    }

    /// Records a failure that happened before any spawn (resolution) and
    /// raises the same user-visible dialog a spawn failure would.
    pub fn mark_failed(&self, reason: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = BackendState::FailedToStart {
                reason: reason.to_string(),
            };
        }
        self.notifier.notify_error(DIALOG_TITLE, reason);
    }

    fn spawn_exit_watcher(&self, generation: u64) {
        let Some(supervisor) = self.weak_self.upgrade() else {
            return;
        };
        thread::spawn(move || loop {
            let exited = {
                let Ok(mut inner) = supervisor.inner.lock() else {
                    return;
                };
                if supervisor.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let Some(child) = inner.child.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        inner.child = None;
                        Some(status.code())
                    }
                    Ok(None) => None,
                    Err(error) => {
                        eprintln!("[backend] Failed to poll analysis server: {error}");
                        inner.child = None;
                        Some(None)
                    }
                }
            };

            if let Some(code) = exited {
                supervisor.apply_exit(generation, code);
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        });
    }

    /// Exit transition. Clean exits are logged; anything else raises exactly
    /// one user-visible notification. Stale generations are ignored.
    fn apply_exit(&self, generation: u64, code: Option<i32>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if !matches!(inner.state, BackendState::Running { .. }) {
            return;
        }
        inner.state = BackendState::Exited { code };
        drop(inner);

        if code == Some(0) {
            println!("[backend] Analysis server exited cleanly.");
        } else {
            eprintln!("[backend] Analysis server exited unexpectedly (code {code:?}).");
            self.notifier.notify_error(
                DIALOG_TITLE,
                "The analysis server has stopped unexpectedly. Please restart the server or the application.",
            );
        }
    }

    fn record_exit(&self, code: Option<i32>) -> Result<(), String> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| "Supervisor state lock is poisoned.".to_string())?;
        inner.state = BackendState::Exited { code };
        Ok(())
    }

    #[cfg(test)]
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

fn spawn_stream_logger<R: Read + Send + 'static>(stream: R, prefix: &'static str) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            println!("{prefix} {line}");
        }
    });
}

fn wait_for_child_exit(child: &mut Child, timeout: Duration) -> Result<Option<Option<i32>>, String> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status.code())),
            Ok(None) => {
                if started.elapsed() >= timeout {
                    return Ok(None);
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(error) => {
                return Err(format!(
                    "Failed while waiting for analysis server exit: {error}"
                ))
            }
        }
    }
}

#[cfg(not(windows))]
fn request_graceful_termination(pid: u32) {
    let _ = Command::new("kill")
        .args(["-TERM", "--", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(windows)]
fn request_graceful_termination(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

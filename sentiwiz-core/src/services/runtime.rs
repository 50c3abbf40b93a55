//! Inference runtime manager
//!
//! Owns the install/readiness state machine for the local Ollama
//! runtime: binary detection, installation (Homebrew with user consent,
//! or direct installer download), server startup, and model management.
//! This manager is the single owner of "is the runtime ready" truth; the
//! rest of the system only ever sees phase transitions, never raw
//! process handles.
//!
//! All filesystem/process/network faults during detection and
//! installation are converted into phase transitions with a descriptive
//! status message; none propagate as errors to the caller.

use crate::models::installation::{InstallationState, ModelDownload};
use crate::services::ollama::{OllamaClient, OllamaError};
use chrono::Utc;
use sentiwiz_common::events::{DownloadState, EventBus, InstallPhase, WizardEvent};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Known install locations for the runtime binary, probed in order.
/// A bare `ollama` is probed last to cover anything else on PATH.
const BINARY_CANDIDATES: &[&str] = &[
    "/usr/local/bin/ollama",
    "/opt/homebrew/bin/ollama",
    "/Applications/Ollama.app/Contents/Resources/ollama",
    "ollama",
];

/// Well-known Homebrew locations, checked before falling back to PATH
const BREW_CANDIDATES: &[&str] = &["/opt/homebrew/bin/brew", "/usr/local/bin/brew"];

/// Fixed installer asset for the direct-download path
const INSTALLER_URL: &str = "https://ollama.com/download/Ollama.dmg";

/// Downloads smaller than this are rejected as truncated
const MIN_INSTALLER_BYTES: u64 = 1024 * 1024;

const RUNTIME_PORT: u16 = 11434;
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MANUAL_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);
const MANUAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Local inference runtime manager
///
/// Published state lives behind short-lived sync locks that are never
/// held across an await; the manager is the only writer.
pub struct RuntimeManager {
    state: Arc<RwLock<InstallationState>>,
    events: EventBus,
    client: OllamaClient,
    http: reqwest::Client,
    binary_path: RwLock<Option<PathBuf>>,
    brew_path: RwLock<Option<PathBuf>>,
    /// Remembered for the session after the user declines Homebrew
    brew_declined: AtomicBool,
    server_child: tokio::sync::Mutex<Option<tokio::process::Child>>,
    current_download: Arc<RwLock<Option<ModelDownload>>>,
    download_token: Mutex<Option<CancellationToken>>,
    download_generation: Arc<AtomicU64>,
}

impl RuntimeManager {
    pub fn new(events: EventBus) -> Self {
        Self::with_client(OllamaClient::new(), events)
    }

    pub fn with_client(client: OllamaClient, events: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(InstallationState::new())),
            events,
            client,
            http: reqwest::Client::new(),
            binary_path: RwLock::new(None),
            brew_path: RwLock::new(None),
            brew_declined: AtomicBool::new(false),
            server_child: tokio::sync::Mutex::new(None),
            current_download: Arc::new(RwLock::new(None)),
            download_token: Mutex::new(None),
            download_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the published installation state
    pub fn snapshot(&self) -> InstallationState {
        self.state.read().expect("state lock poisoned").clone()
    }

    /// Snapshot of the active (or last) model download, if any
    pub fn current_download(&self) -> Option<ModelDownload> {
        self.current_download
            .read()
            .expect("download lock poisoned")
            .clone()
    }

    // ------------------------------------------------------------------
    // Readiness state machine
    // ------------------------------------------------------------------

    /// Drive the runtime towards readiness
    ///
    /// Returns the phase reached: `Ready`, `Failed`, or
    /// `AwaitingUserDecision` when Homebrew is available and the caller
    /// must consent via [`resolve_install_decision`] before installation
    /// proceeds. Calling this while already `Ready` performs no
    /// detection or install work. Retry after `Failed` is a fresh
    /// invocation, never a resume.
    ///
    /// [`resolve_install_decision`]: RuntimeManager::resolve_install_decision
    pub async fn ensure_ready(&self) -> InstallPhase {
        if self.snapshot().phase == InstallPhase::Ready {
            return InstallPhase::Ready;
        }

        self.set_phase(InstallPhase::Detecting, "Looking for the Ollama runtime...");

        if let Some(binary) = self.detect_binary().await {
            tracing::info!(binary = %binary.display(), "Runtime binary found");
            self.set_binary_path(binary);
            return self.finish_setup().await;
        }

        if !self.brew_declined.load(Ordering::Relaxed) {
            if let Some(brew) = self.find_brew().await {
                tracing::info!(brew = %brew.display(), "Homebrew available, asking for consent");
                *self.brew_path.write().expect("brew lock poisoned") = Some(brew);
                self.set_phase(
                    InstallPhase::AwaitingUserDecision,
                    "Ollama was not found. Install it with Homebrew?",
                );
                return InstallPhase::AwaitingUserDecision;
            }
        }

        self.install_direct().await
    }

    /// Resume after the Homebrew consent gate
    ///
    /// Declining is remembered for the session and falls back to the
    /// direct-download path without re-prompting. A call outside the
    /// `AwaitingUserDecision` phase is a no-op.
    pub async fn resolve_install_decision(&self, use_package_manager: bool) -> InstallPhase {
        let phase = self.snapshot().phase;
        if phase != InstallPhase::AwaitingUserDecision {
            return phase;
        }

        if use_package_manager {
            self.install_with_brew().await
        } else {
            self.brew_declined.store(true, Ordering::Relaxed);
            self.install_direct().await
        }
    }

    async fn install_with_brew(&self) -> InstallPhase {
        self.set_phase(InstallPhase::Installing, "Installing Ollama with Homebrew...");

        let brew = self
            .brew_path
            .read()
            .expect("brew lock poisoned")
            .clone()
            .unwrap_or_else(|| PathBuf::from("brew"));

        let output = Command::new(&brew)
            .args(["install", "ollama"])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => match self.detect_binary().await {
                Some(binary) => {
                    self.set_binary_path(binary);
                    self.finish_setup().await
                }
                None => self.fail("Homebrew finished but the Ollama binary was not found"),
            },
            Ok(out) => self.fail(format!(
                "Homebrew install failed with exit code {}",
                out.status.code().unwrap_or(-1)
            )),
            Err(e) => self.fail(format!("Could not run Homebrew: {}", e)),
        }
    }

    async fn install_direct(&self) -> InstallPhase {
        self.set_phase(InstallPhase::Installing, "Downloading the Ollama installer...");

        let installer = match self.download_installer().await {
            Ok(path) => path,
            Err(message) => return self.fail(message),
        };

        // Hand off to the OS opener; the user completes the install
        if let Err(e) = Command::new("open").arg(&installer).spawn() {
            return self.fail(format!("Could not open the installer: {}", e));
        }

        self.set_phase(
            InstallPhase::WaitingForManualInstall,
            "Finish the Ollama install, then return here",
        );
        self.wait_for_manual_install().await
    }

    /// Download the installer asset to a temp path, rejecting truncated
    /// downloads below the minimum size threshold
    async fn download_installer(&self) -> Result<PathBuf, String> {
        use futures::StreamExt;

        let resp = self
            .http
            .get(INSTALLER_URL)
            .send()
            .await
            .map_err(|e| format!("Installer download failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Installer download failed: HTTP {}", resp.status().as_u16()));
        }

        let total = resp.content_length();
        let target = std::env::temp_dir().join("Ollama.dmg");
        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| format!("Could not create {}: {}", target.display(), e))?;

        let mut stream = resp.bytes_stream();
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Installer download interrupted: {}", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("Could not write installer: {}", e))?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                self.set_progress(
                    received as f64 / total as f64,
                    format!("Downloading installer ({} / {} MB)", received >> 20, total >> 20),
                );
            }
        }
        file.flush()
            .await
            .map_err(|e| format!("Could not write installer: {}", e))?;

        if received < MIN_INSTALLER_BYTES {
            return Err(format!(
                "Installer download looks truncated ({} bytes)",
                received
            ));
        }
        Ok(target)
    }

    /// Poll for the binary to appear after a manual install hand-off
    async fn wait_for_manual_install(&self) -> InstallPhase {
        let deadline = tokio::time::Instant::now() + MANUAL_INSTALL_TIMEOUT;

        loop {
            if let Some(binary) = self.detect_binary().await {
                tracing::info!(binary = %binary.display(), "Runtime binary appeared after manual install");
                self.set_binary_path(binary);
                return self.finish_setup().await;
            }
            if tokio::time::Instant::now() >= deadline {
                return self.fail("Manual install required: Ollama did not appear in time");
            }
            tokio::time::sleep(MANUAL_POLL_INTERVAL).await;
        }
    }

    /// Shared tail of every successful install path: start the server,
    /// query models, declare readiness
    async fn finish_setup(&self) -> InstallPhase {
        self.set_phase(InstallPhase::StartingServer, "Starting the inference server...");

        if !Self::port_open().await {
            self.spawn_server().await;

            let deadline = tokio::time::Instant::now() + SERVER_READY_TIMEOUT;
            let mut ready = false;
            while tokio::time::Instant::now() < deadline {
                if Self::port_open().await {
                    ready = true;
                    break;
                }
                tokio::time::sleep(SERVER_POLL_INTERVAL).await;
            }

            if !ready {
                // Deliberate degraded continuation: a server that never
                // answers leaves the model list empty, which the caller
                // surfaces; see DESIGN.md open question 1.
                tracing::warn!(
                    timeout_s = SERVER_READY_TIMEOUT.as_secs(),
                    "Inference server did not become ready; continuing anyway"
                );
            }
        }

        self.set_phase(InstallPhase::CheckingModels, "Checking installed models...");
        self.refresh_models().await;

        self.set_phase(InstallPhase::Ready, "Ollama is ready");
        InstallPhase::Ready
    }

    async fn spawn_server(&self) {
        let binary = self
            .binary_path
            .read()
            .expect("binary lock poisoned")
            .clone()
            .unwrap_or_else(|| PathBuf::from("ollama"));

        let spawned = Command::new(&binary)
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                tracing::info!(binary = %binary.display(), "Spawned inference server");
                *self.server_child.lock().await = Some(child);
            }
            Err(e) => {
                tracing::warn!(binary = %binary.display(), error = %e, "Could not spawn inference server");
            }
        }
    }

    /// Terminate the server if this manager started it; otherwise
    /// best-effort signal an externally running instance by name.
    /// Safe to call when no server was ever started.
    pub async fn stop_server(&self) {
        let child = self.server_child.lock().await.take();
        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Could not kill inference server");
                }
            }
            None => {
                let _ = Command::new("pkill")
                    .args(["-x", "ollama"])
                    .stdin(Stdio::null())
                    .output()
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Detection helpers
    // ------------------------------------------------------------------

    /// Probe the fixed candidate list with a version check; first
    /// candidate that executes successfully wins
    async fn detect_binary(&self) -> Option<PathBuf> {
        for candidate in BINARY_CANDIDATES {
            if Self::probe_version(Path::new(candidate)).await {
                return Some(PathBuf::from(candidate));
            }
        }
        None
    }

    async fn probe_version(binary: &Path) -> bool {
        let probe = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        matches!(
            tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe).await,
            Ok(Ok(out)) if out.status.success()
        )
    }

    async fn find_brew(&self) -> Option<PathBuf> {
        for candidate in BREW_CANDIDATES {
            if Path::new(candidate).is_file() {
                return Some(PathBuf::from(candidate));
            }
        }
        if Self::probe_version(Path::new("brew")).await {
            return Some(PathBuf::from("brew"));
        }
        None
    }

    async fn port_open() -> bool {
        matches!(
            tokio::time::timeout(
                PORT_PROBE_TIMEOUT,
                TcpStream::connect(("127.0.0.1", RUNTIME_PORT)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Model identifiers known to the runtime; empty on any failure,
    /// never an error
    pub async fn list_models(&self) -> Vec<String> {
        match self.client.list_tags().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "Model listing failed");
                Vec::new()
            }
        }
    }

    /// Re-query the model list and publish it
    ///
    /// Downloads never update `available_models` implicitly; callers
    /// refresh after a successful pull.
    pub async fn refresh_models(&self) -> Vec<String> {
        let models = self.list_models().await;
        {
            let mut state = self.state.write().expect("state lock poisoned");
            state.available_models = models.clone();
        }
        let _ = self.events.emit(WizardEvent::ModelsRefreshed {
            models: models.clone(),
            timestamp: Utc::now(),
        });
        models
    }

    /// Pull a model, streaming progress until a terminal state
    ///
    /// At most one download is active; starting a new one supersedes
    /// (cancels) the prior. Returns the download's terminal state.
    pub async fn download_model(&self, name: &str) -> DownloadState {
        let token = CancellationToken::new();
        {
            let mut guard = self.download_token.lock().expect("token lock poisoned");
            if let Some(prev) = guard.take() {
                prev.cancel();
            }
            *guard = Some(token.clone());
        }
        let generation = self.download_generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.current_download.write().expect("download lock poisoned") =
            Some(ModelDownload::new(name));
        self.set_status_message(format!("Downloading model {}...", name));

        let record = Arc::clone(&self.current_download);
        let state = Arc::clone(&self.state);
        let generation_counter = Arc::clone(&self.download_generation);
        let events = self.events.clone();
        let model = name.to_string();

        let result = self
            .client
            .pull(name, &token, |event| {
                // A superseded download stops touching the shared record
                if generation_counter.load(Ordering::SeqCst) != generation {
                    return;
                }

                let message = event
                    .status
                    .clone()
                    .unwrap_or_else(|| format!("Downloading {}", model));

                let mut guard = record.write().expect("download lock poisoned");
                if let Some(download) = guard.as_mut() {
                    if event.completed.is_some() {
                        download.bytes_completed = event.completed;
                    }
                    if event.total.is_some() {
                        download.bytes_total = event.total;
                    }
                }
                drop(guard);

                // Keep the published status following the stream so
                // snapshot pollers see the same progress as subscribers
                {
                    let mut state = state.write().expect("state lock poisoned");
                    state.status_message = message.clone();
                }

                let _ = events.emit(WizardEvent::ModelDownloadProgress {
                    model: model.clone(),
                    completed: event.completed,
                    total: event.total,
                    message,
                    timestamp: Utc::now(),
                });
            })
            .await;

        let terminal = match &result {
            Ok(()) => DownloadState::Succeeded,
            Err(OllamaError::Cancelled) => DownloadState::Cancelled,
            Err(e) => {
                tracing::warn!(model = %name, error = %e, "Model download failed");
                DownloadState::Failed
            }
        };

        // Superseded downloads finish silently; the new download owns
        // the record now
        if self.download_generation.load(Ordering::SeqCst) == generation {
            {
                let mut guard = self.current_download.write().expect("download lock poisoned");
                if let Some(download) = guard.as_mut() {
                    download.state = terminal;
                }
            }
            let message = match terminal {
                DownloadState::Succeeded => format!("Model {} downloaded", name),
                DownloadState::Cancelled => format!("Download of {} cancelled", name),
                _ => format!("Download of {} failed", name),
            };
            self.set_status_message(message);
            let _ = self.events.emit(WizardEvent::ModelDownloadFinished {
                model: name.to_string(),
                state: terminal,
                timestamp: Utc::now(),
            });
        }

        terminal
    }

    /// Cancel the active model download, if any; the underlying
    /// connection is torn down immediately
    pub fn cancel_download(&self) {
        if let Some(token) = self
            .download_token
            .lock()
            .expect("token lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    // ------------------------------------------------------------------
    // State publishing
    // ------------------------------------------------------------------

    fn set_binary_path(&self, binary: PathBuf) {
        *self.binary_path.write().expect("binary lock poisoned") = Some(binary);
    }

    fn set_phase(&self, phase: InstallPhase, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.state.write().expect("state lock poisoned");
            state.transition(phase, message.clone());
        }
        let _ = self.events.emit(WizardEvent::InstallPhaseChanged {
            phase,
            progress: 0.0,
            message,
            timestamp: Utc::now(),
        });
    }

    fn set_progress(&self, progress: f64, message: impl Into<String>) {
        let message = message.into();
        let phase = {
            let mut state = self.state.write().expect("state lock poisoned");
            state.set_progress(progress, message.clone());
            state.phase
        };
        let _ = self.events.emit(WizardEvent::InstallProgress {
            phase,
            progress,
            message,
            timestamp: Utc::now(),
        });
    }

    fn set_status_message(&self, message: impl Into<String>) {
        let message = message.into();
        let (phase, progress) = {
            let mut state = self.state.write().expect("state lock poisoned");
            state.status_message = message.clone();
            (state.phase, state.progress)
        };
        let _ = self.events.emit(WizardEvent::InstallProgress {
            phase,
            progress,
            message,
            timestamp: Utc::now(),
        });
    }

    fn fail(&self, message: impl Into<String>) -> InstallPhase {
        let message = message.into();
        tracing::error!(error = %message, "Runtime setup failed");
        {
            let mut state = self.state.write().expect("state lock poisoned");
            state.fail(message.clone());
        }
        let _ = self.events.emit(WizardEvent::InstallPhaseChanged {
            phase: InstallPhase::Failed,
            progress: 0.0,
            message,
            timestamp: Utc::now(),
        });
        InstallPhase::Failed
    }
}

//! Chromium session management for pagecarbon.
//!
//! One analysis run owns one browser process and one page. This crate
//! launches and configures that process over the DevTools protocol, applies
//! a device profile, exposes the narrow page surface ([`PageOps`]) the rest
//! of the system drives, and guarantees teardown: `close` is idempotent and
//! the transport kills the child process on drop as a backstop.

pub mod profile;
pub mod session;
pub mod transport;

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt};

use thiserror::Error;
use which::which;

pub use crate::profile::{DeviceProfile, Viewport};
pub use crate::session::{PageOps, Session, SessionManager, TransportFactory};
pub use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// High-level failure categories surfaced by a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum SessionErrorKind {
    #[error("browser launch failed")]
    Launch,
    #[error("page creation failed")]
    PageCreation,
    #[error("navigation timed out")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("internal error")]
    Internal,
}

/// Error with optional context, mirroring what the instrumentation channel
/// reported.
#[derive(Clone, Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    pub fn new(kind: SessionErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }
}

/// Configuration for launching and tuning a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub command_deadline: Duration,
    pub launch_attempts: u32,
    pub launch_backoff_step: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            command_deadline: Duration::from_secs(30),
            launch_attempts: 3,
            launch_backoff_step: Duration::from_millis(500),
        }
    }
}

fn resolve_headless_default() -> bool {
    match env::var("PAGECARBON_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("PAGECARBON_CHROME_PROFILE") {
        return PathBuf::from(path);
    }
    Path::new("./.pagecarbon-profile").into()
}

/// Locate a Chromium binary: explicit env override, then `$PATH`, then the
/// usual OS install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PAGECARBON_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_chrome_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                }
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

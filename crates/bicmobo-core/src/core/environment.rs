//! Environment of the detector toolchain, scoped to child processes.
//!
//! The shell setup scripts of the toolchain export the detector identity and extend the
//! search paths of the whole shell. Here the same variables are collected into an
//! [`EnvOverlay`] that is applied to each child [`Command`](tokio::process::Command)
//! individually, so concurrent trials never see each other's settings and the parent
//! process environment is never touched.

use super::config::models::{DetectorConfig, RunConfig};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Marker variable pointing at the installation root of this tool.
pub const INSTALL_ROOT_VAR: &str = "BIC_MOBO";

const PATH_VAR: &str = "PATH";
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Read-only snapshot of the parent variables the overlay extends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseEnvironment {
    vars: BTreeMap<String, String>,
}

impl BaseEnvironment {
    pub fn capture() -> Self {
        let vars = [PATH_VAR, LIBRARY_PATH_VAR, INSTALL_ROOT_VAR]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The base as it would look to a child after `overlay` was applied.
    pub fn merged(&self, overlay: &EnvOverlay) -> Self {
        let mut vars = self.vars.clone();
        vars.extend(overlay.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Self { vars }
    }
}

/// Variables set on a single child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn apply(&self, command: &mut tokio::process::Command) {
        command.envs(self.iter());
    }
}

/// Resolves the toolchain environment for a detector installation.
#[derive(Debug, Clone)]
pub struct EnvironmentAdapter {
    detector: DetectorConfig,
    tool_root: Option<PathBuf>,
    extra: BTreeMap<String, String>,
}

impl EnvironmentAdapter {
    pub fn new(detector: &DetectorConfig) -> Self {
        Self {
            detector: detector.clone(),
            tool_root: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn for_run(run: &RunConfig) -> Self {
        Self::new(&run.detector).with_extra(run.extra_env.clone())
    }

    pub fn with_tool_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tool_root = Some(root.into());
        self
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    /// Builds the overlay on top of `base`. Resolving again against a base that already
    /// carries the overlay yields the same overlay.
    pub fn resolve(&self, base: &BaseEnvironment) -> EnvOverlay {
        let mut overlay = EnvOverlay::new();
        overlay.set("DETECTOR", &self.detector.name);
        if let Some(version) = &self.detector.version {
            overlay.set("DETECTOR_VERSION", version);
        }
        overlay.set("DETECTOR_PATH", self.detector.path.display().to_string());
        overlay.set("DETECTOR_CONFIG", &self.detector.config);

        if let Some(root) = self.tool_root.clone().or_else(|| default_tool_root(base)) {
            overlay.set(INSTALL_ROOT_VAR, root.display().to_string());
        }

        let mut bin_dirs = Vec::new();
        let mut lib_dirs = Vec::new();
        if let Some(install) = &self.detector.install {
            bin_dirs.push(install.join("bin"));
            lib_dirs.push(install.join("lib"));
        }
        lib_dirs.extend(self.detector.library_paths.iter().cloned());

        if !bin_dirs.is_empty() {
            overlay.set(PATH_VAR, prepend_paths(&bin_dirs, base.get(PATH_VAR)));
        }
        if !lib_dirs.is_empty() {
            overlay.set(
                LIBRARY_PATH_VAR,
                prepend_paths(&lib_dirs, base.get(LIBRARY_PATH_VAR)),
            );
        }

        for (key, value) in &self.extra {
            overlay.set(key, value);
        }

        debug!("Resolved child environment overlay: {:?}", overlay);
        overlay
    }
}

fn default_tool_root(base: &BaseEnvironment) -> Option<PathBuf> {
    if let Some(root) = base.get(INSTALL_ROOT_VAR) {
        return Some(PathBuf::from(root));
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Puts `entries` in front of `existing`, dropping empty and repeated entries.
fn prepend_paths(entries: &[PathBuf], existing: Option<&str>) -> String {
    let mut seen: Vec<OsString> = Vec::new();
    let existing = existing
        .map(|value| std::env::split_paths(value).collect::<Vec<_>>())
        .unwrap_or_default();
    for path in entries.iter().chain(existing.iter()) {
        let entry = path.as_os_str().to_os_string();
        if entry.is_empty() || seen.contains(&entry) {
            continue;
        }
        seen.push(entry);
    }
    seen.iter()
        .map(|entry| entry.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

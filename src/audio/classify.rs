//! Mapping live audio sessions to policy buckets.

use super::policy::PolicyKind;
use super::session::AudioSession;
use crate::process::{ProcessCommandLineReader, ProcessError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Markers the classifier matches on. All comparisons are case-insensitive
/// except `teams_work_display_name`, which must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// Display name of the Teams session whose role depends on the process
    pub teams_display_name: String,

    /// Command-line marker of the Teams audio service process
    pub audio_service_marker: String,

    /// Display name Teams (work or school) gives its call session
    pub teams_work_display_name: String,

    /// Marker of a WebView2 host in the display name or executable name
    pub webview_marker: String,

    /// Marker in the WebView2 parent's command line identifying Teams
    pub teams_parent_marker: String,

    /// Path marker of the secondary browser channel
    pub secondary_browser_marker: String,

    /// Executable file name of the primary browser
    pub browser_executable: String,

    /// Capture sessions whose display name contains this become mic candidates
    pub mic_session_marker: String,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            teams_display_name: "microsoft teams".to_string(),
            audio_service_marker: "AudioService".to_string(),
            teams_work_display_name: "Microsoft Teams (work or school)".to_string(),
            webview_marker: "webview2".to_string(),
            teams_parent_marker: "ms-teams".to_string(),
            secondary_browser_marker: "beta".to_string(),
            browser_executable: "chrome.exe".to_string(),
            mic_session_marker: "teams".to_string(),
        }
    }
}

impl ClassifierRules {
    /// Names of empty markers; an empty marker would match every session.
    pub fn empty_markers(&self) -> Vec<&'static str> {
        [
            ("teams_display_name", &self.teams_display_name),
            ("audio_service_marker", &self.audio_service_marker),
            ("teams_work_display_name", &self.teams_work_display_name),
            ("webview_marker", &self.webview_marker),
            ("teams_parent_marker", &self.teams_parent_marker),
            ("secondary_browser_marker", &self.secondary_browser_marker),
            ("browser_executable", &self.browser_executable),
            ("mic_session_marker", &self.mic_session_marker),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_mic_candidate(&self, session: &AudioSession) -> bool {
        contains_ignore_case(&session.display_name, &self.mic_session_marker)
    }
}

/// Classifies sessions by display name, executable path and, for Teams,
/// the owning (or parent) process command line.
///
/// The result depends only on those inputs; a process that cannot be read
/// (typically because it already exited) leaves the session unclassified.
#[derive(Clone)]
pub struct SessionClassifier {
    rules: ClassifierRules,
    processes: Arc<dyn ProcessCommandLineReader>,
}

impl SessionClassifier {
    pub fn new(rules: ClassifierRules, processes: Arc<dyn ProcessCommandLineReader>) -> Self {
        Self { rules, processes }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn classify(&self, session: &AudioSession) -> Option<PolicyKind> {
        let rules = &self.rules;
        if session.is_system {
            return Some(PolicyKind::System);
        }

        let name = session.display_name.trim();
        if name.eq_ignore_ascii_case(&rules.teams_display_name) {
            let command_line = self.lookup(session.process_id, self.processes.command_line(session.process_id))?;
            return Some(if contains_ignore_case(&command_line, &rules.audio_service_marker) {
                PolicyKind::TeamsNotification
            } else {
                PolicyKind::TeamsCall
            });
        }

        if name == rules.teams_work_display_name {
            return Some(PolicyKind::TeamsCall);
        }

        if self.is_webview_host(session) {
            let parent = self.lookup(session.process_id, self.processes.parent_id(session.process_id))?;
            let command_line = self.lookup(parent, self.processes.command_line(parent))?;
            if contains_ignore_case(&command_line, &rules.teams_parent_marker) {
                return Some(PolicyKind::TeamsNotification);
            }
        }

        let path = session.executable_path.as_deref()?;
        if contains_ignore_case(path, &rules.secondary_browser_marker) {
            return Some(PolicyKind::Media);
        }
        if session
            .executable_name()
            .is_some_and(|exe| exe.eq_ignore_ascii_case(&rules.browser_executable))
        {
            return Some(PolicyKind::Browser);
        }

        None
    }

    fn is_webview_host(&self, session: &AudioSession) -> bool {
        contains_ignore_case(&session.display_name, &self.rules.webview_marker)
            || session
                .executable_name()
                .is_some_and(|exe| contains_ignore_case(exe, &self.rules.webview_marker))
    }

    fn lookup<T>(&self, pid: u32, result: Result<T, ProcessError>) -> Option<T> {
        result
            .map_err(|err| tracing::debug!(pid, "process lookup failed, session left unclassified: {err}"))
            .ok()
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

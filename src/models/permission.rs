//! Agent permission descriptors.
//!
//! Descriptors are immutable once built, so every check here is a plain
//! set lookup with no locking.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::agent::AgentKind;
use crate::models::task::Task;

/// Access verb checked by [`PermissionDescriptor::has_permission`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read a resource category.
    Read,
    /// Write a resource category.
    Write,
    /// Invoke a named capability.
    Execute,
}

/// What an agent may touch and how long it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDescriptor {
    can_read: BTreeSet<String>,
    can_write: BTreeSet<String>,
    can_execute: BTreeSet<String>,
    data_access_scope: BTreeSet<String>,
    max_iterations: u32,
    timeout: Duration,
}

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default execution bound.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

impl PermissionDescriptor {
    /// Build a descriptor from explicit sets.
    #[must_use]
    pub fn new(
        can_read: &[&str],
        can_write: &[&str],
        can_execute: &[&str],
        data_access_scope: &[&str],
    ) -> Self {
        Self {
            can_read: set(can_read),
            can_write: set(can_write),
            can_execute: set(can_execute),
            data_access_scope: set(data_access_scope),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Built-in descriptor for `kind`.
    #[must_use]
    pub fn for_kind(kind: AgentKind) -> Self {
        match kind {
            AgentKind::ClaimsProcessor => Self::new(
                &["claims", "veterans", "medical_records", "regulations"],
                &["claims", "decisions"],
                &["rating_calculator", "exam_scheduler"],
                &["claims", "medical", "regulatory"],
            ),
            AgentKind::MedicalReviewer => Self::new(
                &["medical_records", "exam_results", "diagnoses"],
                &["medical_opinions", "exam_requests"],
                &["medical_analyzer", "diagnosis_validator"],
                &["medical", "clinical"],
            ),
            AgentKind::QualityAuditor => Self::new(
                &["claims", "decisions", "audit_logs", "quality_metrics"],
                &["audit_reports", "quality_scores"],
                &["quality_checker", "compliance_validator"],
                &["claims", "quality", "compliance"],
            ),
            AgentKind::DocumentAnalyzer => Self::new(
                &["documents", "efolder", "scanned_images"],
                &["document_metadata", "extraction_results"],
                &["ocr_processor", "document_classifier"],
                &["documents", "images"],
            ),
            AgentKind::NotificationManager => Self::new(
                &["notifications", "user_preferences", "system_events"],
                &["notifications", "notification_logs"],
                &["email_sender", "sms_sender", "push_notifier"],
                &["notifications", "communications"],
            ),
            AgentKind::GeneralAssistant => Self::new(
                &["public_info", "help_docs", "faqs"],
                &["chat_logs"],
                &["search", "navigate"],
                &["public", "help"],
            ),
            AgentKind::LeidenAnalyzer => Self::new(
                &["analytics_data", "patterns", "clusters"],
                &["analysis_results", "insights"],
                &["leiden_clustering", "pattern_detection", "anomaly_detection"],
                &["analytics", "patterns"],
            ),
        }
    }

    /// Replace the execution bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Whether `action` is granted on `resource`.
    #[must_use]
    pub fn has_permission(&self, action: Action, resource: &str) -> bool {
        match action {
            Action::Read => self.can_read.contains(resource),
            Action::Write => self.can_write.contains(resource),
            Action::Execute => self.can_execute.contains(resource),
        }
    }

    /// First category declared by `task` that lies outside the data-access scope.
    #[must_use]
    pub fn first_denied_category<'t>(&self, task: &'t Task) -> Option<&'t str> {
        task.data_categories()
            .iter()
            .map(String::as_str)
            .find(|category| !self.data_access_scope.contains(*category))
    }

    /// Categories this agent may process.
    #[must_use]
    pub fn data_access_scope(&self) -> &BTreeSet<String> {
        &self.data_access_scope
    }

    /// Iteration budget.
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Execution bound.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

//! Closed enumeration of agent types.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Every agent type the orchestrator knows how to host.
///
/// Routing is by this enum only: an agent-type string that does not parse
/// is an `agent_not_found` outcome, never a silent fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Claim intake and rating workflow.
    ClaimsProcessor,
    /// Medical evidence review.
    MedicalReviewer,
    /// Decision quality and compliance review.
    QualityAuditor,
    /// Document classification and extraction.
    DocumentAnalyzer,
    /// Outbound notifications.
    NotificationManager,
    /// Public help and navigation.
    GeneralAssistant,
    /// Cluster and anomaly analysis.
    LeidenAnalyzer,
}

impl AgentKind {
    /// All kinds in declaration order.
    pub const ALL: [Self; 7] = [
        Self::ClaimsProcessor,
        Self::MedicalReviewer,
        Self::QualityAuditor,
        Self::DocumentAnalyzer,
        Self::NotificationManager,
        Self::GeneralAssistant,
        Self::LeidenAnalyzer,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaimsProcessor => "claims_processor",
            Self::MedicalReviewer => "medical_reviewer",
            Self::QualityAuditor => "quality_auditor",
            Self::DocumentAnalyzer => "document_analyzer",
            Self::NotificationManager => "notification_manager",
            Self::GeneralAssistant => "general_assistant",
            Self::LeidenAnalyzer => "leiden_analyzer",
        }
    }

    /// Agent responsible for a chat `message_type`, if any.
    #[must_use]
    pub fn for_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            "chat" => Some(Self::GeneralAssistant),
            "claim_query" => Some(Self::ClaimsProcessor),
            "medical_review" => Some(Self::MedicalReviewer),
            "quality_review" => Some(Self::QualityAuditor),
            "document_analysis" => Some(Self::DocumentAnalyzer),
            "notification" => Some(Self::NotificationManager),
            "pattern_analysis" => Some(Self::LeidenAnalyzer),
            _ => None,
        }
    }
}

impl Display for AgentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::NotFound(format!("agent type {s}")))
    }
}

//! Threat alert model and convenience constructors for well-known shapes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id;

/// Alert severity, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Numeric severity score compared against a session's risk threshold.
    pub fn score(self) -> u8 {
        match self {
            Self::Low => 25,
            Self::Medium => 50,
            Self::High => 75,
            Self::Critical => 95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NewThreat,
    SecurityUpdate,
    AppVulnerability,
    DeviceCompromise,
    SuspiciousActivity,
    SystemMaintenance,
}

impl AlertType {
    /// The wire tag for this type, as matched against subscriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewThreat => "new_threat",
            Self::SecurityUpdate => "security_update",
            Self::AppVulnerability => "app_vulnerability",
            Self::DeviceCompromise => "device_compromise",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::SystemMaintenance => "system_maintenance",
        }
    }
}

/// A real-time threat alert. Immutable once constructed; fanned out to many
/// sessions by reference with only the envelope stamped per recipient.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatAlert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    /// Indicator class (urls, domains, ips, app_packages, ...) to values.
    pub indicators: HashMap<String, Vec<String>>,
    pub affected_regions: Vec<String>,
    pub threat_tags: Vec<String>,
    pub action_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ThreatAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: id::prefixed_ulid(id::prefix::ALERT),
            alert_type,
            severity,
            title: title.into(),
            description: description.into(),
            indicators: HashMap::new(),
            affected_regions: Vec::new(),
            threat_tags: Vec::new(),
            action_required: false,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// A new phishing campaign.
    pub fn phishing(
        indicators: HashMap<String, Vec<String>>,
        description: impl Into<String>,
        affected_regions: Option<Vec<String>>,
    ) -> Self {
        let mut alert = Self::new(
            AlertType::NewThreat,
            AlertSeverity::High,
            "New Phishing Threat Detected",
            description,
        );
        alert.indicators = indicators;
        alert.affected_regions = affected_regions.unwrap_or_else(|| vec!["IN".to_string()]);
        alert.threat_tags = vec!["phishing".to_string(), "social_engineering".to_string()];
        alert.action_required = true;
        alert
    }

    /// A vulnerability in one or more installed app packages.
    pub fn app_vulnerability(
        app_packages: Vec<String>,
        description: impl Into<String>,
        severity: AlertSeverity,
    ) -> Self {
        let mut alert = Self::new(
            AlertType::AppVulnerability,
            severity,
            "App Vulnerability Detected",
            description,
        );
        alert
            .indicators
            .insert("app_packages".to_string(), app_packages);
        alert.affected_regions = vec!["global".to_string()];
        alert.threat_tags = vec!["vulnerability".to_string(), "app_security".to_string()];
        alert.action_required = true;
        alert
    }

    /// Scheduled system maintenance; expires at the scheduled time.
    pub fn maintenance(message: impl Into<String>, scheduled_for: DateTime<Utc>) -> Self {
        let mut alert = Self::new(
            AlertType::SystemMaintenance,
            AlertSeverity::Low,
            "Scheduled System Maintenance",
            message,
        );
        alert.affected_regions = vec!["global".to_string()];
        alert.threat_tags = vec!["maintenance".to_string(), "system".to_string()];
        alert.expires_at = Some(scheduled_for);
        alert
    }
}

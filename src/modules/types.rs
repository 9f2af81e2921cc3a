use std::time::Instant;

use derive_more::with_trait::Display;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The independently polled status resources, in polling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Resource {
    Status,
    Users,
    Media,
    Groups,
    Feedback,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Status,
        Resource::Users,
        Resource::Media,
        Resource::Groups,
        Resource::Feedback,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Resource::Status => "/api/status",
            Resource::Users => "/api/users",
            Resource::Media => "/api/media",
            Resource::Groups => "/api/groups",
            Resource::Feedback => "/api/feedback",
        }
    }
}

/// Backend metrics may arrive as `null`; those read as zero like missing keys.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default)]
pub struct ResourceSnapshot {
    pub data: Option<Value>,
    pub fetched_at: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusReport {
    #[serde(deserialize_with = "null_as_default")]
    pub bot_status: String,
    pub uptime: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub cpu_percent: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub memory_percent: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub disk_percent: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_downloads: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_uploads: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub memory_used_gb: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub memory_total_gb: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub disk_used_gb: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub disk_total_gb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UserStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_users: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub active_users: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub inactive_users: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub premium_users: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub recent_users_7d: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_media: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GroupStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_groups: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedbackStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_feedback: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UserInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub is_admin: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub is_premium: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub token_balance: i64,
    pub error: Option<String>,
}

/// One entry of the link catalog. `link` is the stable key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Display)]
#[serde(default)]
#[display("{title} -> {link}")]
pub struct LinkRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub username: Option<String>,
    pub username_display: Option<String>,
    #[serde(alias = "profile_photo", alias = "avatar_url")]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub links: Vec<LinkRecord>,
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub remaining_balance: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub tokens_deducted: i64,
    pub error: Option<String>,
}

/// Reply shape shared by report/submit/approve/reject/verify.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Display)]
#[serde(default)]
#[display("{name} ({link}) by {submitted_by}")]
pub struct PendingSubmission {
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub submitted_by: i64,
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Display)]
#[serde(default)]
#[display("{title} ({link}) x{report_count}")]
pub struct ReportedLink {
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub report_count: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub reporters: Vec<i64>,
    pub reported_at: Option<String>,
}

impl ReportedLink {
    pub fn times_reported(&self) -> u32 {
        if self.report_count > 0 {
            self.report_count
        } else {
            self.reporters.len() as u32
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PendingResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub pending_links: Vec<PendingSubmission>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportedResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub reported_links: Vec<ReportedLink>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_fields_default_to_zero() {
        let status: StatusReport = serde_json::from_value(json!({"bot_status": "online"})).unwrap();
        assert_eq!(status.cpu_percent, 0.0);
        assert_eq!(status.total_downloads, 0);
        assert!(status.uptime.is_none());

        let users: UserStats = serde_json::from_value(json!({})).unwrap();
        assert_eq!(users, UserStats::default());
    }

    #[test]
    fn null_metrics_read_as_zero() {
        let status: StatusReport = serde_json::from_value(json!({
            "bot_status": "online",
            "cpu_percent": null,
            "total_downloads": null
        }))
        .unwrap();
        assert_eq!(status.bot_status, "online");
        assert_eq!(status.cpu_percent, 0.0);
        assert_eq!(status.total_downloads, 0);

        let users: UserStats = serde_json::from_value(json!({"total_users": null, "active_users": 4})).unwrap();
        assert_eq!(users.total_users, 0);
        assert_eq!(users.active_users, 4);

        let info: UserInfo = serde_json::from_value(json!({"is_admin": null, "token_balance": null})).unwrap();
        assert!(!info.is_admin);
        assert_eq!(info.token_balance, 0);
    }

    #[test]
    fn link_photo_aliases_are_accepted() {
        let record: LinkRecord = serde_json::from_value(json!({
            "link": "https://t.me/rustlang",
            "title": "Rust",
            "profile_photo": "https://cdn/x.jpg"
        }))
        .unwrap();
        assert_eq!(record.photo_url.as_deref(), Some("https://cdn/x.jpg"));
        assert_eq!(record.to_string(), "Rust -> https://t.me/rustlang");
    }

    #[test]
    fn report_count_falls_back_to_reporters() {
        let report = ReportedLink {
            reporters: vec![1, 2, 3],
            ..ReportedLink::default()
        };
        assert_eq!(report.times_reported(), 3);
        assert_eq!(Resource::Groups.to_string(), "Groups");
    }
}

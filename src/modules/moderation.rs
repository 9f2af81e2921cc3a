//! Admin review of submitted and reported links.
//!
//! Every transition is confirmed by the operator first and applied locally
//! only after the backend answers `success: true`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use derive_more::with_trait::Display;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::modules::error::{Error, Result};
use crate::modules::notify::Confirm;
use crate::modules::poller::DashboardView;
use crate::modules::session::Session;
use crate::modules::transport::{ApiClient, Transport};
use crate::modules::types::{
    ActionResponse, PendingResponse, PendingSubmission, ReportedLink, ReportedResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SubmissionState {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionState {
    pub fn approve(self) -> Result<Self> {
        match self {
            SubmissionState::Pending => Ok(SubmissionState::Approved),
            done => Err(done.refuse("approve")),
        }
    }

    pub fn reject(self) -> Result<Self> {
        match self {
            SubmissionState::Pending => Ok(SubmissionState::Rejected),
            done => Err(done.refuse("reject")),
        }
    }

    fn refuse(self, action: &'static str) -> Error {
        Error::InvalidTransition {
            from: self.to_string(),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReportState {
    Reported,
    ResolvedWorking,
    ResolvedBroken,
}

impl ReportState {
    pub fn resolve(self, verdict: Verdict) -> Result<Self> {
        match (self, verdict) {
            (ReportState::Reported, Verdict::Working) => Ok(ReportState::ResolvedWorking),
            (ReportState::Reported, Verdict::Broken) => Ok(ReportState::ResolvedBroken),
            (done, _) => Err(Error::InvalidTransition {
                from: done.to_string(),
                action: "verify",
            }),
        }
    }
}

/// An admin's ruling on a reported link. Broken links are removed and the
/// reporters refunded by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[display("working")]
    Working,
    #[display("broken")]
    Broken,
}

impl FromStr for Verdict {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "working" => Ok(Verdict::Working),
            "broken" => Ok(Verdict::Broken),
            other => Err(Error::Validation(format!("unknown verdict: {other}"))),
        }
    }
}

/// What the caller should do to the rest of the dashboard after a confirmed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationOutcome {
    pub message: String,
    pub counter_delta: i64,
    pub refresh_catalog: bool,
    /// Set when the backend deleted the link from the catalog.
    pub removed_link: Option<String>,
}

impl ModerationOutcome {
    pub fn apply_to(&self, view: &mut DashboardView) {
        if self.counter_delta != 0 {
            view.adjust_groups(self.counter_delta);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewSubmission {
    pub name: String,
    pub link: String,
    pub description: String,
}

impl NewSubmission {
    /// Trims every field and checks the link is a Telegram link.
    pub fn validated(self) -> Result<Self> {
        let submission = Self {
            name: self.name.trim().to_string(),
            link: self.link.trim().to_string(),
            description: self.description.trim().to_string(),
        };
        if submission.name.is_empty() {
            return Err(Error::Validation("Please enter a group/channel name".into()));
        }
        if submission.link.is_empty() {
            return Err(Error::Validation("Please enter an invite link".into()));
        }
        if !submission.link.starts_with("https://t.me/") && !submission.link.starts_with("http://t.me/") {
            return Err(Error::Validation(
                "Please enter a valid Telegram link (must start with https://t.me/)".into(),
            ));
        }
        Ok(submission)
    }
}

pub struct ModerationDesk<T> {
    client: Arc<ApiClient<T>>,
    pending: Vec<PendingSubmission>,
    reported: Vec<ReportedLink>,
    submissions: HashMap<String, SubmissionState>,
    reports: HashMap<String, ReportState>,
}

impl<T: Transport> ModerationDesk<T> {
    pub fn new(client: Arc<ApiClient<T>>) -> Self {
        Self {
            client,
            pending: Vec::new(),
            reported: Vec::new(),
            submissions: HashMap::new(),
            reports: HashMap::new(),
        }
    }

    pub fn pending(&self) -> &[PendingSubmission] {
        &self.pending
    }

    pub fn reported(&self) -> &[ReportedLink] {
        &self.reported
    }

    pub fn submission_state(&self, link: &str) -> Option<SubmissionState> {
        self.submissions.get(link).copied()
    }

    pub fn report_state(&self, link: &str) -> Option<ReportState> {
        self.reports.get(link).copied()
    }

    pub async fn load_pending(&mut self, session: &Session) -> Result<&[PendingSubmission]> {
        require_admin(session)?;
        let response: PendingResponse = self
            .client
            .get_json("/api/links/pending", &[("admin_id", session.user_id.to_string())])
            .await?;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to load pending links".to_string()),
            ));
        }
        for submission in &response.pending_links {
            self.submissions
                .insert(submission.link.clone(), SubmissionState::Pending);
        }
        self.pending = response.pending_links;
        Ok(&self.pending)
    }

    pub async fn load_reported(&mut self, session: &Session) -> Result<&[ReportedLink]> {
        require_admin(session)?;
        let response: ReportedResponse = self
            .client
            .get_json("/api/links/reported", &[("admin_id", session.user_id.to_string())])
            .await?;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to load reported links".to_string()),
            ));
        }
        for report in &response.reported_links {
            self.reports.insert(report.link.clone(), ReportState::Reported);
        }
        self.reported = response.reported_links;
        Ok(&self.reported)
    }

    pub async fn approve(
        &mut self,
        session: &Session,
        link: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<ModerationOutcome>> {
        require_admin(session)?;
        let next = self.current_submission(link)?.approve()?;
        let submission = self.queued_submission(link)?;
        let prompt = format!(
            "Approve this link and add it to the database?\n\n\"{}\"\n\nThis will make it visible to all users.",
            submission.name
        );
        if !confirm.confirm(&prompt) {
            return Ok(None);
        }

        let body = json!({
            "admin_id": session.user_id,
            "link": link,
            "name": submission.name,
            "description": submission.description,
        });
        let message = self
            .post("/api/links/approve", body, "Failed to approve link")
            .await?
            .unwrap_or_else(|| "Link approved and added to database!".to_string());

        self.settle_submission(link, next);
        Ok(Some(ModerationOutcome {
            message,
            counter_delta: 1,
            refresh_catalog: true,
            removed_link: None,
        }))
    }

    pub async fn reject(
        &mut self,
        session: &Session,
        link: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<ModerationOutcome>> {
        require_admin(session)?;
        let next = self.current_submission(link)?.reject()?;
        if !confirm.confirm("Reject this link submission?\n\nThis will remove it from the pending list.") {
            return Ok(None);
        }

        let body = json!({"admin_id": session.user_id, "link": link});
        let message = self
            .post("/api/links/reject", body, "Failed to reject link")
            .await?
            .unwrap_or_else(|| "Link rejected and removed from pending list.".to_string());

        self.settle_submission(link, next);
        Ok(Some(ModerationOutcome {
            message,
            counter_delta: 0,
            refresh_catalog: false,
            removed_link: None,
        }))
    }

    pub async fn verify(
        &mut self,
        session: &Session,
        link: &str,
        verdict: Verdict,
        confirm: &dyn Confirm,
    ) -> Result<Option<ModerationOutcome>> {
        require_admin(session)?;
        let current = match self.report_state(link) {
            Some(state) => state,
            None if self.reported.iter().any(|r| r.link == link) => ReportState::Reported,
            None => return Err(Error::Validation(format!("No report found for {link}"))),
        };
        let next = current.resolve(verdict)?;
        let prompt = match verdict {
            Verdict::Working => "Mark this link as working?\n\nThe report will be removed and the link will be shown to users again.",
            Verdict::Broken => "Mark this link as broken?\n\nThis will:\n- Refund 10 tokens to all reporters\n- Remove the link from the database\n- Cannot be undone",
        };
        if !confirm.confirm(prompt) {
            return Ok(None);
        }

        let body = json!({"admin_id": session.user_id, "link": link, "status": verdict});
        let message = self
            .post("/api/links/verify", body, "Failed to verify link")
            .await?
            .unwrap_or_else(|| format!("Link marked as {verdict}"));

        self.reported.retain(|r| r.link != link);
        self.reports.insert(link.to_string(), next);
        info!("Report on {link} resolved: {next}");
        Ok(Some(match verdict {
            Verdict::Working => ModerationOutcome {
                message,
                counter_delta: 0,
                refresh_catalog: true,
                removed_link: None,
            },
            Verdict::Broken => ModerationOutcome {
                message,
                counter_delta: -1,
                refresh_catalog: false,
                removed_link: Some(link.to_string()),
            },
        }))
    }

    /// Proposes a new link for review. Open to every identified user.
    pub async fn submit(&self, session: &Session, submission: NewSubmission) -> Result<String> {
        let submission = submission.validated()?;
        let body = json!({
            "user_id": session.user_id,
            "name": submission.name,
            "link": submission.link,
            "description": submission.description,
        });
        let message = self
            .post("/api/links/submit", body, "Failed to submit link")
            .await?
            .unwrap_or_else(|| "Link submitted successfully! Waiting for admin approval.".to_string());
        info!("Submitted {} for review", submission.link);
        Ok(message)
    }

    fn current_submission(&self, link: &str) -> Result<SubmissionState> {
        match self.submissions.get(link) {
            Some(state) => Ok(*state),
            None => Err(Error::Validation(format!("No pending submission for {link}"))),
        }
    }

    fn queued_submission(&self, link: &str) -> Result<PendingSubmission> {
        self.pending
            .iter()
            .find(|s| s.link == link)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("No pending submission for {link}")))
    }

    fn settle_submission(&mut self, link: &str, state: SubmissionState) {
        self.pending.retain(|s| s.link != link);
        self.submissions.insert(link.to_string(), state);
        info!("Submission {link} is now {state}");
    }

    /// POSTs an admin action; `Ok(message)` only on `success: true`.
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        fallback: &str,
    ) -> Result<Option<String>> {
        let response: ActionResponse = self.client.post_json(path, &[], &body).await?;
        if response.success {
            Ok(response.message)
        } else {
            let error = response.error.unwrap_or_else(|| fallback.to_string());
            warn!("{path} refused: {error}");
            Err(Error::Application(error))
        }
    }
}

fn require_admin(session: &Session) -> Result<()> {
    if session.is_admin {
        Ok(())
    } else {
        Err(Error::NotAdmin)
    }
}

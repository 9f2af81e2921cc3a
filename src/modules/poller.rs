use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use derive_more::with_trait::Display;
use log::{debug, error, warn};
use serde_json::Value;

use crate::modules::cache::TtlCache;
use crate::modules::error::{Error, Result};
use crate::modules::transport::{ApiClient, Transport};
use crate::modules::types::{
    FeedbackStats, GroupStats, MediaStats, Resource, ResourceSnapshot, StatusReport, UserStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum BotIndicator {
    #[default]
    #[display("--")]
    Unknown,
    Online,
    Offline,
    Error,
}

/// What the dashboard currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub indicator: BotIndicator,
    pub status: Option<StatusReport>,
    pub users: Option<UserStats>,
    pub media: Option<MediaStats>,
    pub groups: Option<GroupStats>,
    pub feedback: Option<FeedbackStats>,
    pub last_updated: Option<DateTime<Local>>,
}

impl DashboardView {
    fn apply(&mut self, resource: Resource, value: &Value) -> Result<()> {
        match resource {
            Resource::Status => {
                let status: StatusReport = serde_json::from_value(value.clone())?;
                self.indicator = if status.bot_status == "online" {
                    BotIndicator::Online
                } else {
                    BotIndicator::Offline
                };
                self.status = Some(status);
            }
            Resource::Users => self.users = Some(serde_json::from_value(value.clone())?),
            Resource::Media => self.media = Some(serde_json::from_value(value.clone())?),
            Resource::Groups => self.groups = Some(serde_json::from_value(value.clone())?),
            Resource::Feedback => self.feedback = Some(serde_json::from_value(value.clone())?),
        }
        Ok(())
    }

    pub fn total_groups(&self) -> Option<u64> {
        self.groups.as_ref().map(|g| g.total_groups)
    }

    /// Optimistic ±n on the group counter; the next poll replaces it.
    pub fn adjust_groups(&mut self, delta: i64) {
        let groups = self.groups.get_or_insert_with(GroupStats::default);
        groups.total_groups = groups.total_groups.saturating_add_signed(delta);
    }
}

/// Result of a refresh cycle in which at least one resource loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub failed: Vec<(Resource, String)>,
    pub status_from_cache: bool,
}

impl PollReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_resources(&self) -> Vec<Resource> {
        self.failed.iter().map(|(r, _)| *r).collect()
    }

    /// Text for the non-blocking banner, if anything failed.
    pub fn warning(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let names = self
            .failed
            .iter()
            .map(|(r, _)| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("Some data couldn't load ({names}). Retrying..."))
    }
}

/// Fetches the five status resources concurrently and folds the outcomes
/// into the dashboard view. One resource failing never cancels the others.
pub struct Poller<T> {
    client: Arc<ApiClient<T>>,
    cache: TtlCache<Resource, Value>,
    snapshots: HashMap<Resource, ResourceSnapshot>,
    view: DashboardView,
}

impl<T: Transport> Poller<T> {
    pub fn new(client: Arc<ApiClient<T>>, cache_ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(cache_ttl),
            snapshots: Resource::ALL
                .iter()
                .map(|r| (*r, ResourceSnapshot::default()))
                .collect(),
            view: DashboardView::default(),
        }
    }

    pub fn view(&self) -> &DashboardView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut DashboardView {
        &mut self.view
    }

    pub fn snapshot(&self, resource: Resource) -> Option<&ResourceSnapshot> {
        self.snapshots.get(&resource)
    }

    pub async fn poll_all(&mut self, now: Instant) -> Result<PollReport> {
        let cached_status = self.cache.get(&Resource::Status, now).cloned();
        let status_from_cache = cached_status.is_some();
        let client = &self.client;

        let status = async {
            match cached_status {
                Some(value) => {
                    debug!("Using cached status data");
                    Ok(value)
                }
                None => client.get_value(Resource::Status.path(), &[]).await,
            }
        };
        let (status, users, media, groups, feedback) = tokio::join!(
            status,
            client.get_value(Resource::Users.path(), &[]),
            client.get_value(Resource::Media.path(), &[]),
            client.get_value(Resource::Groups.path(), &[]),
            client.get_value(Resource::Feedback.path(), &[]),
        );

        let outcomes = [
            (Resource::Status, status),
            (Resource::Users, users),
            (Resource::Media, media),
            (Resource::Groups, groups),
            (Resource::Feedback, feedback),
        ];

        let mut failed: Vec<(Resource, Error)> = Vec::new();
        for (resource, outcome) in outcomes {
            let fresh = !(resource == Resource::Status && status_from_cache);
            match outcome.and_then(|value| self.accept(resource, value, now, fresh)) {
                Ok(()) => debug!("{resource} succeeded"),
                Err(err) => {
                    error!("{resource} failed: {err}");
                    if resource == Resource::Status {
                        self.view.indicator = BotIndicator::Error;
                    }
                    failed.push((resource, err));
                }
            }
        }

        if failed.len() == Resource::ALL.len() {
            let first = failed[0].1.to_string();
            return Err(Error::TotalFailure {
                failed: failed.len(),
                first,
            });
        }

        self.view.last_updated = Some(Local::now());
        let report = PollReport {
            failed: failed.into_iter().map(|(r, e)| (r, e.to_string())).collect(),
            status_from_cache,
        };
        if let Some(warning) = report.warning() {
            warn!("{} out of {} API calls failed: {warning}", report.failed.len(), Resource::ALL.len());
        }
        Ok(report)
    }

    fn accept(&mut self, resource: Resource, value: Value, now: Instant, fresh: bool) -> Result<()> {
        self.view.apply(resource, &value)?;
        if fresh {
            if resource == Resource::Status {
                self.cache.set(resource, value.clone(), now);
            }
            self.snapshots.insert(
                resource,
                ResourceSnapshot {
                    data: Some(value),
                    fetched_at: Some(now),
                },
            );
        }
        Ok(())
    }
}

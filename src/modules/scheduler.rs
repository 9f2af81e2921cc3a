use std::sync::Arc;
use std::time::Duration;

use derive_more::with_trait::Display;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::modules::config::DashboardConfig;
use crate::modules::poller::{DashboardView, Poller};
use crate::modules::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Poll now: retry button, or after a moderation action.
    Refresh,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Trigger {
    Startup,
    Interval,
    Resume,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub message: String,
    pub can_retry: bool,
    /// Blocking banners stay up until a later poll succeeds.
    pub blocking: bool,
}

/// UI binding points fed by the refresh loop.
pub trait DashboardSink: Send + Sync {
    fn render(&self, view: &DashboardView);
    fn show_banner(&self, banner: &Banner);
    fn hide_banner(&self);
}

impl<S: DashboardSink + ?Sized> DashboardSink for Arc<S> {
    fn render(&self, view: &DashboardView) {
        (**self).render(view)
    }

    fn show_banner(&self, banner: &Banner) {
        (**self).show_banner(banner)
    }

    fn hide_banner(&self) {
        (**self).hide_banner()
    }
}

/// Drives the poller: once after bootstrap, then every interval while the
/// page is visible, immediately on becoming visible again, and on demand.
pub struct RefreshLoop<T, S> {
    poller: Poller<T>,
    sink: S,
    interval: Duration,
    bootstrap_delay: Duration,
    banner_dismiss: Duration,
    dismiss_at: Option<Instant>,
}

impl<T: Transport, S: DashboardSink> RefreshLoop<T, S> {
    /// `in_mini_app` adds the host bootstrap delay before the first poll.
    pub fn new(poller: Poller<T>, sink: S, config: &DashboardConfig, in_mini_app: bool) -> Self {
        Self {
            poller,
            sink,
            interval: config.refresh_interval(),
            bootstrap_delay: if in_mini_app {
                config.bootstrap_delay()
            } else {
                Duration::ZERO
            },
            banner_dismiss: config.banner_dismiss(),
            dismiss_at: None,
        }
    }

    /// Runs until `Command::Shutdown` or until every command sender is gone,
    /// then hands the poller back.
    pub async fn run(
        mut self,
        mut visibility: watch::Receiver<Visibility>,
        mut commands: mpsc::Receiver<Command>,
    ) -> Poller<T> {
        if !self.bootstrap_delay.is_zero() {
            debug!("Waiting {:?} for host bootstrap", self.bootstrap_delay);
            time::sleep(self.bootstrap_delay).await;
        }

        let mut hidden = *visibility.borrow_and_update() == Visibility::Hidden;
        if !hidden {
            self.cycle(Trigger::Startup).await;
        }

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Auto-refresh enabled, interval: {:?}", self.interval);

        let mut visibility_open = true;
        loop {
            let dismiss_at = self.dismiss_at;
            tokio::select! {
                _ = ticker.tick(), if !hidden => self.cycle(Trigger::Interval).await,
                _ = time::sleep_until(dismiss_at.unwrap_or_else(Instant::now)), if dismiss_at.is_some() => {
                    self.dismiss_at = None;
                    self.sink.hide_banner();
                }
                changed = visibility.changed(), if visibility_open => {
                    if changed.is_err() {
                        visibility_open = false;
                        continue;
                    }
                    let now_hidden = *visibility.borrow_and_update() == Visibility::Hidden;
                    if now_hidden && !hidden {
                        debug!("Page hidden - pausing updates");
                        hidden = true;
                    } else if !now_hidden && hidden {
                        debug!("Page visible - resuming updates");
                        hidden = false;
                        self.cycle(Trigger::Resume).await;
                        ticker.reset();
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.cycle(Trigger::Manual).await,
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        debug!("Refresh loop stopped");
        self.poller
    }

    async fn cycle(&mut self, trigger: Trigger) {
        debug!("Refreshing dashboard ({trigger})");
        let outcome = self.poller.poll_all(Instant::now().into_std()).await;
        self.sink.render(self.poller.view());

        match outcome {
            Ok(report) => match report.warning() {
                Some(message) => {
                    self.sink.show_banner(&Banner {
                        message,
                        can_retry: true,
                        blocking: false,
                    });
                    self.dismiss_at = Some(Instant::now() + self.banner_dismiss);
                }
                None if self.dismiss_at.is_none() => self.sink.hide_banner(),
                None => {}
            },
            // Interval failures stay out of the UI; the next tick retries anyway.
            Err(err) if trigger == Trigger::Interval => error!("Auto-refresh failed: {err}"),
            Err(err) => {
                error!("{trigger} refresh failed: {err}");
                let message = if trigger == Trigger::Manual {
                    "Still unable to load data. Please check your connection and try again."
                        .to_string()
                } else {
                    format!("Failed to load dashboard data: {err}")
                };
                self.dismiss_at = None;
                self.sink.show_banner(&Banner {
                    message,
                    can_retry: true,
                    blocking: true,
                });
            }
        }
    }
}

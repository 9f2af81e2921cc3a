use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::json;
use simplelog::*;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tgdash::modules::catalog::LinkCatalog;
use tgdash::modules::config::{DashboardConfig, HostContext, Protocol, load_file_config};
use tgdash::modules::groups::{GroupConfigClient, Section};
use tgdash::modules::moderation::{ModerationDesk, ModerationOutcome, NewSubmission, Verdict};
use tgdash::modules::normalize::normalize;
use tgdash::modules::notify::{Answer, Confirm, LogNotifier, Notice, Notifier};
use tgdash::modules::poller::{DashboardView, Poller};
use tgdash::modules::scheduler::{Banner, Command, DashboardSink, RefreshLoop, Visibility};
use tgdash::modules::session::{HostIdentity, Session, track_miniapp_access};
use tgdash::modules::transport::{ApiClient, HttpTransport};
use tokio::sync::{mpsc, watch};
use url::Url;

#[derive(Parser)]
#[command(
    name = "tgdash",
    version,
    about = "Bot-management dashboard client",
    long_about = include_str!("../help.txt")
)]
struct Cli {
    #[arg(short = 'l', long = "log-file", default_value = "tgdash.log")]
    log_file: String,

    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<String>,

    /// Hostname the dashboard is served from.
    #[arg(long = "host", default_value = "localhost")]
    host: String,

    #[arg(long = "protocol", default_value = "http")]
    protocol: Protocol,

    /// Full page URL, e.g. https://me.github.io/dash/. Overrides --host and --protocol.
    #[arg(long = "page-url")]
    page_url: Option<String>,

    /// Skip host detection and use this API base URL.
    #[arg(long = "api-url")]
    api_url: Option<Url>,

    #[arg(long = "user-id")]
    user_id: Option<i64>,

    /// Answer yes to every confirmation.
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the resolved API base URL.
    Resolve,
    /// Run the auto-refreshing status view.
    Watch {
        /// Stop after roughly this many refresh intervals.
        #[arg(long)]
        cycles: Option<u32>,
        /// Behave as if opened inside the messaging app.
        #[arg(long)]
        mini_app: bool,
    },
    /// Browse the link catalog.
    Search {
        query: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
    /// Spend tokens to open a link.
    Access { link: String },
    Report {
        link: String,
        #[arg(long)]
        title: Option<String>,
    },
    Submit {
        name: String,
        link: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Pending,
    Reported,
    Approve { link: String },
    Reject { link: String },
    Verify { link: String, verdict: Verdict },
    /// List groups the bot manages for this user.
    Groups,
    /// Inspect or change one managed group.
    Group {
        #[arg(allow_negative_numbers = true)]
        group: i64,
        #[command(subcommand)]
        action: GroupCmd,
    },
}

#[derive(Subcommand)]
enum GroupCmd {
    /// Print the stored group config.
    Show,
    /// Toggle one lock.
    Lock { key: String, state: Switch },
    /// Toggle one clean-service rule (pin, join, leave, enabled, ...).
    CleanService { key: String, state: Switch },
    /// Toggle one clean-message rule.
    CleanMessage { key: String, state: Switch },
    /// Set one general setting, e.g. `warns_limit 5`. The value is parsed as JSON when possible.
    Set { key: String, value: String },
    Filter { trigger: String, response: String },
    Unfilter { trigger: String },
    Block { word: String },
    Unblock { word: String },
    /// List disabled commands.
    Commands,
    Disable { command: String },
    Enable { command: String },
    Federation,
    CreateFed { name: String },
    JoinFed { fed_id: String },
    LeaveFed,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn value(self) -> serde_json::Value {
        json!(matches!(self, Switch::On))
    }
}

fn init_logger(log_path: &str, debug: bool) -> Result<(), Box<dyn Error>> {
    let file_level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    let term_level = if debug { LevelFilter::Debug } else { LevelFilter::Warn };
    CombinedLogger::init(vec![
        TermLogger::new(
            term_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            file_level,
            ConfigBuilder::new()
                .set_time_format_rfc3339()
                .build(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        ),
    ])?;
    Ok(())
}

struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt}\n[y/N] ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Prints one status line per refresh.
struct TerminalSink;

impl DashboardSink for TerminalSink {
    fn render(&self, view: &DashboardView) {
        let stamp = view
            .last_updated
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        let status = view.status.clone().unwrap_or_default();
        println!(
            "[{stamp}] bot {} | users {} | media {} | groups {} | feedback {} | cpu {:.1}% mem {:.1}% disk {:.1}%",
            view.indicator,
            view.users.as_ref().map_or(0, |u| u.total_users),
            view.media.as_ref().map_or(0, |m| m.total_media),
            view.total_groups().unwrap_or(0),
            view.feedback.as_ref().map_or(0, |f| f.total_feedback),
            status.cpu_percent,
            status.memory_percent,
            status.disk_percent,
        );
    }

    fn show_banner(&self, banner: &Banner) {
        eprintln!("! {}", banner.message);
    }

    fn hide_banner(&self) {}
}

async fn require_session(client: &ApiClient, user_id: Option<i64>) -> Result<Session, Box<dyn Error>> {
    let user_id = user_id.ok_or(tgdash::Error::NoSession)?;
    Ok(Session::load(client, user_id).await)
}

/// Status counters and the first catalog page, loaded before a moderation
/// action and updated from its outcome.
struct Board {
    poller: Poller<HttpTransport>,
    catalog: LinkCatalog<HttpTransport>,
}

impl Board {
    async fn open(client: &Arc<ApiClient>, config: &DashboardConfig, session: &Session) -> Board {
        let mut poller = Poller::new(client.clone(), config.cache_ttl());
        if let Err(err) = poller.poll_all(Instant::now()).await {
            warn!("Dashboard data unavailable: {err}");
        }
        let mut catalog = LinkCatalog::new(client.clone(), Some(session.user_id));
        if let Err(err) = catalog.show_all().await {
            warn!("Catalog unavailable: {err}");
        }
        Board { poller, catalog }
    }

    async fn settle(&mut self, notifier: &dyn Notifier, outcome: Option<ModerationOutcome>) {
        let Some(outcome) = outcome else {
            println!("Cancelled");
            return;
        };
        println!("{}", outcome.message);
        notifier.notify(Notice::success(outcome.message.clone()));

        outcome.apply_to(self.poller.view_mut());
        self.catalog.settle(&outcome).await;
        TerminalSink.render(self.poller.view());
        let state = &self.catalog.page().state;
        println!("Catalog: {} links", state.total);
    }
}

fn print_done(notifier: &dyn Notifier, done: bool, message: String) {
    if done {
        println!("{message}");
        notifier.notify(Notice::success(message));
    } else {
        println!("Cancelled");
    }
}

async fn run_group(
    groups: &GroupConfigClient<HttpTransport>,
    group: i64,
    action: GroupCmd,
    confirm: &dyn Confirm,
    notifier: &dyn Notifier,
) -> Result<(), Box<dyn Error>> {
    match action {
        GroupCmd::Show => {
            let config = groups.config(group).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        GroupCmd::Lock { key, state } => {
            let locks = groups.update_field(group, Section::Locks, &key, state.value()).await?;
            println!("{}", serde_json::Value::Object(locks));
            notifier.notify(Notice::success(format!("Lock {key} updated for group {group}")));
        }
        GroupCmd::CleanService { key, state } => {
            let rules = groups
                .update_field(group, Section::CleanService, &key, state.value())
                .await?;
            println!("{}", serde_json::Value::Object(rules));
        }
        GroupCmd::CleanMessage { key, state } => {
            let rules = groups
                .update_field(group, Section::CleanMessage, &key, state.value())
                .await?;
            println!("{}", serde_json::Value::Object(rules));
        }
        GroupCmd::Set { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            match groups.update_settings(group, &key, value).await? {
                Some(config) => println!("{config}"),
                None => println!("Setting {key} updated"),
            }
        }
        GroupCmd::Filter { trigger, response } => {
            groups.add_filter(group, &trigger, &response).await?;
            print_done(notifier, true, "Filter added successfully".to_string());
        }
        GroupCmd::Unfilter { trigger } => {
            let done = groups.remove_filter(group, &trigger, confirm).await?;
            print_done(notifier, done, "Filter removed successfully".to_string());
        }
        GroupCmd::Block { word } => {
            groups.block_word(group, &word).await?;
            print_done(notifier, true, "Word added to blocklist".to_string());
        }
        GroupCmd::Unblock { word } => {
            let done = groups.unblock_word(group, &word, confirm).await?;
            print_done(notifier, done, "Word removed from blocklist".to_string());
        }
        GroupCmd::Commands => {
            let listed = groups.disabled_commands(group).await?;
            if listed.disable_user_commands {
                println!("All user commands are disabled");
            }
            if listed.disabled_commands.is_empty() {
                println!("No commands disabled");
            }
            for command in listed.disabled_commands {
                println!("/{command}");
            }
        }
        GroupCmd::Disable { command } => {
            let command = groups.disable_command(group, &command).await?;
            print_done(notifier, true, format!("Command /{command} disabled"));
        }
        GroupCmd::Enable { command } => {
            let done = groups.enable_command(group, &command, confirm).await?;
            print_done(notifier, done, format!("Command /{command} enabled"));
        }
        GroupCmd::Federation => match groups.federation(group).await? {
            Some(fed) => {
                let owner = fed.owner_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{fed}, owner {owner}, {} banned users", fed.banned_users_count);
                for member in &fed.groups {
                    println!("    {member}");
                }
            }
            None => println!("Not in a federation"),
        },
        GroupCmd::CreateFed { name } => {
            let fed_id = groups.create_federation(group, &name).await?;
            println!("Federation created and group joined: {}", fed_id.unwrap_or_default());
        }
        GroupCmd::JoinFed { fed_id } => {
            groups.join_federation(group, &fed_id).await?;
            print_done(notifier, true, "Group joined federation".to_string());
        }
        GroupCmd::LeaveFed => {
            let done = groups.leave_federation(group, confirm).await?;
            print_done(notifier, done, "Group left federation".to_string());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let host = match &cli.page_url {
        Some(page) => HostContext::from_page_url(page)?,
        None => HostContext::new(cli.protocol, cli.host.clone()),
    };
    let mut config = DashboardConfig::for_host(&host)?;
    if let Some(path) = &cli.config {
        config = config.merge(load_file_config(path)?)?;
    }
    if let Some(api_url) = cli.api_url.clone() {
        config.api_url = api_url;
    }
    init_logger(&cli.log_file, config.debug)?;
    info!("Using API at {} for {host}", config.api_url);

    let transport = HttpTransport::new(config.request_timeout_secs.map(Duration::from_secs))?;
    let client = Arc::new(ApiClient::new(transport, config.api_url.clone(), host));
    let confirm: Box<dyn Confirm> = if cli.yes {
        Box::new(Answer(true))
    } else {
        Box::new(StdinConfirm)
    };
    let notifier = LogNotifier;

    let result = run(cli.command, cli.user_id, client, &config, confirm.as_ref(), &notifier).await;
    if let Err(err) = &result {
        notifier.notify(Notice::error(err.to_string()));
    }
    result
}

async fn run(
    command: Cmd,
    user_id: Option<i64>,
    client: Arc<ApiClient>,
    config: &DashboardConfig,
    confirm: &dyn Confirm,
    notifier: &dyn Notifier,
) -> Result<(), Box<dyn Error>> {
    match command {
        Cmd::Resolve => println!("{}", config.api_url),
        Cmd::Watch { cycles, mini_app } => {
            if mini_app {
                if let Some(user_id) = user_id {
                    let identity = HostIdentity {
                        id: user_id,
                        ..HostIdentity::default()
                    };
                    track_miniapp_access(&*client, &identity, "").await;
                }
            }

            let poller = Poller::new(client.clone(), config.cache_ttl());
            let refresh = RefreshLoop::new(poller, TerminalSink, config, mini_app);
            let (_visibility, visibility_rx) = watch::channel(Visibility::Visible);
            let (commands, commands_rx) = mpsc::channel(4);
            let handle = tokio::spawn(refresh.run(visibility_rx, commands_rx));

            match cycles {
                Some(n) => tokio::time::sleep(config.refresh_interval() * n).await,
                None => tokio::signal::ctrl_c().await?,
            }
            commands.send(Command::Shutdown).await?;
            handle.await?;
        }
        Cmd::Search { query, page } => {
            let mut catalog = LinkCatalog::new(client.clone(), user_id);
            let current = catalog.open(query.as_deref().unwrap_or(""), page).await?;
            for record in &current.links {
                let shown = normalize(record);
                let handle = shown
                    .username
                    .as_deref()
                    .map(|u| format!(" @{u}"))
                    .unwrap_or_default();
                println!("{} {}{handle} [{}] {}", shown.initial, shown.title, shown.kind, record.link);
                println!("    {}", shown.description);
            }
            let state = &current.state;
            println!(
                "Showing {} of {} links (page {}/{})",
                state.shown(),
                state.total,
                state.page + 1,
                state.max_page() + 1
            );
        }
        Cmd::Access { link } => {
            let mut session = require_session(&*client, user_id).await?;
            let receipt = session.access_link(&*client, &link).await?;
            println!("{receipt}");
            notifier.notify(Notice::success(receipt.message()));
        }
        Cmd::Report { link, title } => {
            let session = require_session(&*client, user_id).await?;
            let mut catalog = LinkCatalog::new(client.clone(), Some(session.user_id));
            let title = title.unwrap_or_else(|| link.clone());
            match catalog.report(Some(&session), &link, &title, confirm).await? {
                Some(message) => {
                    println!("{message}");
                    notifier.notify(Notice::success(message));
                }
                None => println!("Cancelled"),
            }
        }
        Cmd::Submit { name, link, description } => {
            let session = require_session(&*client, user_id).await?;
            let desk = ModerationDesk::new(client.clone());
            let message = desk
                .submit(&session, NewSubmission { name, link, description })
                .await?;
            println!("{message}");
            notifier.notify(Notice::success(message));
        }
        Cmd::Pending => {
            let session = require_session(&*client, user_id).await?;
            let mut desk = ModerationDesk::new(client.clone());
            let pending = desk.load_pending(&session).await?;
            if pending.is_empty() {
                println!("No pending links");
            }
            for submission in pending {
                println!("{submission}");
                if !submission.description.is_empty() {
                    println!("    {}", submission.description);
                }
            }
        }
        Cmd::Reported => {
            let session = require_session(&*client, user_id).await?;
            let mut desk = ModerationDesk::new(client.clone());
            let reported = desk.load_reported(&session).await?;
            if reported.is_empty() {
                println!("No reported links! All links are in good shape.");
            }
            for report in reported {
                let n = report.times_reported();
                println!("{} ({}) reported {n} time{}", report.title, report.link, if n == 1 { "" } else { "s" });
            }
        }
        Cmd::Approve { link } => {
            let session = require_session(&*client, user_id).await?;
            let mut desk = ModerationDesk::new(client.clone());
            desk.load_pending(&session).await?;
            let mut board = Board::open(&client, config, &session).await;
            let outcome = desk.approve(&session, &link, confirm).await?;
            board.settle(notifier, outcome).await;
        }
        Cmd::Reject { link } => {
            let session = require_session(&*client, user_id).await?;
            let mut desk = ModerationDesk::new(client.clone());
            desk.load_pending(&session).await?;
            let mut board = Board::open(&client, config, &session).await;
            let outcome = desk.reject(&session, &link, confirm).await?;
            board.settle(notifier, outcome).await;
        }
        Cmd::Verify { link, verdict } => {
            let session = require_session(&*client, user_id).await?;
            let mut desk = ModerationDesk::new(client.clone());
            desk.load_reported(&session).await?;
            let mut board = Board::open(&client, config, &session).await;
            let outcome = desk.verify(&session, &link, verdict, confirm).await?;
            board.settle(notifier, outcome).await;
        }
        Cmd::Groups => {
            let user_id = user_id.ok_or(tgdash::Error::NoSession)?;
            let groups = GroupConfigClient::new(client.clone(), user_id);
            let managed = groups.managed_groups(Some(user_id)).await?;
            if managed.groups.is_empty() && managed.filtered_by_user {
                println!("You are not the owner of any groups where the bot is admin.");
            }
            for group in &managed.groups {
                let owner = if group.is_owner { " (owner)" } else { "" };
                println!("{group}{owner}: {} members, {} filters", group.member_count, group.filters_count);
            }
        }
        Cmd::Group { group, action } => {
            let user_id = user_id.ok_or(tgdash::Error::NoSession)?;
            let groups = GroupConfigClient::new(client.clone(), user_id);
            run_group(&groups, group, action, confirm, notifier).await?;
        }
    }

    Ok(())
}

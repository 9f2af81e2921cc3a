use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::json;

use crate::modules::error::{Error, Result};
use crate::modules::moderation::ModerationOutcome;
use crate::modules::notify::Confirm;
use crate::modules::session::Session;
use crate::modules::transport::{ApiClient, Transport};
use crate::modules::types::{ActionResponse, LinkRecord, SearchResponse};

pub const PAGE_SIZE: u32 = 20;

/// Query and position in the server-side result set. Pages are 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    pub query: String,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            query: String::new(),
            page: 0,
            page_size: PAGE_SIZE,
            total: 0,
        }
    }
}

impl SearchState {
    pub fn max_page(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let pages = self.total.div_ceil(u64::from(self.page_size));
        u32::try_from(pages - 1).unwrap_or(u32::MAX)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.max_page()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 0
    }

    pub fn pagination_visible(&self) -> bool {
        self.total > u64::from(self.page_size)
    }

    /// Records shown up to and including the current page.
    pub fn shown(&self) -> u64 {
        let through = (u64::from(self.page) + 1) * u64::from(self.page_size);
        through.min(self.total)
    }

    fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }
}

/// A server-confirmed change to the visible page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmedMutation {
    Removed { link: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    pub state: SearchState,
    pub links: Vec<LinkRecord>,
}

impl CatalogPage {
    pub fn apply(mut self, mutation: ConfirmedMutation) -> CatalogPage {
        match mutation {
            ConfirmedMutation::Removed { link } => {
                let before = self.links.len();
                self.links.retain(|record| record.link != link);
                if self.links.len() < before {
                    self.state.total = self.state.total.saturating_sub(1);
                }
            }
        }
        self
    }
}

/// Paged, searchable view of the link catalog.
pub struct LinkCatalog<T> {
    client: Arc<ApiClient<T>>,
    page: CatalogPage,
    user_id: Option<i64>,
}

impl<T: Transport> LinkCatalog<T> {
    pub fn new(client: Arc<ApiClient<T>>, user_id: Option<i64>) -> Self {
        Self {
            client,
            page: CatalogPage::default(),
            user_id,
        }
    }

    pub fn page(&self) -> &CatalogPage {
        &self.page
    }

    pub async fn search(&mut self, query: &str) -> Result<&CatalogPage> {
        self.open(query, 0).await
    }

    /// Loads `page` of the results for `query` in one request.
    pub async fn open(&mut self, query: &str, page: u32) -> Result<&CatalogPage> {
        let state = SearchState {
            query: query.trim().to_string(),
            page,
            ..self.page.state.clone()
        };
        self.load(state).await
    }

    pub async fn show_all(&mut self) -> Result<&CatalogPage> {
        self.search("").await
    }

    pub async fn goto(&mut self, page: u32) -> Result<&CatalogPage> {
        let state = SearchState {
            page,
            ..self.page.state.clone()
        };
        self.load(state).await
    }

    pub async fn next_page(&mut self) -> Result<&CatalogPage> {
        if !self.page.state.has_next() {
            return Ok(&self.page);
        }
        let next = self.page.state.page + 1;
        self.goto(next).await
    }

    pub async fn prev_page(&mut self) -> Result<&CatalogPage> {
        if !self.page.state.has_prev() {
            return Ok(&self.page);
        }
        let prev = self.page.state.page - 1;
        self.goto(prev).await
    }

    pub async fn reload(&mut self) -> Result<&CatalogPage> {
        self.load(self.page.state.clone()).await
    }

    /// Commits `state` only when the server returns a page for it.
    async fn load(&mut self, state: SearchState) -> Result<&CatalogPage> {
        let mut query = vec![
            ("limit", state.page_size.to_string()),
            ("offset", state.offset().to_string()),
        ];
        if !state.query.is_empty() {
            query.push(("q", state.query.to_lowercase()));
        }
        if let Some(user_id) = self.user_id {
            query.push(("user_id", user_id.to_string()));
        }

        let fetched = self
            .client
            .get_with_fallback::<SearchResponse>("/api/links/search", &query)
            .await?;
        debug!("Links fetched from {} (fallback: {})", fetched.url, fetched.used_fallback);
        let response = fetched.body;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        info!("Loaded {} links, total: {}", response.links.len(), response.total);
        self.page = CatalogPage {
            state: SearchState {
                total: response.total,
                ..state
            },
            links: response.links,
        };
        Ok(&self.page)
    }

    /// Reports a link as broken or abusive. Returns `None` when the operator
    /// declines, otherwise the server's message.
    pub async fn report(
        &mut self,
        session: Option<&Session>,
        link: &str,
        title: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<String>> {
        let session = session.ok_or(Error::NoSession)?;
        let prompt = format!(
            "Are you sure you want to report this link?\n\n\"{title}\"\n\nReported links will be hidden from all users and reviewed by admins."
        );
        if !confirm.confirm(&prompt) {
            return Ok(None);
        }

        let body = json!({"user_id": session.user_id, "link": link, "title": title});
        let response: ActionResponse = self.client.post_json("/api/links/report", &[], &body).await?;
        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to report link".to_string()),
            ));
        }

        self.remove_confirmed(link).await;
        Ok(Some(response.message.unwrap_or_else(|| {
            "Link reported successfully. Thank you for helping us maintain quality!".to_string()
        })))
    }

    /// Brings the page in line with a confirmed moderation action: a broken
    /// link leaves the page, an approval or a working verdict reloads it.
    pub async fn settle(&mut self, outcome: &ModerationOutcome) {
        if let Some(link) = &outcome.removed_link {
            self.remove_confirmed(link).await;
        }
        if outcome.refresh_catalog {
            if let Err(err) = self.reload().await {
                warn!("Catalog refresh after moderation failed: {err}");
            }
        }
    }

    /// Drops a server-confirmed removal and steps back when the page empties.
    /// The removal already happened, so a failed step-back reload is only logged.
    async fn remove_confirmed(&mut self, link: &str) {
        let page = std::mem::take(&mut self.page);
        self.page = page.apply(ConfirmedMutation::Removed {
            link: link.to_string(),
        });
        if self.page.links.is_empty() && self.page.state.has_prev() {
            let prev = self.page.state.page - 1;
            if let Err(err) = self.goto(prev).await {
                warn!("Failed to reload page {} after removing {link}: {err}", prev + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::modules::notify::Answer;
    use crate::modules::transport::testing::{ScriptedTransport, client};

    const BASE: &str = "https://api.example.org";

    fn links(n: usize) -> Value {
        let records: Vec<Value> = (0..n)
            .map(|i| json!({"link": format!("https://t.me/link{i}"), "title": format!("Link {i}")}))
            .collect();
        Value::Array(records)
    }

    fn catalog(transport: &Arc<ScriptedTransport>) -> LinkCatalog<Arc<ScriptedTransport>> {
        LinkCatalog::new(Arc::new(client(BASE, transport.clone())), Some(7))
    }

    fn user() -> Session {
        Session { user_id: 7, token_balance: 50, is_admin: false, is_premium: false }
    }

    #[test]
    fn pagination_bounds() {
        let state = SearchState { total: 47, ..SearchState::default() };
        assert_eq!(state.max_page(), 2);
        assert!(state.pagination_visible());
        assert!(!state.has_prev());
        assert_eq!(state.shown(), 20);

        let last = SearchState { page: 2, ..state.clone() };
        assert!(!last.has_next());
        assert_eq!(last.shown(), 47);

        let empty = SearchState::default();
        assert_eq!(empty.max_page(), 0);
        assert!(!empty.has_next());
        assert!(!empty.pagination_visible());
    }

    #[tokio::test]
    async fn search_sends_lowercase_query_and_paging() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            "GET",
            &format!("{BASE}/api/links/search"),
            Ok(json!({"success": true, "links": links(3), "total": 3})),
        );
        let mut catalog = catalog(&transport);

        let page = catalog.search("  Crypto ").await.unwrap();
        assert_eq!(page.links.len(), 3);
        assert_eq!(page.state.query, "Crypto");
        assert_eq!(page.state.shown(), 3);
        assert!(!page.state.pagination_visible());

        let url = transport.calls()[0].url.clone();
        assert_eq!(url.query(), Some("limit=20&offset=0&q=crypto&user_id=7"));
    }

    #[tokio::test]
    async fn paging_stops_at_the_edges() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            "GET",
            &format!("{BASE}/api/links/search"),
            Ok(json!({"success": true, "links": links(20), "total": 47})),
        );
        let mut catalog = catalog(&transport);
        catalog.show_all().await.unwrap();
        catalog.prev_page().await.unwrap();
        assert_eq!(transport.calls().len(), 1);

        catalog.next_page().await.unwrap();
        catalog.next_page().await.unwrap();
        assert_eq!(catalog.page().state.page, 2);
        catalog.next_page().await.unwrap();
        assert_eq!(catalog.page().state.page, 2);
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(transport.calls()[2].url.query(), Some("limit=20&offset=40&user_id=7"));
    }

    #[tokio::test]
    async fn unsuccessful_search_leaves_state_alone() {
        let transport = Arc::new(ScriptedTransport::default());
        let url = format!("{BASE}/api/links/search");
        transport.reply("GET", &url, Ok(json!({"success": true, "links": links(5), "total": 5})));
        transport.reply("GET", &url, Ok(json!({"success": false, "error": "Search unavailable"})));
        let mut catalog = catalog(&transport);
        catalog.show_all().await.unwrap();

        let err = catalog.search("memes").await.unwrap_err();
        assert_eq!(err.to_string(), "Search unavailable");
        assert_eq!(catalog.page().state.query, "");
        assert_eq!(catalog.page().links.len(), 5);
    }

    #[tokio::test]
    async fn search_falls_back_to_http() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            "GET",
            "http://api.example.org/api/links/search",
            Ok(json!({"success": true, "links": links(1), "total": 1})),
        );
        let api = Arc::new(client(BASE, transport.clone()));
        let mut catalog = LinkCatalog::new(api.clone(), None);

        catalog.show_all().await.unwrap();
        assert_eq!(api.base_url().scheme(), "http");
        assert_eq!(catalog.page().links.len(), 1);
    }

    #[test]
    fn removal_drops_exactly_one_record() {
        let page = CatalogPage {
            state: SearchState { total: 3, ..SearchState::default() },
            links: serde_json::from_value(links(3)).unwrap(),
        };
        let after = page.clone().apply(ConfirmedMutation::Removed { link: "https://t.me/link1".into() });
        assert_eq!(after.state.total, 2);
        assert_eq!(after.links.len(), 2);
        assert!(after.links.iter().all(|r| r.link != "https://t.me/link1"));

        let unknown = page.clone().apply(ConfirmedMutation::Removed { link: "https://t.me/nope".into() });
        assert_eq!(unknown, page);
    }

    #[tokio::test]
    async fn report_removes_link_after_confirmation() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            "GET",
            &format!("{BASE}/api/links/search"),
            Ok(json!({"success": true, "links": links(4), "total": 4})),
        );
        transport.reply("POST", &format!("{BASE}/api/links/report"), Ok(json!({"success": true})));
        let mut catalog = catalog(&transport);
        catalog.show_all().await.unwrap();
        let session = user();

        let declined = catalog
            .report(Some(&session), "https://t.me/link2", "Link 2", &Answer(false))
            .await
            .unwrap();
        assert!(declined.is_none());
        assert_eq!(transport.count("POST", "/api/links/report"), 0);

        let message = catalog
            .report(Some(&session), "https://t.me/link2", "Link 2", &Answer(true))
            .await
            .unwrap();
        assert!(message.unwrap().starts_with("Link reported successfully"));
        assert_eq!(catalog.page().state.total, 3);
        assert_eq!(catalog.page().links.len(), 3);
        let body = transport.calls().last().unwrap().body.clone().unwrap();
        assert_eq!(body, json!({"user_id": 7, "link": "https://t.me/link2", "title": "Link 2"}));
    }

    #[tokio::test]
    async fn report_requires_a_session() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut catalog = catalog(&transport);
        let err = catalog.report(None, "https://t.me/x", "X", &Answer(true)).await.unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    #[tokio::test]
    async fn emptied_page_steps_back() {
        let transport = Arc::new(ScriptedTransport::default());
        let search = format!("{BASE}/api/links/search");
        transport.reply("GET", &search, Ok(json!({"success": true, "links": links(20), "total": 21})));
        transport.reply(
            "GET",
            &search,
            Ok(json!({"success": true, "links": [{"link": "https://t.me/last", "title": "Last"}], "total": 21})),
        );
        transport.reply("GET", &search, Ok(json!({"success": true, "links": links(20), "total": 20})));
        transport.reply("POST", &format!("{BASE}/api/links/report"), Ok(json!({"success": true, "message": "Thanks"})));
        let mut catalog = catalog(&transport);
        catalog.show_all().await.unwrap();
        catalog.next_page().await.unwrap();
        assert_eq!(catalog.page().state.page, 1);

        let message = catalog
            .report(Some(&user()), "https://t.me/last", "Last", &Answer(true))
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("Thanks"));
        assert_eq!(catalog.page().state.page, 0);
        assert_eq!(catalog.page().state.total, 20);
        assert_eq!(transport.calls().last().unwrap().url.query(), Some("limit=20&offset=0&user_id=7"));
    }

    #[tokio::test]
    async fn open_loads_a_page_in_one_request() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            "GET",
            &format!("{BASE}/api/links/search"),
            Ok(json!({"success": true, "links": links(7), "total": 47})),
        );
        let mut catalog = catalog(&transport);

        let page = catalog.open("Rust", 2).await.unwrap();
        assert_eq!(page.state.page, 2);
        assert_eq!(page.state.shown(), 47);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(transport.calls()[0].url.query(), Some("limit=20&offset=40&q=rust&user_id=7"));
    }

    #[tokio::test]
    async fn failed_step_back_still_returns_report_message() {
        let transport = Arc::new(ScriptedTransport::default());
        let search = format!("{BASE}/api/links/search");
        transport.reply(
            "GET",
            &search,
            Ok(json!({"success": true, "links": [{"link": "https://t.me/last", "title": "Last"}], "total": 21})),
        );
        transport.reply("GET", &search, Ok(json!({"success": false, "error": "busy"})));
        transport.reply("POST", &format!("{BASE}/api/links/report"), Ok(json!({"success": true, "message": "Thanks"})));
        let mut catalog = catalog(&transport);
        catalog.open("", 1).await.unwrap();

        let message = catalog
            .report(Some(&user()), "https://t.me/last", "Last", &Answer(true))
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("Thanks"));
        assert_eq!(transport.count("POST", "/api/links/report"), 1);
        assert!(catalog.page().links.is_empty());
        assert_eq!(catalog.page().state.total, 20);
    }

    #[tokio::test]
    async fn moderation_outcomes_update_the_page() {
        let transport = Arc::new(ScriptedTransport::default());
        let search = format!("{BASE}/api/links/search");
        transport.reply("GET", &search, Ok(json!({"success": true, "links": links(3), "total": 3})));
        transport.reply("GET", &search, Ok(json!({"success": true, "links": links(4), "total": 4})));
        let mut catalog = catalog(&transport);
        catalog.show_all().await.unwrap();

        let broken = ModerationOutcome {
            message: "Removed".into(),
            counter_delta: -1,
            refresh_catalog: false,
            removed_link: Some("https://t.me/link0".into()),
        };
        catalog.settle(&broken).await;
        assert_eq!(catalog.page().state.total, 2);
        assert_eq!(transport.calls().len(), 1);

        let approved = ModerationOutcome {
            message: "Approved".into(),
            counter_delta: 1,
            refresh_catalog: true,
            removed_link: None,
        };
        catalog.settle(&approved).await;
        assert_eq!(catalog.page().state.total, 4);
        assert_eq!(transport.calls().len(), 2);
    }
}

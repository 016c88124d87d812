#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use cardharvest_core::browser::{
    BrowserError, BrowserMetrics, BrowserResult, CapturedResponse, LinkCandidate, RawCardText,
    RetryPacer, SitePage, StorageState,
};
use cardharvest_core::config::{HarvestConfig, SelectorTriplet};

pub const BASE: &str = "https://quizlet.com";

pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

/// Defaults with every sleep that is not under test removed.
pub fn quiet_config() -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.pacing.delay_min_ms = 0;
    config.pacing.delay_max_ms = 0;
    config.pacing.settle_ms = 0;
    config.pacing.scroll_wait_ms = 0;
    config.pacing.max_scroll_rounds = 10;
    config.extractor.probe_timeout_ms = 0;
    config.auth.marker_timeout_ms = 0;
    config
}

pub fn pacer(config: &HarvestConfig) -> RetryPacer {
    RetryPacer::new(
        &config.pacing,
        &config.retry,
        Arc::new(Mutex::new(BrowserMetrics::default())),
    )
}

pub fn link(href: &str, text: &str, context: &str) -> LinkCandidate {
    LinkCandidate {
        href: href.into(),
        text: text.into(),
        context_text: context.into(),
    }
}

pub fn raw_card(term: &str, definition: &str) -> RawCardText {
    RawCardText {
        term: term.into(),
        definition: definition.into(),
        image_url: None,
    }
}

/// What one URL looks like once loaded.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub redirect_to: Option<String>,
    pub texts: Vec<String>,
    pub visible: Vec<String>,
    pub text_by_selector: HashMap<String, String>,
    pub labels: Vec<String>,
    pub links: HashMap<String, Vec<LinkCandidate>>,
    pub cards: HashMap<String, Vec<RawCardText>>,
    pub captured: Vec<Value>,
    pub initial_state: Option<Value>,
    pub heights: Vec<u64>,
    pub submit_to: Option<String>,
    pub goto_failures: usize,
    /// Without this cookie the page bounces to the login form.
    pub requires_cookie: Option<String>,
}

impl PageScript {
    pub fn text(mut self, text: &str) -> Self {
        self.texts.push(text.into());
        self
    }

    pub fn visible(mut self, selector: &str) -> Self {
        self.visible.push(selector.into());
        self
    }

    pub fn links(mut self, selector: &str, links: Vec<LinkCandidate>) -> Self {
        self.links.insert(selector.into(), links);
        self
    }

    pub fn cards(mut self, triplet: &SelectorTriplet, cards: Vec<RawCardText>) -> Self {
        self.cards.insert(triplet.container.clone(), cards);
        self
    }

    pub fn captured(mut self, body: Value) -> Self {
        self.captured.push(body);
        self
    }

    pub fn redirect(mut self, to: &str) -> Self {
        self.redirect_to = Some(to.into());
        self
    }

    pub fn requires_cookie(mut self, name: &str) -> Self {
        self.requires_cookie = Some(name.into());
        self
    }
}

#[derive(Default)]
struct State {
    current: String,
    pages: HashMap<String, PageScript>,
    calls: Vec<String>,
    bucket: Vec<CapturedResponse>,
    scrolls: usize,
    url_sequence: VecDeque<String>,
    state: StorageState,
}

/// Scripted stand-in for a browser tab. Every call is recorded.
#[derive(Default)]
pub struct ScriptedPage {
    state: RefCell<State>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        let page = Self::default();
        page.state.borrow_mut().current = "about:blank".into();
        page
    }

    pub fn with_page(self, url: &str, script: PageScript) -> Self {
        self.state.borrow_mut().pages.insert(url.into(), script);
        self
    }

    /// Successive `current_url` answers, used once the page has been loaded.
    pub fn with_url_sequence(self, urls: &[&str]) -> Self {
        self.state
            .borrow_mut()
            .url_sequence
            .extend(urls.iter().map(|u| u.to_string()));
        self
    }

    pub fn with_storage(self, storage: StorageState) -> Self {
        self.state.borrow_mut().state = storage;
        self
    }

    pub fn set_current(&self, url: &str) {
        self.state.borrow_mut().current = url.into();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.borrow_mut().calls.push(call.into());
    }

    fn script(&self) -> PageScript {
        let state = self.state.borrow();
        state.pages.get(&state.current).cloned().unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl SitePage for ScriptedPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.record(format!("goto {url}"));
        let mut state = self.state.borrow_mut();
        if let Some(script) = state.pages.get_mut(url) {
            if script.goto_failures > 0 {
                script.goto_failures -= 1;
                return Err(BrowserError::Timeout(format!("navigation to {url}")));
            }
        }
        let script = state.pages.get(url).cloned().unwrap_or_default();
        let signed_out = script
            .requires_cookie
            .as_ref()
            .is_some_and(|name| !state.state.cookies.iter().any(|c| &c.name == name));
        state.current = if signed_out {
            format!("{BASE}/login")
        } else {
            script.redirect_to.clone().unwrap_or_else(|| url.to_string())
        };
        state.bucket = script
            .captured
            .iter()
            .map(|body| CapturedResponse {
                url: format!("{BASE}/webapi/3.4/studiable-item-documents"),
                status: 200,
                body: body.clone(),
                pending: false,
            })
            .collect();
        state.scrolls = 0;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let mut state = self.state.borrow_mut();
        if let Some(next) = state.url_sequence.pop_front() {
            state.current = next;
        }
        Ok(state.current.clone())
    }

    async fn is_visible(&self, selector: &str, _timeout: Duration) -> bool {
        self.record(format!("is_visible {selector}"));
        let script = self.script();
        selector
            .split(", ")
            .any(|part| script.visible.iter().any(|v| v == part))
    }

    async fn has_text(&self, text: &str, _timeout: Duration) -> bool {
        self.script().texts.iter().any(|t| t.trim() == text.trim())
    }

    async fn click_first(&self, selectors: &[String]) -> BrowserResult<bool> {
        self.record("click_first");
        let script = self.script();
        Ok(selectors.iter().any(|s| script.visible.contains(s)))
    }

    async fn click_text(&self, labels: &[String]) -> BrowserResult<bool> {
        self.record("click_text");
        let script = self.script();
        Ok(labels.iter().any(|l| script.labels.contains(l)))
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        self.record(format!("fill {selector}={value}"));
        Ok(())
    }

    async fn press_submit(&self, selector: &str) -> BrowserResult<()> {
        self.record(format!("submit {selector}"));
        if let Some(next) = self.script().submit_to {
            self.state.borrow_mut().current = next;
        }
        Ok(())
    }

    async fn first_text(&self, selectors: &[String]) -> Option<String> {
        self.record("first_text");
        let script = self.script();
        selectors
            .iter()
            .find_map(|s| script.text_by_selector.get(s).cloned())
    }

    async fn scroll_height(&self) -> BrowserResult<u64> {
        let script = self.script();
        let scrolls = self.state.borrow().scrolls;
        Ok(match script.heights.as_slice() {
            [] => 1_000,
            heights => heights[scrolls.min(heights.len() - 1)],
        })
    }

    async fn scroll_to_bottom(&self) -> BrowserResult<()> {
        self.record("scroll");
        self.state.borrow_mut().scrolls += 1;
        Ok(())
    }

    async fn extract_links(&self, selector: &str) -> BrowserResult<Vec<LinkCandidate>> {
        self.record(format!("extract_links {selector}"));
        Ok(self.script().links.get(selector).cloned().unwrap_or_default())
    }

    async fn extract_cards(&self, triplet: &SelectorTriplet) -> BrowserResult<Vec<RawCardText>> {
        self.record(format!("extract_cards {}", triplet.container));
        Ok(self
            .script()
            .cards
            .get(&triplet.container)
            .cloned()
            .unwrap_or_default())
    }

    async fn evaluate_json(&self, _script: &str) -> BrowserResult<Option<Value>> {
        self.record("evaluate_json");
        Ok(self.script().initial_state)
    }

    async fn start_capture(&self) -> BrowserResult<()> {
        self.record("start_capture");
        self.state.borrow_mut().bucket.clear();
        Ok(())
    }

    async fn finish_capture(&self) -> Vec<CapturedResponse> {
        self.record("finish_capture");
        self.state.borrow().bucket.clone()
    }

    async fn export_state(&self) -> BrowserResult<StorageState> {
        Ok(self.state.borrow().state.clone())
    }

    async fn import_state(&self, state: &StorageState) -> BrowserResult<()> {
        self.record(format!("import_state {}", state.cookies.len()));
        self.state.borrow_mut().state = state.clone();
        Ok(())
    }
}

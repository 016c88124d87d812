use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::browser::{
    note_failure, BrowserMetrics, CapturedResponse, FailureRecord, RemediationAction, RetryClass,
    RetryPacer, SitePage,
};
use crate::config::{ExtractorSection, HarvestConfig};

use super::discovery::scroll_until_stable;
use super::model::{Card, CardSet, ExtractionStrategy};
use super::payload::{is_flashcard_payload, parse_payload, PayloadSet};
use super::set_id::extract_set_id;
use super::{ScrapeError, ScrapeResult};

const UNKNOWN_SET_ID: &str = "unknown";
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Turns one set URL into a complete `CardSet`.
///
/// Captured API data is preferred; the rendered DOM and then the page's
/// embedded initial state are only consulted when nothing was captured.
#[derive(Debug, Clone)]
pub struct SetExtractor {
    config: ExtractorSection,
    login_path: String,
    pacer: RetryPacer,
    scroll_wait: Duration,
    max_scroll_rounds: usize,
}

impl SetExtractor {
    pub fn new(config: &HarvestConfig, pacer: RetryPacer) -> Self {
        Self {
            config: config.extractor.clone(),
            login_path: config.site.login_path.clone(),
            pacer,
            scroll_wait: Duration::from_millis(config.pacing.scroll_wait_ms),
            max_scroll_rounds: config.pacing.max_scroll_rounds,
        }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.probe_timeout_ms)
    }

    pub async fn scrape_set<P>(&self, page: &P, url: &str) -> ScrapeResult<CardSet>
    where
        P: SitePage + ?Sized,
    {
        let set_id = extract_set_id(url).unwrap_or_else(|| UNKNOWN_SET_ID.to_string());
        info!(url, set_id = %set_id, "scraping set");

        let outcome = self
            .pacer
            .run(url, |attempt| async move {
                // the capture mailbox belongs to this attempt only
                page.start_capture().await?;
                trace!(url, attempt, "loading set page");
                page.goto(url).await?;
                self.pacer.pace().await;
                self.check_for_errors(page, url).await
            })
            .await?;
        debug!(url, attempts = outcome.attempts, "set page loaded");

        let set = match self.captured_payload(page).await {
            Some(payload) => {
                info!(url, "using captured api data");
                self.record(|metrics| metrics.record_api_capture());
                let parsed = parse_payload(&payload);
                from_payload(set_id, url, parsed, ExtractionStrategy::Api)
            }
            None => {
                info!(url, "no api data captured, reading the page");
                self.record(|metrics| metrics.record_dom_fallback());
                self.scrape_from_dom(page, set_id, url).await?
            }
        };

        info!(
            url,
            set_id = %set.id,
            cards = set.term_count(),
            strategy = ?set.strategy,
            "set scraped"
        );
        let cards = set.term_count();
        self.record(|metrics| metrics.record_set(cards));
        Ok(set)
    }

    /// Scrapes every URL in order. A failing set is logged and left out.
    pub async fn scrape_sets<P>(&self, page: &P, urls: &[String]) -> Vec<CardSet>
    where
        P: SitePage + ?Sized,
    {
        self.scrape_each(page, urls, |_| {}).await
    }

    /// Like `scrape_sets`, handing each set to `on_set` as soon as it is ready.
    pub async fn scrape_each<P, F>(&self, page: &P, urls: &[String], mut on_set: F) -> Vec<CardSet>
    where
        P: SitePage + ?Sized,
        F: FnMut(&CardSet),
    {
        let total = urls.len();
        let mut sets = Vec::with_capacity(total);
        for (index, url) in urls.iter().enumerate() {
            info!(url = %url, "scraping set {}/{}", index + 1, total);
            match self.scrape_set(page, url).await {
                Ok(set) => {
                    on_set(&set);
                    sets.push(set);
                }
                Err(err) => {
                    error!(url = %url, error = %err, "failed to scrape set");
                    self.note_skipped(url, &err);
                }
            }
        }
        info!(scraped = sets.len(), requested = total, "batch finished");
        sets
    }

    /// Short-circuits on pages that can never yield cards.
    pub async fn check_for_errors<P>(&self, page: &P, requested: &str) -> ScrapeResult<()>
    where
        P: SitePage + ?Sized,
    {
        let current = page.current_url().await?;
        let path = Url::parse(&current)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| current.clone());

        if path.contains("/404") || self.any_text(page, &self.config.not_found_markers).await {
            return Err(ScrapeError::SetNotFound {
                url: requested.to_string(),
            });
        }
        if path.starts_with(&self.login_path) {
            return Err(ScrapeError::AccessDenied {
                url: requested.to_string(),
                reason: "authentication required".into(),
            });
        }
        if self.any_text(page, &self.config.private_markers).await {
            return Err(ScrapeError::AccessDenied {
                url: requested.to_string(),
                reason: "set is private".into(),
            });
        }
        if self.any_text(page, &self.config.rate_limit_markers).await {
            return Err(ScrapeError::RateLimited {
                url: requested.to_string(),
            });
        }
        Ok(())
    }

    async fn any_text<P>(&self, page: &P, markers: &[String]) -> bool
    where
        P: SitePage + ?Sized,
    {
        for marker in markers {
            if page.has_text(marker, self.probe_timeout()).await {
                debug!(marker = %marker, "page marker present");
                return true;
            }
        }
        false
    }

    /// Latest qualifying response wins. Bodies still being read get until
    /// the probe timeout to arrive.
    async fn captured_payload<P>(&self, page: &P) -> Option<Value>
    where
        P: SitePage + ?Sized,
    {
        if !self.config.prefer_api {
            return None;
        }
        let deadline = Instant::now() + self.probe_timeout();
        let mut captured = page.finish_capture().await;
        while captured.iter().any(|response| response.pending) && Instant::now() < deadline {
            sleep(CAPTURE_POLL).await;
            captured = page.finish_capture().await;
        }
        trace!(responses = captured.len(), "captured responses");
        latest_flashcard_payload(captured).map(|response| {
            debug!(url = %response.url, status = response.status, "flashcard payload captured");
            response.body
        })
    }

    async fn scrape_from_dom<P>(&self, page: &P, set_id: String, url: &str) -> ScrapeResult<CardSet>
    where
        P: SitePage + ?Sized,
    {
        let title = page.first_text(&self.config.title_selectors).await;

        match page.click_text(&self.config.expand_buttons).await {
            Ok(true) => {
                debug!("expanded term list");
                self.pacer.pace().await;
            }
            Ok(false) => {}
            Err(err) => trace!(error = %err, "expand click failed"),
        }
        scroll_until_stable(page, self.scroll_wait, self.max_scroll_rounds).await?;

        let mut set = CardSet::empty(set_id, url);
        if let Some(title) = title {
            set.title = title;
        }

        for triplet in &self.config.triplets {
            let raw = match page.extract_cards(triplet).await {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(container = %triplet.container, error = %err, "selector triplet failed");
                    continue;
                }
            };
            let cards: Vec<Card> = raw
                .into_iter()
                .filter_map(|raw| {
                    Card::new(&raw.term, &raw.definition).map(|card| card.with_image(raw.image_url))
                })
                .collect();
            if !cards.is_empty() {
                debug!(container = %triplet.container, cards = cards.len(), "selector triplet matched");
                set.cards = cards;
                set.strategy = ExtractionStrategy::Dom;
                return Ok(set);
            }
        }

        match page.evaluate_json(&self.config.initial_state_script).await {
            Ok(Some(state)) => {
                let parsed = parse_payload(&state);
                if !parsed.cards.is_empty() {
                    self.record(|metrics| metrics.record_script_fallback());
                    set.cards = parsed.cards;
                    set.strategy = ExtractionStrategy::InitialState;
                    if set.description.is_none() {
                        set.description = parsed.description;
                    }
                    if set.created_by.is_none() {
                        set.created_by = parsed.created_by;
                    }
                }
            }
            Ok(None) => debug!("no embedded initial state"),
            Err(err) => debug!(error = %err, "initial state script failed"),
        }

        if set.is_empty() {
            warn!(url, "no cards found on page");
        }
        Ok(set)
    }

    fn note_skipped(&self, url: &str, err: &ScrapeError) {
        self.record(|metrics| metrics.record_set_failure());
        note_failure(
            self.pacer.telemetry(),
            FailureRecord::new(
                url,
                err.failure_category(),
                err.to_string(),
                0,
                RemediationAction::Skipped,
            ),
        );
    }

    fn record<F>(&self, update: F)
    where
        F: FnOnce(&mut BrowserMetrics),
    {
        if let Ok(mut metrics) = self.pacer.metrics().lock() {
            update(&mut metrics);
        }
    }
}

/// The most recently arrived response carrying flashcard data. Responses whose
/// body never finished reading are passed over.
fn latest_flashcard_payload(captured: Vec<CapturedResponse>) -> Option<CapturedResponse> {
    captured
        .into_iter()
        .rev()
        .filter(|response| !response.pending)
        .find(|response| is_flashcard_payload(&response.body))
}

fn from_payload(
    set_id: String,
    url: &str,
    parsed: PayloadSet,
    strategy: ExtractionStrategy,
) -> CardSet {
    let mut set = CardSet::empty(set_id, url);
    if let Some(title) = parsed.title {
        set.title = title;
    }
    set.description = parsed.description;
    set.created_by = parsed.created_by;
    set.cards = parsed.cards;
    set.strategy = strategy;
    set
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub pages_opened: u64,
    pub navigations: u64,
    pub navigation_failures: u64,
    pub retries: u64,
    pub api_captures: u64,
    pub dom_fallbacks: u64,
    pub script_fallbacks: u64,
    pub sets_scraped: u64,
    pub sets_failed: u64,
    pub cards_extracted: u64,
}

impl BrowserMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_navigation(&mut self, success: bool) {
        self.navigations = self.navigations.saturating_add(1);
        if !success {
            self.navigation_failures = self.navigation_failures.saturating_add(1);
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub fn record_api_capture(&mut self) {
        self.api_captures = self.api_captures.saturating_add(1);
    }

    pub fn record_dom_fallback(&mut self) {
        self.dom_fallbacks = self.dom_fallbacks.saturating_add(1);
    }

    pub fn record_script_fallback(&mut self) {
        self.script_fallbacks = self.script_fallbacks.saturating_add(1);
    }

    pub fn record_set(&mut self, cards: usize) {
        self.sets_scraped = self.sets_scraped.saturating_add(1);
        self.cards_extracted = self.cards_extracted.saturating_add(cards as u64);
    }

    pub fn record_set_failure(&mut self) {
        self.sets_failed = self.sets_failed.saturating_add(1);
    }

    pub fn navigation_success_rate(&self) -> f64 {
        if self.navigations == 0 {
            0.0
        } else {
            let ok = self.navigations - self.navigation_failures;
            (ok as f64 / self.navigations as f64) * 100.0
        }
    }
}

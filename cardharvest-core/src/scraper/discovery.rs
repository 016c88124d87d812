use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::browser::{BrowserResult, LinkCandidate, RetryPacer, SitePage};
use crate::config::{DiscoverySection, HarvestConfig};

use super::model::SetReference;
use super::set_id::extract_set_id;

const UNTITLED: &str = "Untitled Set";

static TERM_COUNT: OnceLock<Regex> = OnceLock::new();

/// Best-effort "50 terms" style count; 0 when nothing matches.
pub fn term_count_from_text(text: &str) -> u32 {
    let pattern = TERM_COUNT.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(?:terms?|thuật ngữ|cards?|thẻ)").expect("valid regex")
    });
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Keeps the first reference seen for every id, preserving order.
pub fn dedup_references<I>(references: I) -> Vec<SetReference>
where
    I: IntoIterator<Item = SetReference>,
{
    let mut seen = HashSet::new();
    references
        .into_iter()
        .filter(|reference| seen.insert(reference.id.clone()))
        .collect()
}

/// Scrolls until the page height stops growing between two cycles.
pub(crate) async fn scroll_until_stable<P>(
    page: &P,
    wait: Duration,
    max_rounds: usize,
) -> BrowserResult<usize>
where
    P: SitePage + ?Sized,
{
    let mut last_height = page.scroll_height().await?;
    for round in 1..=max_rounds {
        page.scroll_to_bottom().await?;
        if !wait.is_zero() {
            sleep(wait).await;
        }
        let height = page.scroll_height().await?;
        trace!(round, height, "scrolled");
        if height == last_height {
            return Ok(round);
        }
        last_height = height;
    }
    debug!(max_rounds, "scroll round limit reached");
    Ok(max_rounds)
}

/// Enumerates set references reachable from the account, without card content.
#[derive(Debug, Clone)]
pub struct DiscoveryCrawler {
    config: DiscoverySection,
    base: Url,
    library_url: String,
    pacer: RetryPacer,
    scroll_wait: Duration,
    max_scroll_rounds: usize,
}

impl DiscoveryCrawler {
    pub fn new(config: &HarvestConfig, pacer: RetryPacer) -> Result<Self, url::ParseError> {
        let base = Url::parse(&config.site.base_url)?;
        Ok(Self {
            config: config.discovery.clone(),
            library_url: config.site_url(&config.site.library_path),
            base,
            pacer,
            scroll_wait: Duration::from_millis(config.pacing.scroll_wait_ms),
            max_scroll_rounds: config.pacing.max_scroll_rounds,
        })
    }

    pub async fn get_user_sets<P>(&self, page: &P) -> BrowserResult<Vec<SetReference>>
    where
        P: SitePage + ?Sized,
    {
        info!(url = %self.library_url, "fetching library sets");
        self.pacer.navigate(page, &self.library_url).await?;
        scroll_until_stable(page, self.scroll_wait, self.max_scroll_rounds).await?;
        let sets = self.extract_references(page).await;
        info!(count = sets.len(), "sets found in library");
        Ok(sets)
    }

    /// Sets reachable through groups; a failing group is logged and skipped.
    pub async fn get_shared_sets<P>(&self, page: &P) -> BrowserResult<Vec<SetReference>>
    where
        P: SitePage + ?Sized,
    {
        let groups = self.discover_group_urls(page).await?;
        let mut all = Vec::new();
        for group_url in groups {
            match self.get_class_sets(page, &group_url).await {
                Ok(mut sets) => all.append(&mut sets),
                Err(err) => warn!(url = %group_url, error = %err, "skipping group"),
            }
        }
        Ok(all)
    }

    pub async fn get_class_sets<P>(&self, page: &P, url: &str) -> BrowserResult<Vec<SetReference>>
    where
        P: SitePage + ?Sized,
    {
        info!(url, "fetching class sets");
        self.pacer.navigate(page, url).await?;
        match page.click_text(&self.config.sets_tab_labels).await {
            Ok(true) => self.pacer.pace().await,
            Ok(false) => {}
            Err(err) => trace!(error = %err, "sets tab click failed"),
        }
        scroll_until_stable(page, self.scroll_wait, self.max_scroll_rounds).await?;
        let sets = self.extract_references(page).await;
        info!(url, count = sets.len(), "sets found in class");
        Ok(sets)
    }

    pub async fn get_folder_sets<P>(&self, page: &P, url: &str) -> BrowserResult<Vec<SetReference>>
    where
        P: SitePage + ?Sized,
    {
        info!(url, "fetching folder sets");
        self.pacer.navigate(page, url).await?;
        scroll_until_stable(page, self.scroll_wait, self.max_scroll_rounds).await?;
        let sets = self.extract_references(page).await;
        info!(url, count = sets.len(), "sets found in folder");
        Ok(sets)
    }

    /// Own sets followed by shared ones, deduplicated by id.
    pub async fn discover_all<P>(&self, page: &P) -> BrowserResult<Vec<SetReference>>
    where
        P: SitePage + ?Sized,
    {
        let own = self.get_user_sets(page).await?;
        let shared = match self.get_shared_sets(page).await {
            Ok(shared) => shared,
            Err(err) => {
                warn!(error = %err, "shared set discovery failed");
                Vec::new()
            }
        };
        let merged = dedup_references(own.into_iter().chain(shared));
        info!(count = merged.len(), "discovery finished");
        Ok(merged)
    }

    async fn discover_group_urls<P>(&self, page: &P) -> BrowserResult<Vec<String>>
    where
        P: SitePage + ?Sized,
    {
        self.pacer.navigate(page, &self.library_url).await?;
        let mut seen = HashSet::new();
        let mut groups = Vec::new();
        for selector in &self.config.group_link_selectors {
            let links = match page.extract_links(selector).await {
                Ok(links) => links,
                Err(err) => {
                    debug!(selector = %selector, error = %err, "group selector failed");
                    continue;
                }
            };
            for link in links {
                if !link.href.contains(&self.config.group_path_marker) {
                    continue;
                }
                if let Some(url) = self.absolute(&link.href) {
                    if seen.insert(url.clone()) {
                        groups.push(url);
                    }
                }
            }
        }
        info!(count = groups.len(), "groups found");
        Ok(groups)
    }

    /// The first selector that yields any link decides the page's references.
    async fn extract_references<P>(&self, page: &P) -> Vec<SetReference>
    where
        P: SitePage + ?Sized,
    {
        for selector in &self.config.set_link_selectors {
            let links = match page.extract_links(selector).await {
                Ok(links) => links,
                Err(err) => {
                    debug!(selector = %selector, error = %err, "set selector failed");
                    continue;
                }
            };
            if links.is_empty() {
                continue;
            }
            trace!(selector = %selector, links = links.len(), "set selector matched");
            return self.references_from_links(links);
        }
        Vec::new()
    }

    fn references_from_links(&self, links: Vec<LinkCandidate>) -> Vec<SetReference> {
        let mut seen_urls = HashSet::new();
        let mut references = Vec::new();
        for link in links {
            let Some(url) = self.absolute(&link.href) else {
                continue;
            };
            if !seen_urls.insert(url.clone()) {
                continue;
            }
            let Some(id) = extract_set_id(&url) else {
                trace!(url = %url, "link without set id");
                continue;
            };
            let title = link.text.trim();
            references.push(SetReference {
                id,
                title: if title.is_empty() {
                    UNTITLED.to_string()
                } else {
                    title.to_string()
                },
                approx_term_count: term_count_from_text(&link.context_text),
                url,
            });
        }
        references
    }

    fn absolute(&self, href: &str) -> Option<String> {
        self.base.join(href).ok().map(String::from)
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::page::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::config::SelectorTriplet;

use super::error::{BrowserError, BrowserResult};
use super::human::HumanCadence;
use super::metrics::BrowserMetrics;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);
const CAPTURE_BUCKET: &str = "__cardharvestCaptured";
const TARGET_MARKER: &str = "data-cardharvest-target";

/// A JSON network response observed while a page was loading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub body: Value,
    /// The response has arrived but its body is still being read.
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCandidate {
    pub href: String,
    #[serde(default)]
    pub text: String,
    /// Text of the surrounding card, where term counts usually live.
    #[serde(default)]
    pub context_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCardText {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// Serialized authentication material of one browsing context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

/// Everything the authenticator, crawler and extractor need from a live page.
///
/// Visibility probes never fail: an error or a timeout both mean "absent".
#[async_trait(?Send)]
pub trait SitePage {
    async fn goto(&self, url: &str) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;
    async fn is_visible(&self, selector: &str, timeout: Duration) -> bool;
    /// True when some element's whole text, whitespace-collapsed, equals `text`.
    async fn has_text(&self, text: &str, timeout: Duration) -> bool;
    /// Clicks the first visible element matching any selector, in order.
    async fn click_first(&self, selectors: &[String]) -> BrowserResult<bool>;
    /// Clicks the first visible button, link or tab whose label contains any of `labels`.
    async fn click_text(&self, labels: &[String]) -> BrowserResult<bool>;
    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()>;
    async fn press_submit(&self, selector: &str) -> BrowserResult<()>;
    async fn first_text(&self, selectors: &[String]) -> Option<String>;
    async fn scroll_height(&self) -> BrowserResult<u64>;
    async fn scroll_to_bottom(&self) -> BrowserResult<()>;
    async fn extract_links(&self, selector: &str) -> BrowserResult<Vec<LinkCandidate>>;
    async fn extract_cards(&self, triplet: &SelectorTriplet) -> BrowserResult<Vec<RawCardText>>;
    async fn evaluate_json(&self, script: &str) -> BrowserResult<Option<Value>>;
    /// Empties the response bucket of the current document.
    async fn start_capture(&self) -> BrowserResult<()>;
    /// Responses captured since the last navigation, in arrival order.
    async fn finish_capture(&self) -> Vec<CapturedResponse>;
    async fn export_state(&self) -> BrowserResult<StorageState>;
    async fn import_state(&self, state: &StorageState) -> BrowserResult<()>;
}

/// `SitePage` over a live Chromium tab.
#[derive(Debug)]
pub struct ChromiumPage {
    page: Page,
    human: Mutex<HumanCadence>,
    metrics: Arc<Mutex<BrowserMetrics>>,
    settle: Duration,
}

impl ChromiumPage {
    pub(crate) fn new(
        page: Page,
        human: HumanCadence,
        metrics: Arc<Mutex<BrowserMetrics>>,
        settle: Duration,
    ) -> Self {
        Self {
            page,
            human: Mutex::new(human),
            metrics,
            settle,
        }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    /// Installs the fetch/XHR hook that feeds `finish_capture`.
    pub(crate) async fn install_capture_hook(&self, url_hints: &[String]) -> BrowserResult<()> {
        let hints = serde_json::to_string(url_hints)
            .map_err(|err| BrowserError::Configuration(err.to_string()))?;
        let source = capture_hook_script(&hints);
        self.page
            .evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(source)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value()
            .map_err(|err| BrowserError::Script(format!("failed to decode script result: {err}")))
    }

    async fn probe(&self, script: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.eval::<bool>(script).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => trace!(error = %err, "visibility probe failed"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(PROBE_INTERVAL).await;
        }
    }

    fn typing_delay(&self) -> Duration {
        match self.human.lock() {
            Ok(mut human) => human.typing_delay(),
            Err(poisoned) => poisoned.into_inner().typing_delay(),
        }
    }

    fn click_hesitation(&self) -> Duration {
        match self.human.lock() {
            Ok(mut human) => human.click_hesitation(),
            Err(poisoned) => poisoned.into_inner().click_hesitation(),
        }
    }

    async fn click_marked(&self) -> BrowserResult<()> {
        let selector = format!("[{TARGET_MARKER}]");
        let element = self.page.find_element(selector.as_str()).await?;
        sleep(self.click_hesitation()).await;
        element.click().await?;
        self.eval::<Value>(&format!(
            "document.querySelectorAll('[{TARGET_MARKER}]').forEach(n => n.removeAttribute('{TARGET_MARKER}')); null"
        ))
        .await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl SitePage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let outcome = async {
            self.page.goto(params).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, BrowserError>(())
        }
        .await;
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_navigation(outcome.is_ok());
        }
        outcome?;
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        debug!(url, "page loaded");
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self
            .page
            .url()
            .await?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn is_visible(&self, selector: &str, timeout: Duration) -> bool {
        let Ok(selector) = serde_json::to_string(selector) else {
            return false;
        };
        let script = format!(
            "(() => {{ try {{ return Array.from(document.querySelectorAll({selector})).some(n => {{ const r = n.getBoundingClientRect(); const s = window.getComputedStyle(n); return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }}); }} catch (_) {{ return false; }} }})()"
        );
        self.probe(&script, timeout).await
    }

    async fn has_text(&self, text: &str, timeout: Duration) -> bool {
        let Ok(text) = serde_json::to_string(text) else {
            return false;
        };
        // whole-text match on a single element, never a substring of the page
        let script = format!(
            "(() => {{
    const norm = (s) => (s || '').replace(/\\s+/g, ' ').trim();
    const wanted = norm({text});
    if (norm(document.title) === wanted) return true;
    if (!document.body) return false;
    return Array.from(document.body.querySelectorAll('*')).some(n => norm(n.textContent) === wanted);
}})()"
        );
        self.probe(&script, timeout).await
    }

    async fn click_first(&self, selectors: &[String]) -> BrowserResult<bool> {
        let selectors = serde_json::to_string(selectors)
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        let script = format!(
            "(() => {{
    for (const sel of {selectors}) {{
        let nodes = [];
        try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
        const node = nodes.find(n => {{ const r = n.getBoundingClientRect(); return r.width > 0 && r.height > 0; }});
        if (node) {{
            node.setAttribute('{TARGET_MARKER}', '1');
            return true;
        }}
    }}
    return false;
}})()"
        );
        if !self.eval::<bool>(&script).await? {
            return Ok(false);
        }
        self.click_marked().await?;
        Ok(true)
    }

    async fn click_text(&self, labels: &[String]) -> BrowserResult<bool> {
        let labels = serde_json::to_string(labels)
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        let script = format!(
            "(() => {{
    const wanted = {labels}.map(l => l.toLowerCase());
    const nodes = document.querySelectorAll('button, a, [role=\"tab\"], [role=\"button\"]');
    for (const node of nodes) {{
        const text = (node.innerText || node.textContent || '').trim().toLowerCase();
        if (!text) continue;
        const r = node.getBoundingClientRect();
        if (r.width === 0 || r.height === 0) continue;
        if (wanted.some(label => text.includes(label))) {{
            node.setAttribute('{TARGET_MARKER}', '1');
            return true;
        }}
    }}
    return false;
}})()"
        );
        if !self.eval::<bool>(&script).await? {
            return Ok(false);
        }
        self.click_marked().await?;
        Ok(true)
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        let element = self.page.find_element(selector).await?;
        sleep(self.click_hesitation()).await;
        element.click().await?;
        for ch in value.chars() {
            element.type_str(ch.to_string()).await?;
            sleep(self.typing_delay()).await;
        }
        Ok(())
    }

    async fn press_submit(&self, selector: &str) -> BrowserResult<()> {
        let element = self.page.find_element(selector).await?;
        sleep(self.click_hesitation()).await;
        element.click().await?;
        Ok(())
    }

    async fn first_text(&self, selectors: &[String]) -> Option<String> {
        let selectors = serde_json::to_string(selectors).ok()?;
        let script = format!(
            "(() => {{
    for (const sel of {selectors}) {{
        let node = null;
        try {{ node = document.querySelector(sel); }} catch (_) {{ continue; }}
        const text = node ? (node.innerText || node.textContent || '').trim() : '';
        if (text) return text;
    }}
    return null;
}})()"
        );
        self.eval::<Option<String>>(&script).await.ok().flatten()
    }

    async fn scroll_height(&self) -> BrowserResult<u64> {
        self.eval::<u64>("document.body ? document.body.scrollHeight : 0")
            .await
    }

    async fn scroll_to_bottom(&self) -> BrowserResult<()> {
        self.eval::<Value>("window.scrollTo(0, document.body.scrollHeight); null")
            .await?;
        Ok(())
    }

    async fn extract_links(&self, selector: &str) -> BrowserResult<Vec<LinkCandidate>> {
        let selector = serde_json::to_string(selector)
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        let script = format!(
            "(() => {{
    const out = [];
    let nodes = [];
    try {{ nodes = Array.from(document.querySelectorAll({selector})); }} catch (_) {{ return out; }}
    for (const node of nodes) {{
        const href = node.href || node.getAttribute('href') || '';
        if (!href) continue;
        let holder = node;
        for (let i = 0; i < 3 && holder.parentElement; i++) holder = holder.parentElement;
        out.push({{
            href,
            text: (node.innerText || node.getAttribute('aria-label') || node.getAttribute('title') || '').trim(),
            contextText: (holder.innerText || '').trim(),
        }});
    }}
    return out;
}})()"
        );
        self.eval(&script).await
    }

    async fn extract_cards(&self, triplet: &SelectorTriplet) -> BrowserResult<Vec<RawCardText>> {
        let encode = |value: &str| {
            serde_json::to_string(value).map_err(|err| BrowserError::Script(err.to_string()))
        };
        let container = encode(&triplet.container)?;
        let term = encode(&triplet.term)?;
        let definition = encode(&triplet.definition)?;
        let script = format!(
            "(() => {{
    const read = (root, sel) => {{
        const node = root.querySelector(sel);
        return node ? (node.innerText || node.textContent || '').trim() : '';
    }};
    let nodes = [];
    try {{ nodes = Array.from(document.querySelectorAll({container})); }} catch (_) {{ return []; }}
    return nodes.map(node => {{
        const img = node.querySelector('img');
        return {{
            term: read(node, {term}),
            definition: read(node, {definition}),
            imageUrl: img ? img.getAttribute('src') : null,
        }};
    }});
}})()"
        );
        self.eval(&script).await
    }

    async fn evaluate_json(&self, script: &str) -> BrowserResult<Option<Value>> {
        let value: Value = self.eval(script).await?;
        match value {
            Value::Null => Ok(None),
            Value::String(text) => match serde_json::from_str(&text) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Ok(Some(Value::String(text))),
            },
            other => Ok(Some(other)),
        }
    }

    async fn start_capture(&self) -> BrowserResult<()> {
        self.eval::<Value>(&format!(
            "(() => {{ if (Array.isArray(window.{CAPTURE_BUCKET})) window.{CAPTURE_BUCKET}.length = 0; return null; }})()"
        ))
        .await?;
        Ok(())
    }

    async fn finish_capture(&self) -> Vec<CapturedResponse> {
        let script = format!("(() => Array.isArray(window.{CAPTURE_BUCKET}) ? window.{CAPTURE_BUCKET}.slice() : [])()");
        match self.eval::<Vec<CapturedResponse>>(&script).await {
            Ok(responses) => responses,
            Err(err) => {
                debug!(error = %err, "could not read captured responses");
                Vec::new()
            }
        }
    }

    async fn export_state(&self) -> BrowserResult<StorageState> {
        let cookies = self
            .page
            .get_cookies()
            .await?
            .into_iter()
            .map(|cookie| StoredCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
                expires: (!cookie.session && cookie.expires > 0.0).then_some(cookie.expires),
                http_only: cookie.http_only,
                secure: cookie.secure,
                same_site: cookie
                    .same_site
                    .and_then(|same_site| serde_json::to_value(same_site).ok()),
            })
            .collect();
        let origin: Option<OriginStorage> = self
            .eval(
                "(() => { try { return { origin: location.origin, localStorage: Object.keys(localStorage).map(k => ({ name: k, value: localStorage.getItem(k) || '' })) }; } catch (_) { return null; } })()",
            )
            .await
            .unwrap_or(None);
        let origins = origin
            .filter(|entry| entry.origin.starts_with("http"))
            .into_iter()
            .collect();
        Ok(StorageState { cookies, origins })
    }

    async fn import_state(&self, state: &StorageState) -> BrowserResult<()> {
        let params = state
            .cookies
            .iter()
            .map(cookie_param)
            .collect::<BrowserResult<Vec<_>>>()?;
        // raw CDP: the page may still be on about:blank, which `Page::set_cookies` refuses
        if !params.is_empty() {
            self.page.execute(SetCookiesParams::new(params)).await?;
        }
        for origin in &state.origins {
            if origin.local_storage.is_empty() {
                continue;
            }
            let origin_json = serde_json::to_string(&origin.origin)
                .map_err(|err| BrowserError::Configuration(err.to_string()))?;
            let entries = serde_json::to_string(&origin.local_storage)
                .map_err(|err| BrowserError::Configuration(err.to_string()))?;
            let source = format!(
                "(() => {{ if (location.origin !== {origin_json}) return; try {{ for (const e of {entries}) {{ if (localStorage.getItem(e.name) === null) localStorage.setItem(e.name, e.value); }} }} catch (_) {{}} }})();"
            );
            self.page
                .evaluate_on_new_document(
                    AddScriptToEvaluateOnNewDocumentParams::builder()
                        .source(source)
                        .build()
                        .map_err(BrowserError::Configuration)?,
                )
                .await?;
        }
        debug!(cookies = state.cookies.len(), origins = state.origins.len(), "session state imported");
        Ok(())
    }
}

/// URL a stored cookie is scoped to, derived from its domain and path.
fn cookie_url(cookie: &StoredCookie) -> String {
    let host = cookie.domain.trim_start_matches('.');
    let path = if cookie.path.starts_with('/') {
        cookie.path.as_str()
    } else {
        "/"
    };
    format!("https://{host}{path}")
}

fn cookie_param(cookie: &StoredCookie) -> BrowserResult<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .url(cookie_url(cookie))
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    if let Some(same_site) = cookie
        .same_site
        .clone()
        .and_then(|value| serde_json::from_value::<CookieSameSite>(value).ok())
    {
        builder = builder.same_site(same_site);
    }
    builder.build().map_err(BrowserError::Configuration)
}

fn capture_hook_script(hints: &str) -> String {
    format!(
        r#"
(() => {{
    const hints = {hints};
    const bucket = [];
    Object.defineProperty(window, '{CAPTURE_BUCKET}', {{
        value: bucket,
        writable: false,
        configurable: false,
    }});
    const wanted = (url) => hints.length === 0 || hints.some(h => String(url || '').includes(h));
    // entries are appended in arrival order; fetch bodies are filled in later
    const push = (url, status, body, pending) => {{
        const entry = {{ url: String(url || ''), status, body, pending }};
        try {{ bucket.push(entry); }} catch (_) {{}}
        return entry;
    }};

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {{
        const response = await originalFetch(...args);
        try {{
            const request = args[0];
            const url = typeof request === 'string' ? request : request.url;
            const type = response.headers.get('content-type') || '';
            if (response.status === 200 && wanted(url) && type.includes('application/json')) {{
                const entry = push(url, response.status, null, true);
                response.clone().json()
                    .then(body => {{ entry.body = body; }})
                    .catch(() => {{}})
                    .finally(() => {{ entry.pending = false; }});
            }}
        }} catch (_) {{}}
        return response;
    }};

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {{
        const xhr = new OriginalXHR();
        let url = '';
        const open = xhr.open;
        xhr.open = function(method, u) {{
            url = u || '';
            return open.apply(xhr, arguments);
        }};
        xhr.addEventListener('loadend', function() {{
            try {{
                const type = xhr.getResponseHeader('content-type') || '';
                if (xhr.status === 200 && wanted(url) && type.includes('application/json')) {{
                    push(url, xhr.status, JSON.parse(xhr.responseText), false);
                }}
            }} catch (_) {{}}
        }});
        return xhr;
    }};
}})();
"#
    )
}

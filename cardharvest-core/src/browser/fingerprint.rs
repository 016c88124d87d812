use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{FingerprintProfile, FingerprintSection};

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct FingerprintMasker {
    config: FingerprintSection,
}

impl FingerprintMasker {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    /// Picks one identity from the vetted pool.
    pub fn select_profile<R: Rng + ?Sized>(&self, rng: &mut R) -> BrowserResult<FingerprintProfile> {
        self.config
            .profiles
            .choose(rng)
            .cloned()
            .ok_or_else(|| BrowserError::Configuration("fingerprint profile pool is empty".into()))
    }

    pub async fn apply(&self, page: &Page, profile: &FingerprintProfile) -> BrowserResult<()> {
        self.apply_identity(page, profile).await?;
        if self.config.stealth {
            self.inject(page, stealth_script(profile, &self.config)).await?;
        }
        if self.config.enable_canvas_noise {
            let [min, max] = self.config.canvas_noise_range;
            self.inject(page, canvas_noise_script(min, max)).await?;
        }
        Ok(())
    }

    async fn apply_identity(&self, page: &Page, profile: &FingerprintProfile) -> BrowserResult<()> {
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(profile.user_agent.clone())
            .accept_language(profile.accept_language.clone())
            .platform(profile.platform.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(user_agent).await?;

        let locale = SetLocaleOverrideParams::builder()
            .locale(profile.locale.clone())
            .build();
        page.execute(locale).await?;
        page.execute(SetTimezoneOverrideParams::new(profile.timezone.clone()))
            .await?;

        let [width, height] = profile.viewport;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(width),
            i64::from(height),
            1.0,
            false,
        ))
        .await?;
        Ok(())
    }

    async fn inject(&self, page: &Page, source: String) -> BrowserResult<()> {
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(source)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn stealth_script(profile: &FingerprintProfile, config: &FingerprintSection) -> String {
    let languages = profile
        .accept_language
        .split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim())
        .filter(|part| !part.is_empty())
        .map(js_string)
        .collect::<Vec<_>>()
        .join(", ");
    let platform = js_string(&profile.platform);
    let vendor = js_string(&config.webgl_vendor);
    let renderer = js_string(&config.webgl_renderer);
    format!(
        r#"
(() => {{
    Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
    Object.defineProperty(navigator, 'languages', {{ get: () => [{languages}] }});
    Object.defineProperty(navigator, 'platform', {{ get: () => {platform} }});
    Object.defineProperty(navigator, 'plugins', {{
        get: () => {{
            const plugins = [
                {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' }},
                {{ name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' }},
                {{ name: 'Native Client', filename: 'internal-nacl-plugin' }}
            ];
            plugins.item = (i) => plugins[i];
            plugins.namedItem = (name) => plugins.find(p => p.name === name);
            plugins.refresh = () => {{}};
            return plugins;
        }}
    }});
    if (!window.chrome) {{
        window.chrome = {{ runtime: {{}}, loadTimes: function() {{}}, csi: function() {{}}, app: {{}} }};
    }}
    for (const key of Object.keys(window)) {{
        if (key.startsWith('cdc_')) {{
            try {{ delete window[key]; }} catch (_) {{}}
        }}
    }}
    if (navigator.permissions && navigator.permissions.query) {{
        const originalQuery = navigator.permissions.query.bind(navigator.permissions);
        navigator.permissions.query = (parameters) => (
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({{ state: Notification.permission }})
                : originalQuery(parameters)
        );
    }}
    const spoofParam = (proto) => {{
        if (!proto || !proto.getParameter) {{
            return;
        }}
        const original = proto.getParameter;
        proto.getParameter = function(param) {{
            if (param === 37445) {{
                return {vendor};
            }}
            if (param === 37446) {{
                return {renderer};
            }}
            return original.apply(this, arguments);
        }};
    }};
    spoofParam(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
    spoofParam(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);
}})();
"#
    )
}

fn canvas_noise_script(min: i32, max: i32) -> String {
    format!(
        r#"
(() => {{
    const randomInt = (min, max) => Math.floor(Math.random() * (max - min + 1)) + min;
    const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function() {{
        try {{
            const ctx = this.getContext('2d');
            if (ctx) {{
                const imageData = ctx.getImageData(0, 0, this.width, this.height);
                for (let i = 0; i < imageData.data.length; i += 4) {{
                    const delta = randomInt({min}, {max});
                    imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                }}
                ctx.putImageData(imageData, 0, 0);
            }}
        }} catch (_) {{}}
        return originalToDataURL.apply(this, arguments);
    }};
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn selected_profile_comes_from_pool() {
        let config = FingerprintSection::default();
        let masker = FingerprintMasker::new(config.clone());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            let profile = masker.select_profile(&mut rng).unwrap();
            assert!(config.profiles.contains(&profile));
        }
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        let config = FingerprintSection {
            profiles: Vec::new(),
            ..FingerprintSection::default()
        };
        let masker = FingerprintMasker::new(config);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            masker.select_profile(&mut rng),
            Err(BrowserError::Configuration(_))
        ));
    }

    #[test]
    fn stealth_script_carries_profile_languages_and_webgl_vendor() {
        let config = FingerprintSection::default();
        let profile = config.profiles[1].clone();
        let script = stealth_script(&profile, &config);
        assert!(script.contains(r#"["en-GB", "en"]"#));
        assert!(script.contains("\"Intel Inc.\""));
        assert!(script.contains("'webdriver'"));
    }
}

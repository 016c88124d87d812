mod common;

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;
use tempfile::tempdir;
use tokio::time::Instant;

use cardharvest_core::browser::HarvestTelemetry;
use cardharvest_core::scraper::{ExtractionStrategy, ScrapeError, SetExtractor};

use common::{pacer, quiet_config, raw_card, url, PageScript, ScriptedPage};

fn side(label: &str, text: &str) -> serde_json::Value {
    json!({ "label": label, "media": [{ "type": "text", "plainText": text }] })
}

fn studiable_payload() -> serde_json::Value {
    json!({
        "responses": [{
            "models": {
                "studiableItem": [
                    { "id": 1, "cardSides": [side("word", "hola"), side("definition", "hello")] },
                    { "id": 2, "cardSides": [side("word", "adiós"), side("definition", "goodbye")] }
                ]
            }
        }]
    })
}

#[tokio::test]
async fn captured_payload_skips_the_dom_entirely() {
    let config = quiet_config();
    let set_url = url("/111/spanish-flash-cards/");
    let page = ScriptedPage::new().with_page(
        &set_url,
        PageScript::default()
            .captured(json!({ "user": { "id": 5 } }))
            .captured(studiable_payload()),
    );
    let extractor = SetExtractor::new(&config, pacer(&config));

    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert_eq!(set.id, "111");
    assert_eq!(set.term_count(), 2);
    assert_eq!(set.cards[0].term, "hola");
    assert_eq!(set.cards[1].definition, "goodbye");
    assert_eq!(set.strategy, ExtractionStrategy::Api);
    assert_eq!(page.count("extract_cards"), 0);
    assert_eq!(page.count("scroll"), 0);
    assert_eq!(page.count("click_text"), 0);
    assert_eq!(page.count("evaluate_json"), 0);
}

#[tokio::test]
async fn second_selector_triplet_supplies_the_cards() {
    let config = quiet_config();
    let triplets = config.extractor.triplets.clone();
    let set_url = url("/222/biology-flash-cards/");
    let mut script = PageScript::default().cards(
        &triplets[1],
        vec![
            raw_card("cell", "unit of life"),
            raw_card(" atom ", "smallest unit\n"),
            raw_card("gene", "unit of heredity"),
        ],
    );
    script
        .text_by_selector
        .insert("h1".into(), "Biology 101".into());
    let page = ScriptedPage::new().with_page(&set_url, script);
    let extractor = SetExtractor::new(&config, pacer(&config));

    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert_eq!(set.term_count(), 3);
    assert_eq!(set.title, "Biology 101");
    assert_eq!(set.cards[1].term, "atom");
    assert_eq!(set.cards[1].definition, "smallest unit");
    assert_eq!(set.strategy, ExtractionStrategy::Dom);
    let extracted: Vec<String> = page
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("extract_cards"))
        .collect();
    assert_eq!(
        extracted,
        vec![
            format!("extract_cards {}", triplets[0].container),
            format!("extract_cards {}", triplets[1].container),
        ]
    );
    assert_eq!(page.count("evaluate_json"), 0);
}

#[tokio::test]
async fn embedded_state_is_the_last_resort() {
    let config = quiet_config();
    let set_url = url("/333/chem-flash-cards/");
    let mut script = PageScript::default();
    script.initial_state = Some(json!({
        "pageProps": { "set": { "title": "Chemistry", "terms": [{ "word": "H", "definition": "hydrogen" }] } }
    }));
    let page = ScriptedPage::new().with_page(&set_url, script);
    let extractor = SetExtractor::new(&config, pacer(&config));

    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert_eq!(set.strategy, ExtractionStrategy::InitialState);
    assert_eq!(set.term_count(), 1);
    assert_eq!(page.count("extract_cards"), config.extractor.triplets.len());
    assert_eq!(page.count("evaluate_json"), 1);
}

#[tokio::test]
async fn empty_page_yields_an_empty_set_not_an_error() {
    let config = quiet_config();
    let set_url = url("/444/blank-flash-cards/");
    let page = ScriptedPage::new();
    let extractor = SetExtractor::new(&config, pacer(&config));

    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert!(set.is_empty());
    assert_eq!(set.title, "Untitled Set");
    assert_eq!(set.strategy, ExtractionStrategy::None);
}

#[tokio::test]
async fn login_redirect_is_access_denied_before_any_extraction() {
    let config = quiet_config();
    let set_url = url("/555/secret-flash-cards/");
    let page = ScriptedPage::new().with_page(
        &set_url,
        PageScript::default()
            .redirect(&url("/login?from=%2F555"))
            .captured(studiable_payload()),
    );
    let extractor = SetExtractor::new(&config, pacer(&config));

    let err = extractor.scrape_set(&page, &set_url).await.unwrap_err();

    assert!(matches!(err, ScrapeError::AccessDenied { .. }), "{err}");
    assert_eq!(page.count("goto"), 1);
    assert_eq!(page.count("finish_capture"), 0);
    assert_eq!(page.count("extract_cards"), 0);
}

#[tokio::test]
async fn private_and_missing_sets_are_classified() {
    let config = quiet_config();
    let private_url = url("/666/private-flash-cards/");
    let missing_url = url("/777/gone-flash-cards/");
    let page = ScriptedPage::new()
        .with_page(&private_url, PageScript::default().text("This set is private"))
        .with_page(&missing_url, PageScript::default().redirect(&url("/404")));
    let extractor = SetExtractor::new(&config, pacer(&config));

    let private = extractor.scrape_set(&page, &private_url).await.unwrap_err();
    let missing = extractor.scrape_set(&page, &missing_url).await.unwrap_err();

    assert!(matches!(private, ScrapeError::AccessDenied { ref reason, .. } if reason.contains("private")));
    assert!(matches!(missing, ScrapeError::SetNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn marker_phrases_inside_card_text_do_not_fail_the_set() {
    let config = quiet_config();
    let set_url = url("/42/networking-flash-cards/");
    let page = ScriptedPage::new().with_page(
        &set_url,
        PageScript::default()
            .text("throttling")
            .text("Applying a rate limit to API clients")
            .text("Servers answer 404 with a Page not found body")
            .text("Why This set is private shows up for shared links")
            .captured(studiable_payload()),
    );
    let extractor = SetExtractor::new(&config, pacer(&config));

    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert_eq!(set.term_count(), 2);
    assert_eq!(set.strategy, ExtractionStrategy::Api);
    assert_eq!(page.count("goto"), 1);
    assert!(!config
        .extractor
        .rate_limit_markers
        .iter()
        .any(|marker| marker.eq_ignore_ascii_case("rate limit")));
}

#[tokio::test(start_paused = true)]
async fn transient_navigation_failure_is_retried_with_backoff() {
    let config = quiet_config();
    let set_url = url("/888/retry-flash-cards/");
    let mut script = PageScript::default().captured(studiable_payload());
    script.goto_failures = 2;
    let page = ScriptedPage::new().with_page(&set_url, script);
    let extractor = SetExtractor::new(&config, pacer(&config));

    let started = Instant::now();
    let set = extractor.scrape_set(&page, &set_url).await.unwrap();

    assert_eq!(set.term_count(), 2);
    assert_eq!(page.count("goto"), 3);
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test]
async fn batch_skips_failed_sets_and_records_them() {
    let dir = tempdir().unwrap();
    let telemetry = Arc::new(
        HarvestTelemetry::new(
            dir.path().join("failures.jsonl"),
            dir.path().join("ledger.sqlite"),
        )
        .unwrap(),
    );
    let config = quiet_config();
    let urls = vec![
        url("/1/first-flash-cards/"),
        url("/2/second-flash-cards/"),
        url("/3/third-flash-cards/"),
    ];
    let page = ScriptedPage::new()
        .with_page(&urls[0], PageScript::default().captured(studiable_payload()))
        .with_page(&urls[1], PageScript::default().text("Page not found"))
        .with_page(&urls[2], PageScript::default().captured(studiable_payload()));
    let pacer = pacer(&config).with_telemetry(Arc::clone(&telemetry));
    let metrics = pacer.metrics();
    let extractor = SetExtractor::new(&config, pacer);

    let sets = extractor.scrape_sets(&page, &urls).await;

    let ids: Vec<&str> = sets.iter().map(|set| set.id.as_str()).collect();
    assert_eq!(ids, ["1", "3"]);
    assert_eq!(page.count(&format!("goto {}", urls[1])), 1);

    let conn = Connection::open(telemetry.database_path()).unwrap();
    let skipped: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM harvest_failures WHERE remediation = 'Skipped' AND category = 'set_not_found'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(skipped, 1);

    let metrics = metrics.lock().unwrap();
    assert_eq!(metrics.sets_scraped, 2);
    assert_eq!(metrics.sets_failed, 1);
    assert_eq!(metrics.cards_extracted, 4);
}

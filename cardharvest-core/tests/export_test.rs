mod common;

use serde_json::{json, Value};
use tempfile::tempdir;

use cardharvest_core::export::{
    export_all, export_formats, exporter_for, parse_tagged, ExportFormat,
};
use cardharvest_core::scraper::{Card, CardSet, SetExtractor};

use common::{pacer, quiet_config, url, PageScript, ScriptedPage};

fn glossary(id: &str, title: &str) -> CardSet {
    let mut set = CardSet::empty(id.into(), &url(&format!("/{id}/glossary-flash-cards/")));
    set.title = title.into();
    set.cards = vec![
        Card::new("latency", "time to first byte").unwrap(),
        Card::new("route", "path /answer/ taken")
            .unwrap()
            .with_image(Some("https://img.example/route.png".into())),
    ];
    set
}

#[tokio::test]
async fn scraped_set_survives_tagged_export_and_read_back() {
    let config = quiet_config();
    let set_url = url("/901/verbs-flash-cards/");
    let page = ScriptedPage::new().with_page(
        &set_url,
        PageScript::default().captured(json!({
            "set": { "title": "Verbs", "creator": { "username": "amy" } },
            "terms": [
                { "word": "ir", "definition": "to go" },
                { "word": "ser", "definition": "to be\n(permanent)", "image": "https://img.example/ser.png" }
            ]
        })),
    );
    let set = SetExtractor::new(&config, pacer(&config))
        .scrape_set(&page, &set_url)
        .await
        .unwrap();
    let dir = tempdir().unwrap();

    let files = export_formats(
        &set,
        &[ExportFormat::Tagged, ExportFormat::Json],
        true,
        dir.path(),
    );

    assert_eq!(files.len(), 2);
    let tagged = std::fs::read_to_string(&files[0]).unwrap();
    let cards = parse_tagged(&tagged);
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].term, "ir");
    assert_eq!(cards[1].definition, "to be (permanent)");
    assert_eq!(cards[1].image_url.as_deref(), Some("https://img.example/ser.png"));

    let document: Value = serde_json::from_str(&std::fs::read_to_string(&files[1]).unwrap()).unwrap();
    assert_eq!(document["metadata"]["title"], "Verbs");
    assert_eq!(document["metadata"]["created_by"], "amy");
    assert_eq!(document["metadata"]["term_count"], 2);
}

#[test]
fn batch_export_keeps_going_past_a_failed_set() {
    let dir = tempdir().unwrap();
    let sets = vec![glossary("1", "Networking"), glossary("2", "Storage")];
    let exporter = exporter_for(ExportFormat::Tagged, false);

    let written = export_all(exporter.as_ref(), &sets, dir.path());

    assert_eq!(written.len(), 2);
    let second = parse_tagged(&std::fs::read_to_string(&written[1]).unwrap());
    assert_eq!(second[1].definition, "path /answer/ taken");
    assert_eq!(second[1].image_url, None);

    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, "occupied").unwrap();
    assert!(export_all(exporter.as_ref(), &sets, &blocked).is_empty());
    assert!(export_formats(&sets[0], &[ExportFormat::Csv, ExportFormat::Json], false, &blocked).is_empty());
}

mod common;

use std::time::Duration;

use tempfile::tempdir;

use cardharvest_core::auth::{AuthError, AuthState, Authenticator, SessionStore};
use cardharvest_core::browser::{OriginStorage, StorageEntry, StorageState, StoredCookie};

use common::{pacer, quiet_config, url, PageScript, ScriptedPage};

const EMAIL_INPUT: &str = "input[type=\"email\"]";
const USER_MENU: &str = "[data-testid=\"user-menu\"]";

fn authenticator() -> Authenticator {
    let config = quiet_config();
    Authenticator::new(&config, pacer(&config))
}

fn login_form() -> PageScript {
    PageScript::default().visible(EMAIL_INPUT)
}

fn library_signed_in() -> PageScript {
    PageScript::default().visible(USER_MENU)
}

#[tokio::test]
async fn login_page_means_not_authenticated() {
    let page = ScriptedPage::new();
    page.set_current(&url("/login?redirect=%2Flatest"));
    let mut auth = authenticator().with_restored_session();

    assert!(!auth.is_authenticated(&page).await);
    assert_eq!(auth.state(), AuthState::Expired);
    assert_eq!(page.count("goto"), 0);
}

#[tokio::test]
async fn blank_tab_is_checked_against_the_library() {
    let page = ScriptedPage::new().with_page(&url("/latest"), library_signed_in());
    let mut auth = authenticator();

    assert!(auth.is_authenticated(&page).await);
    assert_eq!(auth.state(), AuthState::Authenticated);
    assert_eq!(page.calls()[0], format!("goto {}", url("/latest")));
}

#[tokio::test]
async fn credentials_are_submitted_through_the_form() {
    let mut form = login_form();
    form.submit_to = Some(url("/latest"));
    let page = ScriptedPage::new()
        .with_page(&url("/login"), form)
        .with_page(&url("/latest"), library_signed_in());
    let mut auth = authenticator();

    auth.login(&page, "amy@example.com", "hunter2").await.unwrap();

    assert_eq!(auth.state(), AuthState::Authenticated);
    let calls = page.calls();
    assert!(calls.contains(
        &"fill input[type=\"email\"], input[type=\"text\"]=amy@example.com".to_string()
    ));
    assert!(calls.contains(&"fill input[type=\"password\"]=hunter2".to_string()));
    assert_eq!(page.count("submit"), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_surface_the_page_message() {
    let mut form = login_form();
    form.text_by_selector
        .insert("[class*=\"error\"]".into(), "Incorrect password".into());
    let page = ScriptedPage::new().with_page(&url("/login"), form);
    let mut auth = authenticator();

    let err = auth.login(&page, "amy@example.com", "wrong").await.unwrap_err();

    assert!(matches!(err, AuthError::Failed(ref message) if message == "Incorrect password"));
    assert_eq!(auth.state(), AuthState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn stuck_login_without_message_times_out() {
    let page = ScriptedPage::new().with_page(&url("/login"), login_form());
    let mut auth = authenticator();

    let err = auth.login(&page, "amy@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, AuthError::Timeout { seconds: 30 }));
}

#[tokio::test]
async fn missing_form_fails_fast() {
    let page = ScriptedPage::new();
    let mut auth = authenticator();

    let err = auth.login(&page, "amy@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, AuthError::Failed(_)));
    assert_eq!(page.count("fill"), 0);
}

#[tokio::test(start_paused = true)]
async fn manual_login_waits_through_identity_provider() {
    let page = ScriptedPage::new()
        .with_page(&url("/latest"), library_signed_in())
        .with_url_sequence(&[
            "https://accounts.google.com/o/oauth2/auth",
            "https://accounts.google.com/signin/challenge",
            "https://quizlet.com/login",
            "https://quizlet.com/latest",
        ]);
    let mut auth = authenticator();

    auth.manual_login(&page, Duration::from_secs(60)).await.unwrap();

    assert_eq!(auth.state(), AuthState::Authenticated);
    assert_eq!(page.count("is_visible"), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_login_gives_up_at_deadline() {
    let page = ScriptedPage::new();
    let mut auth = authenticator();

    let err = auth
        .manual_login(&page, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Timeout { seconds: 10 }));
    assert_eq!(auth.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn session_survives_a_round_trip_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("auth").join("session.json");
    let state = StorageState {
        cookies: vec![StoredCookie {
            name: "qlts".into(),
            value: "token".into(),
            domain: ".quizlet.com".into(),
            path: "/".into(),
            secure: true,
            ..StoredCookie::default()
        }],
        origins: vec![OriginStorage {
            origin: "https://quizlet.com".into(),
            local_storage: vec![StorageEntry {
                name: "uid".into(),
                value: "42".into(),
            }],
        }],
    };
    let page = ScriptedPage::new().with_storage(state.clone());

    SessionStore::save(&page, &path).await.unwrap();
    let loaded = SessionStore::load(&path).unwrap().unwrap();

    assert_eq!(loaded, state);
}

#[tokio::test]
async fn stored_session_restores_into_a_fresh_blank_context() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");
    let signed_in = StorageState {
        cookies: vec![StoredCookie {
            name: "qlts".into(),
            value: "token".into(),
            domain: ".quizlet.com".into(),
            path: "/".into(),
            expires: Some(1_900_000_000.0),
            http_only: true,
            secure: true,
            ..StoredCookie::default()
        }],
        origins: Vec::new(),
    };
    let first = ScriptedPage::new().with_storage(signed_in.clone());
    SessionStore::save(&first, &path).await.unwrap();

    let without = ScriptedPage::new()
        .with_page(&url("/latest"), library_signed_in().requires_cookie("qlts"));
    let mut auth = authenticator().with_restored_session();
    assert!(!auth.is_authenticated(&without).await);
    assert_eq!(auth.state(), AuthState::Expired);

    let fresh = ScriptedPage::new()
        .with_page(&url("/latest"), library_signed_in().requires_cookie("qlts"));
    let restored = SessionStore::restore(&fresh, &path).await.unwrap().unwrap();
    let mut auth = authenticator().with_restored_session();

    assert_eq!(restored, signed_in);
    assert_eq!(fresh.calls()[0], "import_state 1");
    assert!(auth.is_authenticated(&fresh).await);
    assert_eq!(auth.state(), AuthState::Authenticated);

    let missing = ScriptedPage::new();
    let nothing = SessionStore::restore(&missing, &dir.path().join("absent.json"))
        .await
        .unwrap();
    assert!(nothing.is_none());
    assert_eq!(missing.count("import_state"), 0);
}

#[tokio::test]
async fn logout_clears_state_even_when_navigation_fails() {
    let mut broken = PageScript::default();
    broken.goto_failures = usize::MAX;
    let mut config = quiet_config();
    config.retry.backoff_base_seconds = 0;
    let page = ScriptedPage::new().with_page(&url("/logout"), broken);
    let mut auth = Authenticator::new(&config, pacer(&config)).with_restored_session();

    auth.logout(&page).await;

    assert_eq!(auth.state(), AuthState::Unauthenticated);
}

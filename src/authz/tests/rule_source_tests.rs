//! Rule configuration source tests
//!
//! Snapshot swapping, refresh failures and coalescing as seen through the
//! engine.

use hdcn_authz::{
    AuthorizationEngine, AuthzError, EngineConfig, FileRuleFetcher, HttpRuleFetcher, RefreshOutcome,
    RuleConfigEntry, RuleConfigSource, RuleSourceConfig, StaticRuleFetcher, Subject,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn events_for_regions() -> Vec<RuleConfigEntry> {
    vec![RuleConfigEntry::new("events", "read", ["Regio_*"])]
}

// ============================================================================
// FALLBACK AND LAST-KNOWN-GOOD
// ============================================================================

#[tokio::test]
async fn test_outage_before_first_fetch_keeps_admins_working() {
    let engine = AuthorizationEngine::with_fetcher(
        EngineConfig::default(),
        Arc::new(StaticRuleFetcher::unavailable()),
    );

    let err = engine.refresh_rules().await.unwrap_err();
    assert!(matches!(err, AuthzError::ConfigUnavailable(_)));
    assert!(engine.rule_source().current_snapshot().is_fallback());

    let admin = Subject::new(["hdcnAdmins", "Regio_All"]);
    assert!(engine.can_perform(&admin, "system", "write", None));

    let regional = Subject::new(["Regio_Oost"]);
    assert!(!engine.can_perform(&regional, "events", "read", None));

    let metrics = engine.metrics().unwrap();
    assert_eq!(metrics.refresh_failures, 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_decisions() {
    let fetcher = Arc::new(StaticRuleFetcher::new(events_for_regions()));
    let engine = AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher.clone());
    engine.refresh_rules().await.unwrap();

    let regional = Subject::new(["Regio_Oost"]);
    assert!(engine.can_perform(&regional, "events", "read", None));
    let generation = engine.rule_source().generation();

    fetcher.set_failing(true);
    for _ in 0..3 {
        assert!(matches!(engine.refresh_rules().await, Err(AuthzError::Fetch(_))));
    }

    assert!(engine.can_perform(&regional, "events", "read", None));
    assert_eq!(engine.rule_source().generation(), generation);
    assert!(!engine.rule_source().current_snapshot().is_fallback());
}

#[tokio::test]
async fn test_refresh_swaps_decisions() {
    let fetcher = Arc::new(StaticRuleFetcher::new(events_for_regions()));
    let engine = AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher.clone());
    engine.refresh_rules().await.unwrap();

    let regional = Subject::new(["Regio_Utrecht"]);
    assert!(engine.can_perform(&regional, "events", "read", None));

    fetcher.set_entries(vec![RuleConfigEntry::new("events", "read", ["Events_Read"])]);
    let outcome = engine.refresh_rules().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Updated { generation: 2, .. }));

    assert!(!engine.can_perform(&regional, "events", "read", None));
}

#[tokio::test]
async fn test_defective_entries_do_not_block_install() {
    let fetcher = Arc::new(StaticRuleFetcher::new(vec![
        RuleConfigEntry::new("events", "read", ["*", "Events_Read"]),
        RuleConfigEntry::new("evnets", "read", ["Regio_*"]),
    ]));
    let engine = AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher);
    engine.refresh_rules().await.unwrap();

    let snapshot = engine.rule_source().current_snapshot();
    assert_eq!(snapshot.rules().len(), 1);
    assert_eq!(snapshot.defects().len(), 2);

    // Bare `*` is rejected, so nobody gains everything
    assert!(!engine.can_perform(&Subject::new(["Regio_Oost"]), "events", "read", None));
    assert!(engine.can_perform(&Subject::new(["Events_Read"]), "events", "read", None));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_concurrent_refreshes_fetch_once() {
    let fetcher = Arc::new(StaticRuleFetcher::new(events_for_regions()).with_delay(Duration::from_millis(50)));
    let engine = Arc::new(AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move { engine.refresh_rules().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(engine.rule_source().generation(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decisions_during_refresh() {
    let fetcher = Arc::new(StaticRuleFetcher::new(events_for_regions()).with_delay(Duration::from_millis(20)));
    let engine = Arc::new(AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher.clone()));
    engine.refresh_rules().await.unwrap();

    let refresher = {
        let engine = Arc::clone(&engine);
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move {
            for i in 0..5 {
                let roles = if i % 2 == 0 { vec!["Events_Read"] } else { vec!["Regio_*"] };
                fetcher.set_entries(vec![RuleConfigEntry::new("events", "read", roles)]);
                engine.refresh_rules().await.unwrap();
            }
        })
    };

    let checker = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let admin = Subject::new(["hdcnAdmins", "Regio_All"]);
            let nobody = Subject::new(["Regionaal_Oost"]);
            for _ in 0..500 {
                assert!(engine.can_perform(&admin, "events", "read", None));
                assert!(!engine.can_perform(&nobody, "events", "read", None));
                tokio::task::yield_now().await;
            }
        })
    };

    refresher.await.unwrap();
    checker.await.unwrap();
    assert_eq!(engine.rule_source().generation(), 6);
}

// ============================================================================
// FETCHERS AND REFRESH LOOP
// ============================================================================

#[tokio::test]
async fn test_file_rules_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"rules":[{{"resource":"products","action":"read","roles":["Webshop_*"]}}]}}"#
    )
    .unwrap();

    let engine = AuthorizationEngine::with_fetcher(
        EngineConfig::default(),
        Arc::new(FileRuleFetcher::new(file.path())),
    );
    engine.refresh_rules().await.unwrap();

    let shop = Subject::new(["Webshop_Management"]);
    assert!(engine.can_perform(&shop, "products", "read", Some("duitsland")));
    assert!(!engine.can_perform(&shop, "orders", "read", Some("duitsland")));
}

/// Serves a wrapped rule document while `healthy`, a 500 otherwise
async fn serve_rules(healthy: Arc<AtomicBool>) -> String {
    use axum::{extract::State, http::StatusCode, routing::get, Router};

    async fn rules(State(healthy): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
        if healthy.load(Ordering::SeqCst) {
            (
                StatusCode::OK,
                r#"{"rules":[{"resource":"events","action":"read","roles":["Regio_*"]}]}"#,
            )
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "rule store down")
        }
    }

    let app = Router::new().route("/rules", get(rules)).with_state(healthy);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/rules", addr)
}

#[tokio::test]
async fn test_http_rules_end_to_end() {
    let healthy = Arc::new(AtomicBool::new(false));
    let url = serve_rules(Arc::clone(&healthy)).await;
    let fetcher = Arc::new(HttpRuleFetcher::new(url, Duration::from_secs(5)).unwrap());
    let source = Arc::new(RuleConfigSource::new(fetcher, RuleSourceConfig::default()));
    let engine = AuthorizationEngine::new(EngineConfig::default(), Arc::clone(&source));
    let regional = Subject::new(["Regio_Oost"]);

    // Endpoint down before anything was installed
    let err = source.refresh().await.unwrap_err();
    assert!(matches!(err, AuthzError::ConfigUnavailable(_)));
    assert!(source.current_snapshot().is_fallback());
    assert!(!engine.can_perform(&regional, "events", "read", None));

    healthy.store(true, Ordering::SeqCst);
    let outcome = source.refresh().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Updated { generation: 1, .. }));
    assert!(engine.can_perform(&regional, "events", "read", None));

    // Endpoint down again: last good rules stay in force
    healthy.store(false, Ordering::SeqCst);
    let err = source.refresh().await.unwrap_err();
    assert!(matches!(err, AuthzError::Fetch(_)));
    assert_eq!(source.generation(), 1);
    assert!(engine.can_perform(&regional, "events", "read", None));
}

#[tokio::test]
async fn test_invalidate_triggers_early_refresh() {
    let fetcher = Arc::new(StaticRuleFetcher::new(Vec::new()));
    let config = RuleSourceConfig {
        ttl: Duration::from_secs(3600),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    };
    let source = Arc::new(RuleConfigSource::new(fetcher.clone(), config));
    let engine = AuthorizationEngine::new(EngineConfig::default(), Arc::clone(&source));
    let handle = engine.spawn_refresh_loop();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(source.generation(), 1);

    fetcher.set_entries(events_for_regions());
    source.invalidate();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(source.generation(), 2);
    assert!(!source.is_stale());
    assert!(engine.can_perform(&Subject::new(["Regio_Oost"]), "events", "read", None));

    handle.abort();
}

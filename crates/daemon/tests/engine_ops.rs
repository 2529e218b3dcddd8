//! End-to-end scenarios through the operation surface, with the language
//! model absent (every degraded-success contract must hold).

use palace_daemon::Engine;

async fn boot() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::boot(dir.path().join("store"), None).await.unwrap();
    (dir, engine)
}

#[tokio::test]
async fn decision_with_validation_round_trip() {
    let (_dir, engine) = boot().await;

    let created = engine
        .handle(
            "component_create",
            serde_json::json!({"type": "projects", "key": "alpha", "summary": "# Alpha\n"}),
        )
        .await;
    assert!(!created.is_error, "{}", created.text);

    let recorded = engine
        .handle(
            "changelog_record",
            serde_json::json!({
                "scope": "projects/alpha",
                "type": "decision",
                "decision": "Use Store X",
                "rationale": "smallest operational footprint",
                "alternatives": [{"option": "Store Y", "rejected_because": "needs a server"}],
                "summary": "picked the backing store",
            }),
        )
        .await;
    assert!(!recorded.is_error, "{}", recorded.text);
    assert!(recorded.text.contains("dec_"), "{}", recorded.text);
    // Fresh component, no prior data: no validation risks surface.
    assert!(!recorded.text.contains("validation risks"), "{}", recorded.text);

    let queried = engine
        .handle(
            "changelog_query",
            serde_json::json!({"scope": "projects/alpha", "type": "decision"}),
        )
        .await;
    assert!(queried.text.contains("Use Store X"));

    // L0 row carries today's update stamp.
    let index = engine.handle("index_get", serde_json::Value::Null).await;
    let today = palace_memory::format_mmdd(chrono::Utc::now().date_naive());
    assert!(index.text.contains("[P] alpha"), "{}", index.text);
    assert!(index.text.contains(&format!("⟳{today}")), "{}", index.text);
}

#[tokio::test]
async fn compaction_recovery_via_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = Engine::boot(dir.path().join("store"), None).await.unwrap();
        let saved = engine
            .handle(
                "snapshot_save",
                serde_json::json!({
                    "current_focus": "X",
                    "active_tasks": [{"description": "one task", "status": "active"}],
                }),
            )
            .await;
        assert!(!saved.is_error, "{}", saved.text);
    }

    // Simulated restart: a new engine over the same store.
    let engine = Engine::boot(dir.path().join("store"), None).await.unwrap();
    let read = engine.handle("snapshot_read", serde_json::Value::Null).await;
    assert!(!read.is_error);
    assert!(read.text.contains("current_focus: X"), "{}", read.text);
    assert!(read.text.contains("one task"), "{}", read.text);
}

#[tokio::test]
async fn search_falls_back_without_external_cli() {
    let (_dir, engine) = boot().await;
    engine
        .handle(
            "component_create",
            serde_json::json!({"type": "projects", "key": "alpha", "summary": "# Alpha\n"}),
        )
        .await;
    engine
        .handle(
            "changelog_record",
            serde_json::json!({
                "scope": "projects/alpha",
                "type": "operation",
                "action": "create",
                "target": "tests/alpha.rs",
                "summary": "created test file",
            }),
        )
        .await;

    // Force the zero-dependency backend and verify it answers.
    engine
        .handle(
            "system_configure",
            serde_json::json!({"path": "search.backend", "value": "simple"}),
        )
        .await;
    let hits = engine
        .handle(
            "raw_search",
            serde_json::json!({"query": "created test file", "scope": "projects/alpha"}),
        )
        .await;
    assert!(!hits.is_error, "{}", hits.text);
    assert!(hits.text.contains("created test file"), "{}", hits.text);

    let status = engine.handle("search_status", serde_json::Value::Null).await;
    assert!(status.text.contains("\"backend\": \"simple\""), "{}", status.text);
}

#[tokio::test]
async fn unknown_operation_and_bad_args_are_textual_errors() {
    let (_dir, engine) = boot().await;
    let unknown = engine.handle("definitely_not_an_op", serde_json::Value::Null).await;
    assert!(unknown.is_error);
    assert!(unknown.text.contains("not found"));

    let bad = engine
        .handle("component_create", serde_json::json!({"type": "widgets", "key": "x", "summary": ""}))
        .await;
    assert!(bad.is_error);
    assert!(bad.text.contains("unknown component type"));

    // Alternatives on an operation entry are rejected (tightened rule).
    let alt = engine
        .handle(
            "changelog_record",
            serde_json::json!({
                "scope": "projects/alpha",
                "type": "operation",
                "summary": "op with alternatives",
                "alternatives": [{"option": "x"}],
            }),
        )
        .await;
    assert!(alt.is_error);
    assert!(alt.text.contains("decision"), "{}", alt.text);
}

#[tokio::test]
async fn trust_and_relationship_flow_creates_backing_component() {
    let (_dir, engine) = boot().await;
    let trust = engine
        .handle(
            "relationship_update_trust",
            serde_json::json!({"entity_id": "dana", "delta": 0.9, "reason": "shipped it"}),
        )
        .await;
    assert!(!trust.is_error, "{}", trust.text);
    assert!(trust.text.contains("1.00"), "{}", trust.text);

    let list = engine
        .handle("component_list", serde_json::json!({"type": "relationships"}))
        .await;
    assert!(list.text.contains("relationships/dana"), "{}", list.text);

    let profile = engine
        .handle("relationship_get", serde_json::json!({"entity_id": "dana"}))
        .await;
    assert!(profile.text.contains("trust_score: 1.0"), "{}", profile.text);
    // The history keeps the raw caller delta, not the clamped change.
    assert!(profile.text.contains("delta: 0.9"), "{}", profile.text);
}

#[tokio::test]
async fn onboarding_then_health_is_clean() {
    let (_dir, engine) = boot().await;
    let init = engine
        .handle("onboarding_init", serde_json::json!({"skip_agents": false}))
        .await;
    assert!(!init.is_error, "{}", init.text);

    let status = engine.handle("onboarding_status", serde_json::Value::Null).await;
    assert!(status.text.contains("completed: true"), "{}", status.text);

    let health = engine
        .handle("system_execute", serde_json::json!({"name": "health", "params": {}}))
        .await;
    assert!(!health.is_error, "{}", health.text);
    assert!(health.text.starts_with("[ok]"), "{}", health.text);
}

#[tokio::test]
async fn summarizer_digest_without_model_still_advances_watermark() {
    let (_dir, engine) = boot().await;
    engine
        .handle(
            "component_create",
            serde_json::json!({"type": "projects", "key": "alpha", "summary": "# Alpha\n"}),
        )
        .await;
    engine
        .handle(
            "changelog_record",
            serde_json::json!({
                "scope": "projects/alpha",
                "type": "operation",
                "summary": "some work",
            }),
        )
        .await;

    let digest = engine
        .handle(
            "system_execute",
            serde_json::json!({"name": "summarizer", "params": {"level": "digest"}}),
        )
        .await;
    assert!(!digest.is_error, "{}", digest.text);
    assert!(digest.text.starts_with("[ok]"), "{}", digest.text);

    let status = engine
        .handle("system_status", serde_json::json!({"name": "summarizer"}))
        .await;
    assert!(status.text.contains("\"components_covered\": 1"), "{}", status.text);
    // Coverage exists, so a watermark now exists for decay.
    assert!(!status.text.contains("\"safe_watermark\": null"), "{}", status.text);
}

#[tokio::test]
async fn config_ops_round_trip() {
    let (_dir, engine) = boot().await;
    let updated = engine
        .handle(
            "config_update",
            serde_json::json!({"path": "decay.threshold", "value": 42.0}),
        )
        .await;
    assert!(!updated.is_error, "{}", updated.text);

    let value = engine
        .handle("config_get", serde_json::json!({"path": "decay.threshold"}))
        .await;
    assert!(value.text.contains("42"), "{}", value.text);

    let reference = engine
        .handle("config_reference", serde_json::json!({"filter": "decay"}))
        .await;
    assert!(reference.text.contains("decay.threshold"), "{}", reference.text);
    assert!(reference.text.contains("decay.pinned_entries"), "{}", reference.text);
}

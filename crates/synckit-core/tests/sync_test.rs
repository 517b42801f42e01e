// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the sync service over an in-memory SQLite row store.
//!
//! Run with:
//! ```bash
//! cargo test -p synckit-core --test sync_test
//! ```

mod common;

use chrono::Utc;
use common::{TestContext, t_row};
use synckit_core::row::row;
use synckit_core::{Error, SyncRequest, Value};

fn request(table: &str, sync_at: i64, payload: Vec<synckit_core::Row>) -> SyncRequest {
    SyncRequest {
        table_name: table.to_string(),
        sync_at,
        payload,
    }
}

// ============================================================================
// sync_table
// ============================================================================

#[tokio::test]
async fn test_sync_happy_path() {
    let tc = TestContext::new().await;
    tc.seed("acme.1", "x", 3).await;
    tc.seed("acme.2", "y", 7).await;
    let before = Utc::now().timestamp_millis();

    let response = tc
        .service
        .sync_table(&tc.ctx, "acme", request("t", 5, vec![t_row("acme.2", "y2")]))
        .await
        .unwrap();

    assert_eq!(response.identifiers, vec!["tenant_id"]);
    assert!(response.payload.is_empty(), "unexpected rows: {:?}", response.payload);

    let updated = tc.get("acme.2").await.unwrap();
    assert_eq!(updated["v"], Value::from("y2"));
    assert!(updated["sync_at"].as_i64().unwrap() >= before);
    // Columns outside the payload keep their server values.
    assert_eq!(updated["internal"], Value::from("server-only"));

    let untouched = tc.get("acme.1").await.unwrap();
    assert_eq!(untouched["v"], Value::from("x"));
    assert_eq!(untouched["sync_at"], Value::Int(3));
}

#[tokio::test]
async fn test_sync_scope_rejection_leaves_table_unchanged() {
    let tc = TestContext::new().await;
    tc.seed("acme.1", "x", 3).await;
    let before = tc.dump("t").await;

    // The valid first row must not be written either.
    let err = tc
        .service
        .sync_table(
            &tc.ctx,
            "acme",
            request("t", 0, vec![t_row("acme.5", "ok"), t_row("other.3", "z")]),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::BadScope { ref column, ref value, ref tenant }
            if column == "tenant_id" && value == "other.3" && tenant == "acme"),
        "unexpected error: {err:?}"
    );
    assert_eq!(tc.dump("t").await, before);
}

#[tokio::test]
async fn test_sync_returns_only_rows_the_client_did_not_send() {
    let tc = TestContext::new().await;
    tc.seed("acme.1", "x", 10).await;
    tc.seed("acme.2", "y", 11).await;
    tc.seed("acme.3", "z", 12).await;
    tc.seed("other.1", "foreign", 13).await;

    let response = tc
        .service
        .sync_table(
            &tc.ctx,
            "acme",
            request("t", 5, vec![t_row("acme.2", "y2"), t_row("acme.9", "new")]),
        )
        .await
        .unwrap();

    let mut returned: Vec<String> = response.payload.iter().map(|r| r["tenant_id"].to_string()).collect();
    returned.sort();
    assert_eq!(returned, vec!["acme.1", "acme.3"]);

    // Only descriptor columns travel back to the client.
    let first = &response.payload[0];
    assert!(first.contains_key("v"));
    assert!(first.contains_key("sync_at"));
    assert!(!first.contains_key("internal"));

    assert_eq!(tc.get("acme.9").await.unwrap()["v"], Value::from("new"));
}

#[tokio::test]
async fn test_sync_never_returns_rows_outside_the_tenant() {
    let tc = TestContext::new().await;
    tc.seed("acme.1", "mine", 1).await;
    tc.seed("ACME.2", "shouting", 1).await;

    // `_` is a LIKE wildcard and SQLite's LIKE ignores case.
    let wildcard = tc
        .service
        .sync_table(&tc.ctx, "a_me", request("t", 0, vec![]))
        .await
        .unwrap();
    assert!(wildcard.payload.is_empty(), "leaked: {:?}", wildcard.payload);

    let lower = tc
        .service
        .sync_table(&tc.ctx, "acme", request("t", 0, vec![]))
        .await
        .unwrap();
    let returned: Vec<String> = lower.payload.iter().map(|r| r["tenant_id"].to_string()).collect();
    assert_eq!(returned, vec!["acme.1"]);

    let upper = tc
        .service
        .sync_table(&tc.ctx, "ACME", request("t", 0, vec![]))
        .await
        .unwrap();
    let returned: Vec<String> = upper.payload.iter().map(|r| r["tenant_id"].to_string()).collect();
    assert_eq!(returned, vec!["ACME.2"]);
}

#[tokio::test]
async fn test_sync_drops_unknown_columns_and_dedupes_rows() {
    let tc = TestContext::new().await;

    let mut sneaky = t_row("acme.1", "first");
    sneaky.insert("internal".into(), Value::from("client-wrote-this"));
    sneaky.insert("not_a_column".into(), Value::Int(1));
    let payload = vec![sneaky, t_row("acme.1", "second")];

    tc.service
        .sync_table(&tc.ctx, "acme", request("t", 0, payload))
        .await
        .unwrap();

    let rows = tc.dump("t").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["v"], Value::from("second"));
    assert_eq!(rows[0]["internal"], Value::Null);
}

#[tokio::test]
async fn test_sync_rows_with_different_shapes() {
    let tc = TestContext::new().await;
    tc.seed("acme.1", "keep-me", 1).await;

    // The first row omits `v` and must not null it out.
    let payload = vec![
        row([("tenant_id", Value::from("acme.1"))]),
        t_row("acme.2", "b"),
    ];
    tc.service
        .sync_table(&tc.ctx, "acme", request("t", 0, payload))
        .await
        .unwrap();

    assert_eq!(tc.get("acme.1").await.unwrap()["v"], Value::from("keep-me"));
    assert_eq!(tc.get("acme.2").await.unwrap()["v"], Value::from("b"));
}

#[tokio::test]
async fn test_sync_upserts_in_batches() {
    let tc = TestContext::new().await;
    let payload: Vec<_> = (0..250)
        .map(|i| t_row(&format!("acme.{i}"), &format!("v{i}")))
        .collect();

    let response = tc
        .service
        .sync_table(&tc.ctx, "acme", request("t", 0, payload))
        .await
        .unwrap();

    assert!(response.payload.is_empty());
    assert_eq!(tc.dump("t").await.len(), 250);
}

#[tokio::test]
async fn test_sync_composite_key_with_skipped_prefix_check() {
    let tc = TestContext::new().await;
    let payload = vec![row([
        ("tenant_id", Value::from("acme.1")),
        ("line", Value::Int(2)),
        ("qty", Value::Float(1.5)),
    ])];

    let response = tc
        .service
        .sync_table(&tc.ctx, "acme", request("lines", 0, payload))
        .await
        .unwrap();
    assert_eq!(response.identifiers, vec!["tenant_id", "line"]);

    // A client that did not send the row gets it back.
    let second = tc
        .service
        .sync_table(&tc.ctx, "acme", request("lines", 0, vec![]))
        .await
        .unwrap();
    assert_eq!(second.payload.len(), 1);
    assert_eq!(second.payload[0]["qty"], Value::Float(1.5));
}

#[tokio::test]
async fn test_sync_missing_key_fails() {
    let tc = TestContext::new().await;
    let err = tc
        .service
        .sync_table(&tc.ctx, "acme", request("t", 0, vec![row([("v", Value::from("x"))])]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingKey { ref column } if column == "tenant_id"));
    assert!(tc.dump("t").await.is_empty());
}

#[tokio::test]
async fn test_sync_read_only_table_rejects_writes() {
    let tc = TestContext::new().await;

    let err = tc
        .service
        .sync_table(
            &tc.ctx,
            "acme",
            request("logs", 0, vec![row([("id", Value::Int(1)), ("msg", Value::from("hi"))])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(ref t) if t == "logs"));

    // Reading is still allowed; global tables ignore the tenant prefix.
    sqlx::query("INSERT INTO logs (msg, sync_at) VALUES ('boot', 1)")
        .execute(tc.store.pool())
        .await
        .unwrap();
    let response = tc
        .service
        .sync_table(&tc.ctx, "acme", request("logs", 999, vec![]))
        .await
        .unwrap();
    assert_eq!(response.identifiers, vec!["id"]);
    assert_eq!(response.payload.len(), 1, "full-sync tables ignore the watermark");
}

#[tokio::test]
async fn test_sync_request_errors() {
    let tc = TestContext::new().await;

    let err = tc
        .service
        .sync_table(&tc.ctx, "acme", request("missing", 0, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotRegistered(ref t) if t == "missing"));

    let err = tc
        .service
        .sync_table(&tc.ctx, "", request("t", 0, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    let err = tc
        .service
        .sync_table(&tc.ctx, "acme", request("  ", 0, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

// ============================================================================
// describe_tables
// ============================================================================

#[tokio::test]
async fn test_describe_tables() {
    let tc = TestContext::new().await;

    let infos = tc
        .service
        .describe_tables(
            &tc.ctx,
            "acme",
            vec!["t".into(), "lines".into(), "T".into(), "logs".into()],
        )
        .await
        .unwrap();

    let names: Vec<&str> = infos.iter().map(|i| i.table_name.as_str()).collect();
    assert_eq!(names, vec!["t", "lines", "logs"]);

    let t = &infos[0];
    assert_eq!(
        t.script,
        "CREATE TABLE IF NOT EXISTS t(tenant_id TEXT not null, v TEXT, sync_at INTEGER not null, PRIMARY KEY(tenant_id))"
    );
    assert_eq!(t.start_sync, 0);
    assert_eq!(t.retention_days, 0);
    assert!(!t.read_only);

    let lines = &infos[1];
    assert_eq!(lines.retention_days, 30);
    let thirty_days_ms = 30 * 24 * 60 * 60 * 1000;
    let expected = Utc::now().timestamp_millis() - thirty_days_ms;
    assert!((lines.start_sync - expected).abs() < 60_000);

    let logs = &infos[2];
    assert!(logs.read_only);
    assert_eq!(logs.start_sync, 0);
}

#[tokio::test]
async fn test_describe_tables_errors() {
    let tc = TestContext::new().await;

    let err = tc
        .service
        .describe_tables(&tc.ctx, "acme", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    let err = tc
        .service
        .describe_tables(&tc.ctx, "acme", vec!["t".into(), "nope".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotRegistered(ref t) if t == "nope"));
}

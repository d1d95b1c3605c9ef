//! API integration tests for the onchain-quest Axum endpoints.
//!
//! These tests drive the router with `tower::ServiceExt::oneshot`, without
//! binding a TCP listener. Every test builds a fresh router over the
//! in-memory store seeded with `common::sample_event()` and a scriptable
//! `FakeGateway`, so they always run and need no database or chain access.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test api_integration
//! ```
//!
//! The helpers `get()`, `post_json()` and `patch_json()` return
//! `(StatusCode, serde_json::Value)` tuples for concise assertions.

mod common;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{FakeGateway, ADMIN, ALICE, BOB};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!(null));
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

async fn patch_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::PATCH, uri, Some(body)).await
}

async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn load_profile(app: &Router, address: &str) -> Value {
    let (status, profile) = get(app, &format!("/api/profile?address={address}&eventId=1")).await;
    assert_eq!(status, StatusCode::OK, "{profile}");
    profile
}

async fn claim(app: &Router, address: &str, task_id: u32, payload: Value) -> (StatusCode, Value) {
    post_json(
        app,
        "/api/profile/claim",
        json!({"address": address, "eventId": 1, "taskId": task_id, "payload": payload}),
    )
    .await
}

async fn issue_tickets(app: &Router, gateway: &FakeGateway, count: u32) -> Vec<String> {
    FakeGateway::set(&gateway.signature_ok, true);
    let (status, body) = post_json(
        app,
        "/api/admin/tickets",
        json!({"address": ADMIN, "signature": "0xadmin", "eventId": 1, "count": count}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["tickets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect()
}

// ── Profiles ────────────────────────────────────────────────────

#[tokio::test]
async fn first_profile_load_completes_connect_wallet() {
    let (app, _) = common::build_memory_app();
    let mixed_case = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    let profile = load_profile(&app, mixed_case).await;
    assert_eq!(profile["address"], ALICE);
    assert_eq!(profile["score"], 5);
    assert_eq!(profile["tasks"]["0"]["isCompleted"], true);
    assert_eq!(profile["tasks"]["0"]["points"], 5);

    let again = load_profile(&app, ALICE).await;
    assert_eq!(again["id"], profile["id"]);
    assert_eq!(again["score"], 5);
}

#[tokio::test]
async fn malformed_address_is_rejected() {
    let (app, _) = common::build_memory_app();
    let (status, body) = get(&app, "/api/profile?address=0x123&eventId=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let (app, _) = common::build_memory_app();
    let (status, body) = get(&app, &format!("/api/profile?address={ALICE}&eventId=42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Event not found");
}

#[tokio::test]
async fn username_is_unique_within_event() {
    let (app, _) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    load_profile(&app, BOB).await;

    let (status, profile) = patch_json(
        &app,
        "/api/profile",
        json!({"address": ALICE, "eventId": 1, "username": "alice"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["username"], "alice");

    let (status, body) = patch_json(
        &app,
        "/api/profile",
        json!({"address": BOB, "eventId": 1, "username": "alice"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Username already taken");
}

// ── Quests ──────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_claim_never_double_counts() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.poap, true);

    let (status, body) = claim(&app, ALICE, 2, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["profile"]["score"], 25);

    let (status, body) = claim(&app, ALICE, 3, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["profile"]["score"], 30);
    assert_eq!(body["profile"]["tasks"]["3"]["isCompleted"], true);

    let (status, body) = claim(&app, ALICE, 3, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Task already completed");
    assert_eq!(load_profile(&app, ALICE).await["score"], 30);
}

#[tokio::test]
async fn locked_task_requires_its_prerequisite() {
    let (app, _) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    let (status, body) = claim(&app, ALICE, 3, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Complete \"Claim POAP\" first");
    assert_eq!(load_profile(&app, ALICE).await["score"], 5);
}

#[tokio::test]
async fn claim_without_profile_is_not_found() {
    let (app, _) = common::build_memory_app();
    let (status, body) = claim(&app, BOB, 1, json!({"username": "bob"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Profile not found");
}

#[tokio::test]
async fn out_of_range_task_is_invalid() {
    let (app, _) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    let (status, body) = claim(&app, ALICE, 99, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid task");

    for task_id in [json!(-1), json!(2.5), json!("two")] {
        let (status, body) = post_json(
            &app,
            "/api/profile/claim",
            json!({"address": ALICE, "eventId": 1, "taskId": task_id, "payload": {}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "taskId {task_id}");
        assert_eq!(body["message"], "Invalid task", "taskId {task_id}");
    }
}

#[tokio::test]
async fn setup_profile_stores_fields_and_points() {
    let (app, _) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    let (status, body) = claim(
        &app,
        ALICE,
        1,
        json!({"username": "alice", "role": "mentor", "avatar": "https://img/a.png"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let profile = &body["profile"];
    assert_eq!(profile["username"], "alice");
    assert_eq!(profile["role"], "mentor");
    assert_eq!(profile["score"], 15);
}

#[tokio::test]
async fn failed_poap_proof_is_rejected_without_mutation() {
    let (app, _) = common::build_memory_app();
    let before = load_profile(&app, ALICE).await;
    let (status, body) = claim(&app, ALICE, 2, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "POAP not found for this address");
    let after = load_profile(&app, ALICE).await;
    assert_eq!(after["tasks"], before["tasks"]);
    assert_eq!(after["score"], before["score"]);
}

#[tokio::test]
async fn token_payout_records_transaction() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;

    let (status, body) = claim(&app, ALICE, 4, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Complete \"Claim POAP\" first");

    FakeGateway::set(&gateway.poap, true);
    claim(&app, ALICE, 2, json!({})).await;
    let (status, body) = claim(&app, ALICE, 4, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["profile"]["score"], 40);
    assert!(body["profile"]["tasks"]["4"]["txLink"]
        .as_str()
        .unwrap()
        .starts_with("https://basescan.org/tx/"));
    assert_eq!(gateway.payouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_payout_does_not_complete_task() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.poap, true);
    claim(&app, ALICE, 2, json!({})).await;

    FakeGateway::set(&gateway.chain_down, true);
    let (status, body) = claim(&app, ALICE, 4, json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["message"], "Transaction failed");
    let profile = load_profile(&app, ALICE).await;
    assert_eq!(profile["score"], 25);
    assert_ne!(profile["tasks"]["4"]["isCompleted"], true);

    // The reservation is released, so a retry goes through.
    FakeGateway::set(&gateway.chain_down, false);
    let (status, _) = claim(&app, ALICE, 4, json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reserved_subname_is_rejected_before_anything_else() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.signature_ok, true);

    // POAP not claimed, signature valid: still rejected as reserved.
    let (status, body) = claim(
        &app,
        ALICE,
        5,
        json!({"subname": "didier", "signature": "0xsig"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Subname is reserved");

    // Same without a signature.
    let (_, body) = claim(&app, ALICE, 5, json!({"subname": "Didier"})).await;
    assert_eq!(body["message"], "Subname is reserved");
}

#[tokio::test]
async fn subname_claim_registers_under_parent() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.poap, true);
    FakeGateway::set(&gateway.signature_ok, true);
    claim(&app, ALICE, 2, json!({})).await;

    let (status, body) = claim(
        &app,
        ALICE,
        5,
        json!({"subname": "alice", "signature": "0xsig"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["profile"]["subname"], "alice.onchainquest.eth");
    assert_eq!(body["profile"]["score"], 50);

    load_profile(&app, BOB).await;
    claim(&app, BOB, 2, json!({})).await;
    let payload = json!({"subname": "alice", "signature": "0xsig"});
    let (status, body) = claim(&app, BOB, 5, payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Subname already taken");
}

#[tokio::test]
async fn concurrent_subname_claims_have_one_winner() {
    let (app, gateway) = common::build_memory_app();
    FakeGateway::set(&gateway.poap, true);
    FakeGateway::set(&gateway.signature_ok, true);
    for who in [ALICE, BOB] {
        load_profile(&app, who).await;
        claim(&app, who, 2, json!({})).await;
    }

    // Both claims pass the signature check together, so both also see the
    // name as free before either reserves it.
    gateway.gate_signatures(2);
    let payload = json!({"subname": "samename", "signature": "0xsig"});
    let (a, b) = tokio::join!(
        claim(&app, ALICE, 5, payload.clone()),
        claim(&app, BOB, 5, payload.clone()),
    );
    let (winner, loser, loser_status, loser_body) = match (a, b) {
        ((StatusCode::OK, _), (status, body)) => (ALICE, BOB, status, body),
        ((status, body), (StatusCode::OK, _)) => (BOB, ALICE, status, body),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(loser_status, StatusCode::BAD_REQUEST);
    assert_eq!(loser_body["message"], "Subname already taken");
    assert_eq!(gateway.subnames.load(Ordering::SeqCst), 1);

    let won = load_profile(&app, winner).await;
    assert_eq!(won["subname"], "samename.onchainquest.eth");
    let lost = load_profile(&app, loser).await;
    assert!(lost["subname"].is_null());
    assert!(lost["tasks"]["5"].is_null(), "{lost}");

    // The loser can still claim a free name afterwards.
    let (status, body) = claim(
        &app,
        loser,
        5,
        json!({"subname": "othername", "signature": "0xsig"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["profile"]["subname"], "othername.onchainquest.eth");
}

#[tokio::test]
async fn doubled_token_claim_pays_out_once() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.poap, true);
    claim(&app, ALICE, 2, json!({})).await;

    let (a, b) = tokio::join!(
        claim(&app, ALICE, 4, json!({})),
        claim(&app, ALICE, 4, json!({})),
    );
    let statuses = [a.0, b.0];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert!(statuses.contains(&StatusCode::BAD_REQUEST));
    assert_eq!(gateway.payouts.load(Ordering::SeqCst), 1);

    let profile = load_profile(&app, ALICE).await;
    assert_eq!(profile["score"], 40);
}

#[tokio::test]
async fn leaderboard_orders_by_score() {
    let (app, gateway) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    load_profile(&app, BOB).await;
    FakeGateway::set(&gateway.poap, true);
    claim(&app, BOB, 2, json!({})).await;

    let (status, board) = get(&app, "/api/leaderboard?eventId=1").await;
    assert_eq!(status, StatusCode::OK);
    let board = board.as_array().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["address"], BOB);
    assert_eq!(board[0]["score"], 25);
    assert_eq!(board[1]["address"], ALICE);

    let (_, limited) = get(&app, "/api/leaderboard?eventId=1&limit=1").await;
    assert_eq!(limited.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn leaderboard_hides_private_fields() {
    let (app, _) = common::build_memory_app();
    load_profile(&app, ALICE).await;
    let (status, _) = patch_json(
        &app,
        "/api/profile",
        json!({
            "address": ALICE,
            "eventId": 1,
            "username": "alice",
            "email": "alice@private.example",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, board) = get(&app, "/api/leaderboard?eventId=1").await;
    let row = board[0].as_object().unwrap();
    assert_eq!(row["username"], "alice");
    for private in ["email", "tasks", "id", "updatedAt", "createdAt"] {
        assert!(!row.contains_key(private), "leaderboard exposes {private}");
    }
}

#[tokio::test]
async fn event_exposes_normalised_tasks() {
    let (app, _) = common::build_memory_app();
    let (status, event) = get(&app, "/api/events/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["name"], "Istanbul Onchain Quest");
    let tasks = event["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 6);
    assert_eq!(tasks[3]["lock"], 2);
    assert_eq!(tasks[5]["requiresTaskId"], 2);
}

// ── Admin ───────────────────────────────────────────────────────

#[tokio::test]
async fn admin_routes_require_allowlist_and_signature() {
    let (app, gateway) = common::build_memory_app();

    // Allowlisted, bad signature.
    let (status, body) = post_json(
        &app,
        "/api/admin/tickets",
        json!({"address": ADMIN, "signature": "0xbad", "eventId": 1, "count": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Unauthorized");

    // Valid signature, not allowlisted.
    FakeGateway::set(&gateway.signature_ok, true);
    let (status, _) = post_json(
        &app,
        "/api/admin/tickets",
        json!({"address": BOB, "signature": "0xsig", "eventId": 1, "count": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_issues_distinct_codes() {
    let (app, gateway) = common::build_memory_app();
    let codes = issue_tickets(&app, &gateway, 10).await;
    assert_eq!(codes.len(), 10);
    let unique: std::collections::HashSet<_> = codes.iter().collect();
    assert_eq!(unique.len(), 10);
    for code in &codes {
        assert_eq!(code.len(), 6);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    let (status, body) = post_json(
        &app,
        "/api/admin/tickets/list",
        json!({"address": ADMIN, "signature": "0xadmin", "eventId": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["tickets"].as_array().unwrap();
    assert_eq!(listed.len(), 10);
    assert!(listed
        .iter()
        .all(|t| t["isUsed"] == false && t["userId"].is_null()));
}

#[tokio::test]
async fn admin_issue_count_is_bounded() {
    let (app, gateway) = common::build_memory_app();
    FakeGateway::set(&gateway.signature_ok, true);
    for count in [0, 101] {
        let (status, _) = post_json(
            &app,
            "/api/admin/tickets",
            json!({"address": ADMIN, "signature": "0xsig", "eventId": 1, "count": count}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn admin_reset_deletes_own_profile() {
    let (app, gateway) = common::build_memory_app();
    let first = load_profile(&app, ADMIN).await;
    FakeGateway::set(&gateway.signature_ok, true);
    let (status, body) = post_json(
        &app,
        "/api/admin/reset-profile",
        json!({"address": ADMIN, "signature": "0xsig", "eventId": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
    let second = load_profile(&app, ADMIN).await;
    assert_ne!(second["id"], first["id"]);
}

// ── Tickets ─────────────────────────────────────────────────────

#[tokio::test]
async fn ticket_is_consumed_exactly_once() {
    let (app, gateway) = common::build_memory_app();
    let code = issue_tickets(&app, &gateway, 1).await.remove(0);
    let alice = load_profile(&app, ALICE).await;
    load_profile(&app, BOB).await;

    let (status, view) = get(&app, &format!("/api/ticket/{code}?eventId=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["valid"], true);
    assert_eq!(view["isUsed"], false);

    let (status, receipt) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": ALICE, "eventId": 1, "ticketCode": code.to_lowercase()}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["ticketCode"], code.as_str());
    assert_eq!(receipt["userId"], alice["id"]);
    assert_eq!(receipt["attestationTxLink"], "https://basescan.org/tx/0xatt");

    let (status, body) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": BOB, "eventId": 1, "ticketCode": code}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Ticket already used");

    let (_, view) = get(&app, &format!("/api/ticket/{code}?eventId=1")).await;
    assert_eq!(view["valid"], false);
    assert_eq!(view["isUsed"], true);
    assert_eq!(view["ticketOwner"]["address"], ALICE);
    assert!(view["usedAt"].is_string());
}

#[tokio::test]
async fn concurrent_association_has_one_winner() {
    let (app, gateway) = common::build_memory_app();
    let code = issue_tickets(&app, &gateway, 1).await.remove(0);
    load_profile(&app, ALICE).await;
    load_profile(&app, BOB).await;

    let associate = |who: &'static str| {
        post_json(
            &app,
            "/api/ticket/associate",
            json!({"address": who, "eventId": 1, "ticketCode": code}),
        )
    };
    let ((a, a_body), (b, b_body)) = tokio::join!(associate(ALICE), associate(BOB));
    let mut statuses = [a, b];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);
    let loser = if a == StatusCode::OK { b_body } else { a_body };
    assert_eq!(loser["message"], "Ticket already used");

    let (_, view) = get(&app, &format!("/api/ticket/{code}?eventId=1")).await;
    assert_eq!(view["isUsed"], true);
    let winner = if a == StatusCode::OK { ALICE } else { BOB };
    assert_eq!(view["ticketOwner"]["address"], winner);
    assert_eq!(gateway.attestations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn profile_holds_at_most_one_ticket() {
    let (app, gateway) = common::build_memory_app();
    let codes = issue_tickets(&app, &gateway, 2).await;
    load_profile(&app, ALICE).await;

    let (status, _) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": ALICE, "eventId": 1, "ticketCode": codes[0]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": ALICE, "eventId": 1, "ticketCode": codes[1]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User already has a ticket for this event");
}

#[tokio::test]
async fn attestation_failure_does_not_fail_association() {
    let (app, gateway) = common::build_memory_app();
    let code = issue_tickets(&app, &gateway, 1).await.remove(0);
    load_profile(&app, ALICE).await;
    FakeGateway::set(&gateway.attest_down, true);

    let (status, receipt) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": ALICE, "eventId": 1, "ticketCode": code}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(receipt["attestationTxLink"].is_null());

    let (_, metrics) = get_text(&app, "/metrics").await;
    assert!(metrics.contains("onchain_quest_attestation_failures_total 1"));
}

#[tokio::test]
async fn association_requires_profile() {
    let (app, gateway) = common::build_memory_app();
    let code = issue_tickets(&app, &gateway, 1).await.remove(0);
    let (status, body) = post_json(
        &app,
        "/api/ticket/associate",
        json!({"address": BOB, "eventId": 1, "ticketCode": code}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn unknown_and_malformed_codes() {
    let (app, _) = common::build_memory_app();
    let (status, body) = get(&app, "/api/ticket/ZZZZ99?eventId=1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Ticket not found");

    let (status, _) = get(&app, "/api/ticket/AB-12?eventId=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Health and middleware ───────────────────────────────────────

#[tokio::test]
async fn health_endpoints_respond() {
    let (app, _) = common::build_memory_app();
    assert_eq!(get_text(&app, "/healthz").await.0, StatusCode::OK);
    assert_eq!(get_text(&app, "/readyz").await.0, StatusCode::OK);
    let (status, body) = get_text(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("onchain_quest_http_request_duration_seconds"));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let (app, _) = common::build_memory_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let (app, _) = common::build_memory_app();
    let (status, body) = post_json(&app, "/api/profile/claim", json!({"address": ALICE})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

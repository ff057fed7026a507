// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use fabstir_sim_node::crypto::{NodeKeypair, HEADER_NODE_TS};

use crate::common::{
    account_post, body_json, chunk_result, signed_post, sim_config, test_app,
};

#[tokio::test]
async fn test_node_lifecycle_over_http() {
    let (app, state) = test_app().await;
    let keypair = NodeKeypair::generate();

    // Register twice: same identity both times
    let response = app
        .clone()
        .oneshot(signed_post(
            &keypair,
            "/functions/v1/node-register",
            &json!({ "hostname": "rig-1", "totalCores": 8, "enabledCores": 6 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["claimCode"], keypair.claim_code());
    assert_eq!(first["claimed"], false);

    let again = body_json(
        app.clone()
            .oneshot(signed_post(&keypair, "/functions/v1/node-register", &json!({})))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(again["id"], first["id"]);
    assert_eq!(state.metrics.nodes_registered.get(), 1);

    // Unclaimed nodes are not kept alive
    let response = app
        .clone()
        .oneshot(signed_post(
            &keypair,
            "/functions/v1/node-heartbeat",
            &json!({ "status": "online" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(account_post(
            "alice",
            "/functions/v1/node-claim",
            &json!({ "claimCode": keypair.claim_code() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(signed_post(
            &keypair,
            "/functions/v1/node-heartbeat",
            &json!({ "status": "online" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let beat = body_json(response).await;
    assert_eq!(beat["status"], "online");
    assert_eq!(beat["maxParallel"], 6);

    // Queue a job owned by the same account, then claim and complete it
    let hash = body_json(
        app.clone()
            .oneshot(account_post(
                "alice",
                "/functions/v1/config-upsert",
                &json!({ "config": sim_config("fire-mage") }),
            ))
            .await
            .unwrap(),
    )
    .await["hash"]
        .as_str()
        .unwrap()
        .to_string();
    let created = body_json(
        app.clone()
            .oneshot(account_post(
                "alice",
                "/functions/v1/job-create",
                &json!({ "configHash": hash, "iterations": 500 }),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(created["chunks"], 1);

    let claimed = body_json(
        app.clone()
            .oneshot(signed_post(
                &keypair,
                "/functions/v1/chunk-claim",
                &json!({ "batchSize": 3 }),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(claimed["configHash"], hash.as_str());
    let chunks = claimed["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["iterations"], 500);
    assert_eq!(chunks[0]["seedOffset"], 0);

    let complete = json!({
        "chunkId": chunks[0]["id"],
        "result": serde_json::to_value(chunk_result(500, 250.0)).unwrap(),
    });
    let report = body_json(
        app.clone()
            .oneshot(signed_post(&keypair, "/functions/v1/chunk-complete", &complete))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(report["success"], true);
    assert_eq!(report["jobComplete"], true);

    // Resubmission is acknowledged but not counted twice
    let repeat = body_json(
        app.clone()
            .oneshot(signed_post(&keypair, "/functions/v1/chunk-complete", &complete))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(repeat["alreadyCompleted"], true);
    assert_eq!(state.metrics.chunks_completed.get(), 1);
    assert_eq!(state.metrics.jobs_completed.get(), 1);
    assert_eq!(state.metrics.chunks_claimed.get(), 1);
}

#[tokio::test]
async fn test_claim_with_empty_body_uses_default_batch() {
    let (app, _state) = test_app().await;
    let keypair = NodeKeypair::generate();
    app.clone()
        .oneshot(signed_post(&keypair, "/functions/v1/node-register", &json!({})))
        .await
        .unwrap();
    app.clone()
        .oneshot(account_post(
            "bob",
            "/functions/v1/node-claim",
            &json!({ "claimCode": keypair.claim_code() }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(signed_post(&keypair, "/functions/v1/chunk-claim", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let batch = body_json(response).await;
    assert!(batch["chunks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsigned_request_is_rejected() {
    let (app, state) = test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/functions/v1/node-register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error_type"], "unauthorized");
    assert_eq!(
        state
            .metrics
            .auth_failures
            .with_label_values(&["missing_headers"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_body_swapped_after_signing_is_rejected() {
    let (app, state) = test_app().await;
    let keypair = NodeKeypair::generate();
    let signed = signed_post(&keypair, "/functions/v1/node-register", &json!({}));
    let (parts, _) = signed.into_parts();
    let tampered = Request::from_parts(parts, Body::from(r#"{"hostname":"evil"}"#));

    let response = app.oneshot(tampered).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        state
            .metrics
            .auth_failures
            .with_label_values(&["bad_signature"])
            .get(),
        1
    );
    assert_eq!(state.metrics.nodes_registered.get(), 0);
}

#[tokio::test]
async fn test_signature_for_other_path_is_rejected() {
    let (app, _state) = test_app().await;
    let keypair = NodeKeypair::generate();
    let signed = signed_post(&keypair, "/functions/v1/node-register", &json!({}));
    let (mut parts, body) = signed.into_parts();
    parts.uri = "/functions/v1/chunk-claim".parse().unwrap();

    let response = app
        .oneshot(Request::from_parts(parts, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let (app, state) = test_app().await;
    let keypair = NodeKeypair::generate();
    let signed = signed_post(&keypair, "/functions/v1/node-register", &json!({}));
    let (mut parts, body) = signed.into_parts();
    parts
        .headers
        .insert(HEADER_NODE_TS, "1000000000".parse().unwrap());

    let response = app
        .oneshot(Request::from_parts(parts, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        state
            .metrics
            .auth_failures
            .with_label_values(&["expired"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_completing_someone_elses_chunk_is_forbidden() {
    let (app, _state) = test_app().await;
    let owner = NodeKeypair::generate();
    let intruder = NodeKeypair::generate();
    for (keypair, account) in [(&owner, "carol"), (&intruder, "mallory")] {
        app.clone()
            .oneshot(signed_post(keypair, "/functions/v1/node-register", &json!({})))
            .await
            .unwrap();
        app.clone()
            .oneshot(account_post(
                account,
                "/functions/v1/node-claim",
                &json!({ "claimCode": keypair.claim_code() }),
            ))
            .await
            .unwrap();
    }
    let hash = body_json(
        app.clone()
            .oneshot(account_post(
                "carol",
                "/functions/v1/config-upsert",
                &json!({ "config": sim_config("scorch-only") }),
            ))
            .await
            .unwrap(),
    )
    .await["hash"]
        .clone();
    app.clone()
        .oneshot(account_post(
            "carol",
            "/functions/v1/job-create",
            &json!({ "configHash": hash, "iterations": 100 }),
        ))
        .await
        .unwrap();
    let claimed = body_json(
        app.clone()
            .oneshot(signed_post(&owner, "/functions/v1/chunk-claim", &json!({})))
            .await
            .unwrap(),
    )
    .await;
    let chunk_id = claimed["chunks"][0]["id"].clone();

    let response = app
        .oneshot(signed_post(
            &intruder,
            "/functions/v1/chunk-complete",
            &json!({
                "chunkId": chunk_id,
                "result": serde_json::to_value(chunk_result(100, 10.0)).unwrap(),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL database running (with migrations applied)
//! 2. Redis running
//! 3. API server running on configured port
//! 4. Worker process running
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod helpers;

use helpers::*;
use serde_json::json;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    println!("✓ Health check passed");
}

#[tokio::test]
#[ignore] // Requires running API server and bucket access
async fn test_e2e_list_datasets() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/datasets", base_url))
        .send()
        .await
        .expect("Dataset listing failed");
    assert!(response.status().is_success(), "status {}", response.status());

    let body: serde_json::Value = response.json().await.unwrap();
    let dates = body["dates"].as_array().expect("dates array");
    println!("✓ {} snapshot(s) published", dates.len());

    // Dates are returned newest first.
    let dates: Vec<&str> = dates.iter().filter_map(|d| d.as_str()).collect();
    let mut sorted = dates.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(dates, sorted);
}

#[tokio::test]
#[ignore]
async fn test_e2e_rejects_malformed_date() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/datasets/31-10-2024", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&json!({"kind": "import", "date": "yesterday"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore]
async fn test_e2e_unknown_job_is_not_found() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/jobs/{}", base_url, uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_validation_job() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let created = submit_job(&client, &base_url, json!({"kind": "validate"}))
        .await
        .expect("Failed to submit validation job");
    assert_eq!(created.status, "pending");
    println!("  ✓ Submitted, job_id: {}", created.job_id);

    let job = poll_job_status(&client, &base_url, created.job_id, 300)
        .await
        .expect("Failed to wait for validation job");
    println!("  ✓ Job finished with status: {} ({})", job.status, job.message);

    assert_eq!(job.kind, "validate");
    assert_eq!(job.target, "database");
    if job.status == "succeeded" {
        let result = job.result.expect("succeeded job carries a result");
        assert_eq!(result["kind"], "validate");
        assert!(result["data"]["categories"].is_array());
    } else {
        println!("  ⚠ Job failed: {:?}", job.failure);
    }
}

#[tokio::test]
#[ignore]
async fn test_e2e_database_status() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/database/status", base_url))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    let tables = body["tables"].as_object().expect("tables object");
    assert_eq!(tables.len(), 8);
    let sum: i64 = tables.values().filter_map(|v| v.as_i64()).sum();
    assert_eq!(body["total_rows"].as_i64(), Some(sum));
}

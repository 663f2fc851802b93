//! Test helper utilities for E2E testing

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /api/v1/jobs
#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response from GET /api/v1/jobs/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub kind: String,
    pub target: String,
    pub status: String,
    pub progress: f64,
    pub message: String,
    pub cancel_requested: bool,
    pub failure: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

/// Submit a job to the API
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> Result<JobCreatedResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<JobCreatedResponse>().await?)
}

/// Poll job status until succeeded or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "succeeded" | "failed" => return Ok(status_response),
            "pending" | "running" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!(
                        "  ... still waiting (attempt {}/{}, {:.0}%: {})",
                        attempt,
                        max_attempts,
                        status_response.progress * 100.0,
                        status_response.message
                    );
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}

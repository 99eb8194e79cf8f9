//! Terminal-state webhook notification (§4.5 "Notifications").

use std::time::Duration;

use serde_json::Value;

/// Fires a best-effort POST to `url`. Failures are logged and otherwise
/// swallowed: a broken webhook must never fail the job itself.
pub async fn notify(client: &reqwest::Client, url: &str, payload: &Value) {
    let result = client
        .post(url)
        .timeout(Duration::from_secs(10))
        .json(payload)
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(url, "job webhook delivered");
        }
        Ok(resp) => {
            tracing::warn!(url, status = %resp.status(), "job webhook returned non-success status");
        }
        Err(err) => {
            tracing::warn!(url, error = %err, "job webhook delivery failed");
        }
    }
}

//! `repairdesk postback`: replay a signed LINE postback against a running server.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use repairdesk::config::{DEFAULT_DB_PATH, DeskConfig};
use repairdesk::desk::line::{
    PostbackAction, SIGNATURE_HEADER, WebhookEvent, WebhookPayload, sign_body,
};

pub async fn cmd_postback(
    url: &str,
    action: PostbackAction,
    job_id: &str,
    user_id: &str,
) -> Result<()> {
    let line = DeskConfig::from_env(PathBuf::from(DEFAULT_DB_PATH)).line;
    let Some(secret) = line.channel_secret.as_deref() else {
        bail!("LINE_CHANNEL_SECRET is not set");
    };

    let payload = WebhookPayload {
        destination: Some("U_TEST_DEST".to_string()),
        events: vec![WebhookEvent::postback(
            &action.postback_data(job_id),
            user_id,
            "TEST_REPLY_TOKEN",
        )],
    };
    let body = serde_json::to_string(&payload).context("Failed to encode webhook payload")?;
    let signature =
        sign_body(secret, body.as_bytes()).context("Failed to sign webhook payload")?;

    println!("Posting to: {}", url);
    println!("{}: {}", SIGNATURE_HEADER, signature);

    let resp = reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, &signature)
        .body(body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    println!("status: {}", status.as_u16());
    println!("body: {}", text);

    if !status.is_success() {
        bail!("Webhook answered {}", status);
    }
    Ok(())
}

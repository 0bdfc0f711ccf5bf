//! Background check for a newer published release.
//!
//! Fired once when the chat starts; the result is held until exit so the
//! notice never interrupts a conversation. Every failure is silent: an
//! update hint is never worth an error message.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use serde::Deserialize;

use crate::providers::shared::USER_AGENT;

const REGISTRY_URL: &str = "https://crates.io/api/v1/crates/ais";
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

static PENDING_NOTICE: OnceLock<Mutex<Option<String>>> = OnceLock::new();

fn notice_slot() -> &'static Mutex<Option<String>> {
    PENDING_NOTICE.get_or_init(|| Mutex::new(None))
}

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    max_version: String,
}

/// Spawns the registry lookup. Returns immediately.
pub fn spawn(current_version: &'static str) {
    tokio::spawn(async move {
        if let Some(latest) = fetch_latest_version().await
            && is_newer(&latest, current_version)
        {
            let notice = format!(
                "A new version of ais is available: {latest} (you have {current_version}). Run `cargo install ais` to update."
            );
            if let Ok(mut slot) = notice_slot().lock() {
                *slot = Some(notice);
            }
        }
    });
}

/// Takes the pending notice, if the check finished and found one.
pub fn take_notice() -> Option<String> {
    notice_slot().lock().ok()?.take()
}

async fn fetch_latest_version() -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(CHECK_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .ok()?;

    let response = client.get(REGISTRY_URL).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }

    let parsed: RegistryResponse = response.json().await.ok()?;
    Some(parsed.krate.max_version)
}

/// Numeric dotted-version comparison; anything unparseable compares as 0.
fn is_newer(latest: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (latest, current) = (parse(latest), parse(current));
    for i in 0..latest.len().max(current.len()) {
        let l = latest.get(i).copied().unwrap_or(0);
        let c = current.get(i).copied().unwrap_or(0);
        if l != c {
            return l > c;
        }
    }
    false
}

use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::model::{NotificationEvent, Release};

const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_MARGIN_SECS: f64 = 0.5;
const BACKOFF_CAP_SECS: f64 = 30.0;
const DESCRIPTION_LIMIT: usize = 2000;

const COLOR_PRERELEASE: u32 = 15258703;
const COLOR_STABLE: u32 = 5763719;

/// One webhook delivery target.
///
/// The payload carries flat `content`/`text` fields alongside a
/// structured embed so Discord-, Slack- and DingTalk-shaped receivers all
/// render something sensible.
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: String, url: String) -> Self {
        // No retry middleware here: 429 handling is hand-rolled below and
        // a blanket retry would duplicate deliveries.
        let client = crate::http_client::http_client_builder()
            .build()
            .unwrap_or_default();
        Self { name, url, client }
    }

    /// Delivers one event, honoring upstream rate limits.
    ///
    /// 429 responses wait for the indicated interval before retrying with
    /// the identical payload, up to four attempts. Other HTTP errors are
    /// terminal. Transport errors back off exponentially (1 s, 2 s, 4 s).
    pub async fn notify(&self, event: NotificationEvent, release: &Release) -> anyhow::Result<()> {
        let payload = build_payload(event, release);

        for attempt in 0..MAX_ATTEMPTS {
            let sent = self.client.post(&self.url).json(&payload).send().await;
            match sent {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        anyhow::bail!("rate limited after {MAX_ATTEMPTS} attempts");
                    }
                    let wait = rate_limit_backoff(resp).await;
                    warn!(
                        notifier = %self.name,
                        "429 from webhook (attempt {}/{MAX_ATTEMPTS}), waiting {:.1}s",
                        attempt + 1,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(resp) => {
                    resp.error_for_status()
                        .context("webhook rejected the payload")?;
                    debug!(notifier = %self.name, "delivered on attempt {}", attempt + 1);
                    return Ok(());
                }
                Err(e) => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(anyhow::anyhow!(e).context("webhook unreachable"));
                    }
                    let wait = Duration::from_secs(1u64 << attempt);
                    warn!(
                        notifier = %self.name,
                        "webhook transport error (attempt {}/{MAX_ATTEMPTS}), \
                         retrying in {}s: {e}",
                        attempt + 1,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
        unreachable!("loop returns or bails before exhausting attempts")
    }
}

/// Backoff for a 429 response: the `Retry-After` header in seconds, else
/// the JSON body's `retry_after` (values over 60 follow the millisecond
/// convention), else one second. A safety margin is added and the total
/// capped.
async fn rate_limit_backoff(resp: reqwest::Response) -> Duration {
    let header = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok());
    let body = match header {
        Some(_) => None,
        None => resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("retry_after").and_then(Value::as_f64)),
    };
    Duration::from_secs_f64(backoff_secs(header, body))
}

fn backoff_secs(header: Option<f64>, body: Option<f64>) -> f64 {
    let base = header
        .or(body.map(|raw| if raw > 60.0 { raw / 1000.0 } else { raw }))
        .unwrap_or(1.0);
    (base + BACKOFF_MARGIN_SECS).min(BACKOFF_CAP_SECS)
}

fn build_payload(event: NotificationEvent, release: &Release) -> Value {
    let mut message = format!(
        "[{}] {}: {}",
        release.tracker_name,
        event.title(),
        release.version
    );
    if release.prerelease {
        message.push_str(" (Pre-release)");
    }

    let description = release
        .body
        .as_deref()
        .filter(|b| !b.is_empty())
        .map(|b| expand_shortcodes(&b.chars().take(DESCRIPTION_LIMIT).collect::<String>()))
        .unwrap_or_else(|| "No release notes".to_string());

    let color = if release.prerelease { COLOR_PRERELEASE } else { COLOR_STABLE };
    let published = release.published_at.to_rfc3339();
    let channel = release
        .channel_name
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|| "N/A".to_string());

    json!({
        "event": event.as_str(),
        "tracker": release.tracker_name,
        "version": release.version,
        "content": message,
        "text": message,
        "embeds": [{
            "title": format!("{} {}", release.tracker_name, release.version),
            "description": description,
            "url": release.url,
            "color": color,
            "fields": [
                {"name": "Tag", "value": release.tag_name, "inline": true},
                {"name": "Channel", "value": channel, "inline": true},
                {"name": "Published", "value": published, "inline": true},
            ],
            "footer": {"text": format!("Event: {}", event.as_str())},
            "timestamp": published,
        }],
    })
}

/// Expands the common `:shortcode:` emoji found in release notes. Unknown
/// codes pass through untouched.
fn expand_shortcodes(text: &str) -> String {
    static TABLE: &[(&str, &str)] = &[
        ("smile", "😄"),
        ("tada", "🎉"),
        ("rocket", "🚀"),
        ("bug", "🐛"),
        ("sparkles", "✨"),
        ("fire", "🔥"),
        ("zap", "⚡"),
        ("warning", "⚠️"),
        ("memo", "📝"),
        ("package", "📦"),
        ("art", "🎨"),
        ("wrench", "🔧"),
        ("hammer", "🔨"),
        ("lock", "🔒"),
        ("books", "📚"),
        ("recycle", "♻️"),
        ("heart", "❤️"),
        ("star", "⭐"),
        ("construction", "🚧"),
        ("white_check_mark", "✅"),
        ("arrow_up", "⬆️"),
        ("arrow_down", "⬇️"),
        ("+1", "👍"),
    ];

    let re = regex::Regex::new(r":([a-z0-9_+-]+):").expect("shortcode pattern is valid");
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        TABLE
            .iter()
            .find(|(name, _)| *name == code)
            .map(|(_, emoji)| emoji.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

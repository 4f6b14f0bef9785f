mod webhook;

pub use webhook::WebhookNotifier;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::model::{NotificationEvent, Release};
use crate::store::Store;

/// Fans one event out to every enabled notifier subscribed to it.
///
/// The notifier set is re-read from the store at dispatch time rather
/// than cached, so runtime configuration changes take effect on the next
/// event and a stale cache can never double-send. Deliveries run in
/// parallel; an individual failure is logged and does not abort the rest.
pub async fn dispatch(store: &Store, event: NotificationEvent, release: &Release) {
    let notifiers = match store.notifiers_for_event(event).await {
        Ok(notifiers) => notifiers,
        Err(e) => {
            error!("failed to load notifiers: {e}");
            return;
        }
    };
    if notifiers.is_empty() {
        debug!("no notifier subscribed to {}", event.as_str());
        return;
    }
    info!(
        "dispatching {} for {} {} to {} notifier(s)",
        event.as_str(),
        release.tracker_name,
        release.version,
        notifiers.len()
    );

    let sends = notifiers
        .into_iter()
        .filter(|n| n.kind == "webhook")
        .map(|notifier| async move {
            let webhook = WebhookNotifier::new(notifier.name.clone(), notifier.url.clone());
            if let Err(e) = webhook.notify(event, release).await {
                warn!(notifier = %notifier.name, "webhook delivery failed: {e}");
            }
        });
    join_all(sends).await;
}

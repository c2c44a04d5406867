use crate::jobs::JobQueue;
use crate::models::{ListingJob, QueueMessage};
use futures::StreamExt;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Subscribes to the listing channel and feeds each message to the job
/// queue. Reconnects after a fixed delay when the subscription drops.
pub async fn run_subscriber(client: redis::Client, channel: String, queue: JobQueue) {
    loop {
        match subscribe_once(&client, &channel, &queue).await {
            Ok(()) => warn!(target = "reel.queue", channel = %channel, "subscription_closed"),
            Err(err) => warn!(
                target = "reel.queue",
                channel = %channel,
                error = %err,
                "subscription_failed"
            ),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_once(
    client: &redis::Client,
    channel: &str,
    queue: &JobQueue,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(target = "reel.queue", channel, "subscribed");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target = "reel.queue", error = %err, "unreadable_payload");
                continue;
            }
        };
        let job = match decode_message(&payload) {
            Ok(job) => job,
            Err(err) => {
                warn!(target = "reel.queue", error = %err, "malformed_listing_message");
                continue;
            }
        };
        match queue.enqueue(job).await {
            Ok(id) => info!(target = "reel.queue", job_id = %id, "listing_enqueued"),
            Err(err) => warn!(
                target = "reel.queue",
                error = %err.error,
                detail = ?err.detail,
                "listing_enqueue_failed"
            ),
        }
    }
    Ok(())
}

pub fn decode_message(payload: &str) -> Result<ListingJob, serde_json::Error> {
    let message: QueueMessage = serde_json::from_str(payload)?;
    if message.status != "requested" {
        info!(
            target = "reel.queue",
            product_id = %message.product_id,
            status = %message.status,
            "listing_message_status"
        );
    }
    Ok(ListingJob::from_message(message))
}

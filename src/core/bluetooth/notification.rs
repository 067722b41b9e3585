//! Notification handling for the bluest backend
//! Forwards every value pushed on a subscribed characteristic as one
//! `TransportEvent::Notification`.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::{LinkId, TransportEvent, TransportEventSender};

/// Notification pump for one characteristic
pub struct NotificationHandler {
    link: LinkId,
    events: TransportEventSender,
}

impl NotificationHandler {
    pub fn new(link: LinkId, events: TransportEventSender) -> Self {
        Self { link, events }
    }

    /// Runs until the stream ends or `cancel` fires
    pub async fn process_notifications(self, notify_char: Characteristic, cancel: CancellationToken) {
        let uuid = notify_char.uuid();
        info!("Subscribing to notifications on {}...", uuid);

        let mut notification_stream = match notify_char.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => {
                        debug!("Received data on {}: {:?}", uuid, value);
                        let event = TransportEvent::Notification {
                            link: self.link,
                            characteristic: uuid,
                            value,
                        };
                        if self.events.send(event).is_err() {
                            debug!("Event receiver gone, stopping notifications");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    info!("Notifications on {} cancelled", uuid);
                    break;
                }
            }
        }

        info!("Notification stream ended");
    }
}

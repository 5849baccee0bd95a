//! Webhook delivery channel: POSTs the message JSON to an outbound relay
//! (a LinkedIn automation tool or mail sender) that owns the send mechanics.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::channels::delivery::{DeliveryChannel, DeliveryReceipt, OutreachMessage};
use crate::contacts::model::ChannelKind;
use crate::error::ChannelError;

pub struct WebhookChannel {
    kind: ChannelKind,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// `202 Accepted` means the relay queued it; any other 2xx is a confirmed send.
fn receipt_for(kind: ChannelKind, status: StatusCode) -> Result<DeliveryReceipt, ChannelError> {
    match status {
        StatusCode::ACCEPTED => Ok(DeliveryReceipt::Queued),
        s if s.is_success() => Ok(DeliveryReceipt::Sent),
        StatusCode::TOO_MANY_REQUESTS => Err(ChannelError::RateLimited {
            channel: kind.to_string(),
        }),
        s => Err(ChannelError::SendFailed {
            channel: kind.to_string(),
            reason: format!("relay returned HTTP {}", s.as_u16()),
        }),
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &OutreachMessage) -> Result<DeliveryReceipt, ChannelError> {
        let resp = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: self.kind.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                channel = %self.kind,
                contact_id = %message.contact_id,
                status = status.as_u16(),
                body = %body,
                "Relay rejected message"
            );
        }
        receipt_for(self.kind, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let kind = ChannelKind::Email;
        assert_eq!(receipt_for(kind, StatusCode::OK).unwrap(), DeliveryReceipt::Sent);
        assert_eq!(receipt_for(kind, StatusCode::ACCEPTED).unwrap(), DeliveryReceipt::Queued);
        assert!(matches!(
            receipt_for(kind, StatusCode::TOO_MANY_REQUESTS),
            Err(ChannelError::RateLimited { .. })
        ));
        assert!(matches!(
            receipt_for(kind, StatusCode::BAD_GATEWAY),
            Err(ChannelError::SendFailed { .. })
        ));
    }
}

//! Delivery channel abstraction for gated outreach messages.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::contacts::model::{ChannelKind, Contact, Phase, SenderLevel, SequenceVariant};
use crate::error::ChannelError;

/// A message the gate has cleared for sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutreachMessage {
    pub contact_id: Uuid,
    pub phase: Phase,
    pub channel: ChannelKind,
    /// LinkedIn profile URL or email address.
    pub recipient: String,
    pub owner: Option<String>,
    pub sender_level: Option<SenderLevel>,
    pub sequence_variant: Option<SequenceVariant>,
    pub body: String,
}

impl OutreachMessage {
    /// Build the message for a contact's phase. `None` for non-sendable
    /// phases or a missing recipient.
    pub fn for_contact(contact: &Contact, phase: Phase) -> Option<Self> {
        let channel = phase.channel()?;
        let recipient = match channel {
            ChannelKind::LinkedIn => contact.enrichment.linkedin_url.clone()?,
            ChannelKind::Email => contact.enrichment.email.clone()?,
        };
        Some(Self {
            contact_id: contact.id,
            phase,
            channel,
            recipient,
            owner: contact.routing.assigned_owner.clone(),
            sender_level: contact.routing.sender_level,
            sequence_variant: contact.routing.sequence_variant,
            body: render_body(contact, phase),
        })
    }
}

/// Plain message body from the validated persona.
fn render_body(contact: &Contact, phase: Phase) -> String {
    let first_name = contact.name.split_whitespace().next().unwrap_or(&contact.name);
    let hook = contact
        .persona
        .context_hook
        .as_deref()
        .or(contact.persona.summary.as_deref())
        .unwrap_or_default();
    let opener = match phase {
        Phase::PreEvent => "Looking forward to the event",
        Phase::DuringEvent => "Great to be at the event together",
        Phase::PostEvent => "Thanks for a great event",
        _ => "Following up on my last note",
    };
    if hook.is_empty() {
        format!("Hi {first_name}, {opener}.")
    } else {
        format!("Hi {first_name}, {opener}. {hook}")
    }
}

/// Channel acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Confirmed sent or accepted.
    Sent,
    /// Handed over, confirmation arrives later.
    Queued,
}

/// Outbound channel for one [`ChannelKind`].
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, message: &OutreachMessage) -> Result<DeliveryReceipt, ChannelError>;
}

/// Dry-run channel: logs the message and reports it sent.
pub struct LoggingChannel {
    kind: ChannelKind,
}

impl LoggingChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl DeliveryChannel for LoggingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &OutreachMessage) -> Result<DeliveryReceipt, ChannelError> {
        info!(
            channel = %self.kind,
            contact_id = %message.contact_id,
            phase = %message.phase,
            owner = message.owner.as_deref().unwrap_or("-"),
            "Dry run: message not sent"
        );
        Ok(DeliveryReceipt::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        let mut c = Contact::new("Asha Rao", "CEO", "Acme", "test");
        c.enrichment.linkedin_url = Some("https://linkedin.com/in/asha".into());
        c.persona.context_hook = Some("Your talk on embedded lending stood out.".into());
        c
    }

    #[test]
    fn message_uses_phase_channel() {
        let c = contact();
        let dm = OutreachMessage::for_contact(&c, Phase::DuringEvent).unwrap();
        assert_eq!(dm.channel, ChannelKind::LinkedIn);
        assert_eq!(dm.recipient, "https://linkedin.com/in/asha");
        assert!(dm.body.starts_with("Hi Asha,"));
        assert!(dm.body.contains("embedded lending"));

        // No email on file.
        assert!(OutreachMessage::for_contact(&c, Phase::PostEvent).is_none());
        assert!(OutreachMessage::for_contact(&c, Phase::Done).is_none());
    }

    #[tokio::test]
    async fn logging_channel_reports_sent() {
        let channel = LoggingChannel::new(ChannelKind::LinkedIn);
        let msg = OutreachMessage::for_contact(&contact(), Phase::PreEvent).unwrap();
        assert_eq!(channel.send(&msg).await.unwrap(), DeliveryReceipt::Sent);
    }
}

//! Outbound delivery channels (LinkedIn, email).

pub mod delivery;
pub mod webhook;

pub use delivery::{DeliveryChannel, DeliveryReceipt, LoggingChannel, OutreachMessage};
pub use webhook::WebhookChannel;

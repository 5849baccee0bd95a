//! Outreach Gate: contact enrichment, scoring, persona validation, routing
//! and phase-gated outreach around a single event.

pub mod channels;
pub mod config;
pub mod contacts;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod store;

//! Contact pipeline.
//!
//! Every contact flows through:
//! 1. `ScoringEngine` - seniority, vertical and ICP score from the title and company
//! 2. `enrichment::resolve` - LinkedIn, email, size and funding from the provider
//! 3. `PersonaValidator` - generated persona checked against guardrails
//! 4. `RoutingEngine` - owner, sender level, sequence variant, conflicts
//! 5. `OutreachGate` - phase state machine; the only path to a send
//!
//! `PipelineRunner` drives the stages in that order (rescoring after enrichment).

pub mod enrichment;
pub mod gate;
pub mod persona;
pub mod processor;
pub mod routing;
pub mod scoring;
pub mod types;

pub use gate::{OutreachGate, PhaseSchedule};
pub use processor::{ContactSignal, IngestReport, PipelineRunner};

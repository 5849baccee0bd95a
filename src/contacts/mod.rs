//! Contact record, normalisation helpers and the summary view.

pub mod model;
pub mod normalize;
pub mod summary;

pub use model::{Contact, RawContact};
pub use summary::PipelineSummary;

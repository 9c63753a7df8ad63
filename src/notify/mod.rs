//! Due-date reminders: profiles, scheduling arithmetic, rendering,
//! delivery and the engine that ties them together.

pub mod email;
pub mod engine;
pub mod profile;
pub mod render;
pub mod schedule;

pub use engine::{EngineContext, NotificationEngine, RunSummary};

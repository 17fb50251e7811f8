//! Browser-driven fallback submission.

pub mod fallback;
pub mod script;

pub use fallback::{AutomationSettings, FallbackAutomationPath};
pub use script::{field_plan, FieldFill, FieldKind};

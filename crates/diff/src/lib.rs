//! Viewtrace comparison engines
//!
//! - [`visual`]: pixel-level screenshot comparison with a rendered overlay
//! - [`text`]: word-level comparison of extracted page text
//! - [`severity`]: named threshold policies shared by both

pub mod error;
pub mod severity;
pub mod text;
pub mod visual;

pub use error::{DiffError, DiffResult};
pub use severity::{Severity, SeverityPolicy};
pub use text::{compare_texts, SpanKind, TextComparison, TextDiffEngine, TextSpan, TextStatistics};
pub use visual::{VisualComparison, VisualDiffEngine};

/// Compare two encoded screenshots with the default engine.
pub fn compare_images(a: &[u8], b: &[u8]) -> DiffResult<VisualComparison> {
    VisualDiffEngine::default().compare(a, b)
}

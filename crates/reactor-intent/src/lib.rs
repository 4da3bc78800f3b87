//! The comment classification escalation ladder (§4.2.1) and the lighter
//! reactivation-detection classifier (§4.2.2).

pub mod comment;
pub mod patterns;
pub mod reactivation;

pub use comment::{classify_comment, CommentContext, HIGH_CONFIDENCE, MEDIUM_CONFIDENCE};
pub use patterns::Bucket;
pub use reactivation::{analyze_update, ReactivationCache, REACTIVATION_THRESHOLD};

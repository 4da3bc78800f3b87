//! `Task`/`Run`/`Step` model, the Workflow Driver, the Reactivation Gate, the
//! Validation Coordinator, base-branch resolution, and the Event Router that
//! ties an `IntakeEvent` to one of those components (§4.2, §4.4-§4.6).

pub mod branch;
pub mod driver;
pub mod event_router;
pub mod factory;
pub mod gate;
pub mod model;
pub mod nodes;
pub mod validation_coordinator;

pub use branch::{is_valid_branch_name, resolve_base_branch, sanitize_branch_name, BranchResolutionInput};
pub use driver::{DriveOutcome, WorkflowDriver};
pub use event_router::{EventRouter, RoutedOutcome};
pub use factory::{enrich_description, RunFactory, RunTrigger};
pub use gate::{GateOutcome, GateRejection, ReactivationGate};
pub use model::{RunContext, StepNode, StepOutcome, StepResult};
pub use nodes::default_nodes;
pub use validation_coordinator::{ValidationCoordinator, ValidationOutcome};

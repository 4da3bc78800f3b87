//! Narrow-interface clients for the external collaborators named in §6: the
//! ticket system, source-hosting, and messaging. Each collaborator sits
//! behind its own trait so the orchestrator never depends on wire shapes
//! directly (§1 "consumed via narrow interfaces only").

pub mod messaging;
pub mod scm;
pub mod ticket;

pub use messaging::{MessagingClient, MessagingError, RestMessagingClient};
pub use scm::{RestScmClient, ScmError, SourceHostingClient};
pub use ticket::{GraphQlTicketClient, TicketSystemClient, TicketSystemError};

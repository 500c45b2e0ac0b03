//! Domain model (IDs, outbox records, states, validation, errors).

pub mod errors;
pub mod event_type;
pub mod ids;
pub mod outbox;
pub mod state;
pub mod validation;

pub use self::errors::{CourierError, CourierResult};
pub use self::event_type::EventTypeId;
pub use self::ids::{Id, IdMarker, OutboxId};
pub use self::outbox::{OutboxCounts, OutboxRecord};
pub use self::state::OutboxStatus;
pub use self::validation::{ValidationFailure, Violation};

//! Publish/subscribe event bus with topic-glob matching.
//!
//! Every lifecycle transition (robot config changes, execution
//! started/waiting/resumed/completed, task completion/failure, delivery,
//! inbound integration webhooks) is pushed to the bus as an `Event`.
//! Subscribers register a dot-separated pattern (`*` matches exactly one
//! segment) and receive a buffered, best-effort, at-most-once stream of
//! matching events — used both by `HostMediator`'s delivery routing and by
//! any external observability surface that wants to watch an execution.

mod bus;
mod glob;
mod types;

pub use bus::{EventBus, MIN_SUBSCRIBER_CAPACITY};
pub use glob::topic_matches;
pub use types::{Event, EventPayload};

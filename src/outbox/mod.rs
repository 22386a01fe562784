//! Transactional outbox.
//!
//! # Data Flow
//! ```text
//! Request path (publisher.rs):
//!     domain event → envelope + registry validation
//!     → insert_if_absent(outbox table)       (failure: error to caller, no publish)
//!     → topic.publish (bounded timeout)      (failure: logged, left for sweep)
//!     → update_if(published == false)        (failure: logged only)
//!
//! Background (reconciler.rs):
//!     tick → query(published == false, next_attempt_at < now - grace, limit)
//!     → publish + mark, batch by batch
//!       (failure: attempts += 1, next_attempt_at pushed out with backoff)
//!     → purge expired records
//! ```
//!
//! # Design Decisions
//! - Durability precedes visibility: nothing is published before the record
//!   is stored
//! - Delivery is at-least-once; the payload is the full envelope, so every
//!   re-publish carries the same `eventId` for subscriber dedup
//! - The request path and the reconciler coordinate only through the store

pub mod publisher;
pub mod reconciler;
pub mod record;

pub use publisher::{NewEvent, OutboxError, OutboxPublisher, RecordOutcome};
pub use reconciler::{Reconciler, SweepReport};
pub use record::OutboxRecord;

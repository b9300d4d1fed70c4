//! Diff publisher and shared event log for the sumcast pipeline.
//!
//! The collector hands each cycle's status to [`DiffPublisher::publish`];
//! the publisher appends the cheapest sufficient event to the shared
//! [`EventLog`], which connection tasks read through their own cursors.

pub mod event_log;
pub mod publisher;

pub use event_log::{EventLog, ReadOutcome, DEFAULT_MAX_ENTRIES};
pub use publisher::{
    run_publish_loop, DiffPublisher, PublishOutcome, PublisherConfig, PublisherStats,
    ResyncSnapshot,
};

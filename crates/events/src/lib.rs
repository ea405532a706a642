//! Per-thread event bus.
//!
//! One [`ThreadBus`] per conversation thread assigns strictly monotonic
//! sequence numbers, keeps a bounded replay ring, and fans events out to
//! any number of subscribers. A subscriber that falls more than the
//! configured backlog behind receives a single `dropped` marker and its
//! stream ends; the client is expected to reconnect with `Last-Event-ID`.

mod bus;

pub use bus::{EventBus, EventStream, ThreadBus};

//! The agent graph runtime.
//!
//! A graph is a static registry of named nodes and edges over a shared
//! [`ConversationState`](wv_domain::state::ConversationState). The runner
//! executes nodes one at a time, merges each node's state patch, persists
//! a checkpoint at every node boundary, and branches on conditional
//! edges. Interrupts are plain return values: a patch carrying
//! `pending_interrupt` suspends the run; a separate resume entrypoint
//! merges the approval and continues from the same node.
//!
//! This is a deliberate minimal DAG executor; it does not pull in a graph
//! framework.

mod graph;
mod patch;
mod runner;

pub use graph::{Graph, GraphBuilder, END, START};
pub use patch::NodePatch;
pub use runner::{GraphNode, GraphRunner, RunOutcome, Snapshot};

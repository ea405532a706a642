//! The deep-research engine.
//!
//! An iterative, multi-epoch search + summarize loop: decompose the query
//! once, search all sub-queries in parallel with URL deduplication,
//! summarize retained sources with inline citations, score the epoch's
//! quality, and continue or stop. Synthesis renders a final report whose
//! citation numbers are stable across epochs (first-appearance order).

mod decompose;
mod engine;
mod quality;
mod search;
mod summarize;
mod synthesis;

pub use engine::{EngineDeps, ResearchEngine};
pub use search::{absorb_search_payload, canonicalize_url};
pub use synthesis::render_source_list;

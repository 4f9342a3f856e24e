//! The four pipeline workers.
//!
//! Each worker is a plain async function coordinating with the others only
//! through the [`ExplorationStore`](crate::store::ExplorationStore): no
//! channels, no shared in-memory state. Every worker re-reads the
//! exploration status at each loop head and after each sleep, which is what
//! bounds cancellation latency to roughly one poll interval.

mod cluster_finder;
mod input_generator;
mod result_processor;
mod scheduler;

pub use cluster_finder::run_cluster_finder;
pub use input_generator::run_input_generator;
pub use result_processor::run_result_processor;
pub use scheduler::run_scheduler;

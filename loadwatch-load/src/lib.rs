pub mod plan;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod stats;

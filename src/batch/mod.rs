pub mod job;
pub mod queue;
pub mod retry;

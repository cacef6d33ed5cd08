pub mod job_table;
pub mod naming;
pub mod queue;
pub mod storage;
pub mod stylize;
pub mod upload;

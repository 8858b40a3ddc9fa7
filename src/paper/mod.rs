pub mod scheduler;
pub mod simulator;
pub mod tracker;
pub mod types;

pub mod control;
pub mod step;
pub mod store;
pub mod ticker;
pub mod worker;

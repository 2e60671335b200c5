pub mod aggregation;
pub mod sessions;

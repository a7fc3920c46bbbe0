pub mod backup;
pub mod batch;
pub mod misc;
pub mod query;
pub mod schema;
pub mod status;

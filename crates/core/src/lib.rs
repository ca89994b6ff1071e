pub mod api;
pub mod detection;
pub mod ingest;
pub mod recording;
pub mod session;
pub mod shared;
pub mod status;

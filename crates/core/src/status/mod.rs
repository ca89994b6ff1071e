pub mod status_event;
pub mod status_publisher;

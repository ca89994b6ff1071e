pub mod domain;
pub mod infrastructure;
pub mod recording_catalog;
pub mod recording_namer;
pub mod recording_writer;

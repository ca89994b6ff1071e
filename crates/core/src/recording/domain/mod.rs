pub mod artifact_sink;
pub mod recording_entry;
pub mod recording_writer_status;
pub mod storage_error;

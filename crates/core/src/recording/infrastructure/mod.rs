pub mod file_artifact_sink;
pub mod mjpeg;

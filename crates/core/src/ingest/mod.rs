pub mod frame_ingestor;

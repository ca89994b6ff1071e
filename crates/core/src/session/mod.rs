pub mod control_error;
pub mod liveness_monitor;
pub mod session_config;
pub mod session_controller;
pub mod session_core;
pub mod session_state;
pub mod session_stats;
pub mod session_worker;

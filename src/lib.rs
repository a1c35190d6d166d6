pub mod config;
pub mod logging;
pub mod moodle;
pub mod sheets;

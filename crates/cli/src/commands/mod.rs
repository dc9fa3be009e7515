pub mod chain;
pub mod config_cmd;
pub mod memory;

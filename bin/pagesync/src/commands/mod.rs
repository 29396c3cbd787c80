pub mod capture;
pub mod config_cmd;
pub mod pending;
pub mod runtime;
pub mod status;
pub mod targets;
pub mod watch;

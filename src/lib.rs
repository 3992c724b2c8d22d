pub mod api;
pub mod case_convert;
pub mod change_logs;
pub mod config;
pub mod db;
pub mod devices;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod problems;
pub mod query;
pub mod remotes;
pub mod runtime_paths;
pub mod sessions;
pub mod settings;
pub mod steps;
pub mod tv_interfaces;
pub mod users;
pub mod validation;

pub type Result<T> = std::result::Result<T, error::AdminError>;

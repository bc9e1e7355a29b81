//! Settings shared by the session layer and the command-line client.

mod config;

pub use config::{
    ClientConfig, DEFAULT_MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SHARED_STARTUP_OPTION, DEFAULT_STARTUP_OPTION, client_config_path, load_client_config,
    load_client_config_from, save_client_config, save_client_config_to,
};

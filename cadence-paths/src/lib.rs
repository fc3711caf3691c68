//! XDG Base Directory paths for cadence.
//!
//! The CLI and the metrics core resolve their config file and the quick
//! action record log through these functions, using XDG paths on every
//! platform rather than platform-native locations.

use std::path::PathBuf;

const APP_DIR: &str = "cadence";

/// File name of the user config inside [`config_dir`]
pub const CONFIG_FILE: &str = "config.toml";

/// File name of the quick action record log inside [`data_dir`]
pub const RECORD_LOG_FILE: &str = "quick_actions.jsonl";

/// Get the cadence config directory.
///
/// Returns `$XDG_CONFIG_HOME/cadence` if set, otherwise `~/.config/cadence`.
///
/// # Examples
///
/// ```
/// use cadence_paths::config_dir;
///
/// let config = config_dir();
/// let file = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    resolve("XDG_CONFIG_HOME", ".config")
}

/// Get the cadence data directory.
///
/// Returns `$XDG_DATA_HOME/cadence` if set, otherwise `~/.local/share/cadence`.
/// Durable quick action records live here.
pub fn data_dir() -> PathBuf {
    resolve("XDG_DATA_HOME", ".local/share")
}

/// Path of the user-level config file
pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

/// Default location of the quick action record log
pub fn record_log_path() -> PathBuf {
    data_dir().join(RECORD_LOG_FILE)
}

fn resolve(xdg_var: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = std::env::var(xdg_var)
        && !base.is_empty()
    {
        PathBuf::from(base).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join(APP_DIR)
    } else {
        PathBuf::from(home_relative).join(APP_DIR)
    }
}

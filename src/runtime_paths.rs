//! On-disk locations used when the operator does not pass explicit paths.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

const APP_NAME: &str = "tvdiag-admin";
pub const HOME_ENV: &str = "TVDIAG_HOME";

fn platform_app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", APP_NAME) {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join(APP_NAME);
    }

    std::env::temp_dir().join(APP_NAME)
}

fn root_from(home: Option<PathBuf>) -> PathBuf {
    home.filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(platform_app_root)
}

/// `$TVDIAG_HOME` when set, otherwise the platform data directory.
pub fn app_root() -> PathBuf {
    root_from(std::env::var_os(HOME_ENV).map(PathBuf::from))
}

pub fn default_db_path() -> String {
    app_root()
        .join("data")
        .join("tvdiag-admin.db")
        .to_string_lossy()
        .to_string()
}

/// Picked up by `Config::load` when no `--config` is given and the file exists.
pub fn default_config_path() -> PathBuf {
    app_root().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_home_wins_over_platform_dirs() {
        let temp = tempfile::tempdir().expect("temp dir");
        let root = root_from(Some(temp.path().to_path_buf()));
        assert_eq!(root, temp.path());

        let fallback = root_from(Some(PathBuf::new()));
        assert!(fallback.to_string_lossy().contains(APP_NAME));
    }
}

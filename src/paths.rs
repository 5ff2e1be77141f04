//! Where tierform keeps its files
//!
//! Both directories resolve the same way, first match wins:
//!
//! | | config | state |
//! |---|---|---|
//! | override | `TIERFORM_CONFIG_DIR` | `TIERFORM_STATE_DIR` |
//! | XDG | `$XDG_CONFIG_HOME/tierform` | `$XDG_STATE_HOME/tierform` |
//! | Windows | `%APPDATA%\tierform` | `%LOCALAPPDATA%\tierform` |
//! | default | `~/.config/tierform` | `~/.local/state/tierform` |
//!
//! Override values may use `~` and `$VARS`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "TIERFORM_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "TIERFORM_STATE_DIR";

const APP_DIR: &str = "tierform";

/// One row of the resolution table above
struct DirKind {
    label: &'static str,
    override_var: &'static str,
    xdg_var: &'static str,
    #[cfg_attr(not(windows), allow(dead_code))]
    windows_base: fn() -> Option<PathBuf>,
    home_relative: &'static [&'static str],
}

const CONFIG: DirKind = DirKind {
    label: "config",
    override_var: ENV_CONFIG_DIR,
    xdg_var: "XDG_CONFIG_HOME",
    windows_base: dirs::config_dir,
    home_relative: &[".config"],
};

const STATE: DirKind = DirKind {
    label: "state",
    override_var: ENV_STATE_DIR,
    xdg_var: "XDG_STATE_HOME",
    windows_base: dirs::data_local_dir,
    home_relative: &[".local", "state"],
};

fn resolve_dir(kind: &DirKind) -> Result<PathBuf> {
    let (path, source) = if let Ok(dir) = std::env::var(kind.override_var) {
        (expand(&dir), kind.override_var)
    } else if let Ok(base) = std::env::var(kind.xdg_var) {
        (PathBuf::from(base).join(APP_DIR), kind.xdg_var)
    } else {
        platform_default(kind)?
    };
    log::debug!("{} dir ({source}): {}", kind.label, path.display());
    Ok(path)
}

fn platform_default(kind: &DirKind) -> Result<(PathBuf, &'static str)> {
    #[cfg(windows)]
    if let Some(base) = (kind.windows_base)() {
        return Ok((base.join(APP_DIR), "windows default"));
    }

    let mut path = dirs::home_dir().context("Could not determine home directory")?;
    path.extend(kind.home_relative);
    path.push(APP_DIR);
    Ok((path, "default"))
}

/// Directory holding `config.toml`
pub fn config_dir() -> Result<PathBuf> {
    resolve_dir(&CONFIG)
}

/// Directory holding state files when `--state` is not given
pub fn state_dir() -> Result<PathBuf> {
    resolve_dir(&STATE)
}

/// Default config file: `<config_dir>/config.toml`
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// State file name for a declaration document: `<stem>.state.json`
pub fn state_file_name(declarations: &Path) -> String {
    let stem = declarations
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("default");
    format!("{stem}.state.json")
}

/// State file for a declaration document, inside [`state_dir`]
pub fn state_file_for(declarations: &Path) -> Result<PathBuf> {
    Ok(state_dir()?.join(state_file_name(declarations)))
}

/// `~` and `$VAR` expansion; unknown variables stay as written
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Tests in this module share the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let original = env::var(key).ok();
        // SAFETY: env access is serialized by ENV_LOCK
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: env access is serialized by ENV_LOCK
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    fn without_env_vars<F, R>(keys: &[&str], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let originals: Vec<_> = keys.iter().map(|k| (*k, env::var(k).ok())).collect();
        for key in keys {
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe { env::remove_var(key) };
        }
        let result = f();
        for (key, value) in originals {
            if let Some(v) = value {
                // SAFETY: env access is serialized by ENV_LOCK
                unsafe { env::set_var(key, v) };
            }
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/config/path", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/config/path"));
        });
    }

    #[test]
    fn test_config_dir_from_xdg() {
        without_env_vars(&[ENV_CONFIG_DIR], || {
            let original = env::var("XDG_CONFIG_HOME").ok();
            // SAFETY: ENV_LOCK is held by without_env_vars
            unsafe { env::set_var("XDG_CONFIG_HOME", "/xdg/conf") };
            let dir = config_dir();
            match original {
                // SAFETY: as above
                Some(v) => unsafe { env::set_var("XDG_CONFIG_HOME", v) },
                None => unsafe { env::remove_var("XDG_CONFIG_HOME") },
            }
            assert_eq!(dir.unwrap(), PathBuf::from("/xdg/conf/tierform"));
        });
    }

    #[test]
    fn test_config_dir_override_expands_tilde() {
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_CONFIG_DIR, "~/dotfiles/tierform", || {
            assert_eq!(config_dir().unwrap(), home.join("dotfiles").join("tierform"));
        });
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state", || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state"));
        });
    }

    #[test]
    fn test_state_dir_falls_back_to_home() {
        without_env_vars(&[ENV_STATE_DIR, "XDG_STATE_HOME"], || {
            let home = dirs::home_dir().unwrap();
            #[cfg(unix)]
            assert_eq!(
                state_dir().unwrap(),
                home.join(".local").join("state").join("tierform")
            );
            #[cfg(windows)]
            let _ = home;
        });
    }

    #[test]
    fn test_state_file_for_uses_declaration_stem() {
        with_env_var(ENV_STATE_DIR, "/var/tf", || {
            let path = state_file_for(Path::new("infra/three-tier.toml")).unwrap();
            assert_eq!(path, PathBuf::from("/var/tf/three-tier.state.json"));
        });
    }

    #[test]
    fn test_state_file_name_without_stem() {
        assert_eq!(state_file_name(Path::new("")), "default.state.json");
    }

    #[test]
    fn test_expand_leaves_unknown_vars() {
        let path = expand("$TIERFORM_SURELY_UNSET_VAR/x");
        assert_eq!(path, PathBuf::from("$TIERFORM_SURELY_UNSET_VAR/x"));
    }
}

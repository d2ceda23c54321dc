use std::path::PathBuf;

pub const APP_DIR: &str = "rrply";

pub const DEFAULT_CONTROL_PORT: u16 = 9877;
const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";

pub fn default_control_address() -> String {
    format!("{}:{}", DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT)
}

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!(
        "{}/rrply-mpv-{}.sock",
        std::env::temp_dir().display(),
        std::process::id()
    )
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    format!("rrply-mpv-{}", std::process::id())
}

#[cfg(unix)]
pub fn mpv_socket_arg(name: &str) -> String {
    format!("--input-ipc-server={}", name)
}

#[cfg(windows)]
pub fn mpv_socket_arg(name: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", name)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/rrply on unix, XDG layout on macOS too
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn cache_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".cache")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
    }
}

/// Channel directory cache file.
pub fn channel_cache_path() -> PathBuf {
    cache_dir().join("data.json")
}

/// Hotkey bindings file.
pub fn hotkey_config_path() -> PathBuf {
    config_dir().join("hotkey.json")
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find mpv binary for playback.
/// Checks the `MPV_PATH` override, beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe_name))
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_use_app_dir() {
        assert!(config_dir().ends_with(APP_DIR));
        assert!(cache_dir().ends_with(APP_DIR));
        assert!(channel_cache_path().ends_with("rrply/data.json"));
        assert!(hotkey_config_path().ends_with("rrply/hotkey.json"));
    }

    #[test]
    fn test_default_control_address() {
        assert_eq!(default_control_address(), "127.0.0.1:9877");
    }
}

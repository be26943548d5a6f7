use std::path::PathBuf;

pub fn data_dir() -> PathBuf {
    // Use ~/.local/share/recdash (XDG layout) on unix for consistency
    // across macOS and Linux.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("recdash")
    }
    #[cfg(windows)]
    {
        dirs::data_dir()
            .unwrap_or_else(temp_dir)
            .join("recdash")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".config")
            .join("recdash")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(temp_dir)
            .join("recdash")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

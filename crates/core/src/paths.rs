use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pagesync"))
            .unwrap_or_else(|| PathBuf::from(".pagesync"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// SQLite database backing the namespaced key/value state.
    pub fn state_db(&self) -> PathBuf {
        self.base.join("state.db")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.base.join("outbox")
    }

    /// User data dir for a browser launched by pagesync itself.
    pub fn browser_profile_dir(&self) -> PathBuf {
        self.base.join("browser-profile")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.outbox_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_base() {
        let paths = Paths::with_base(PathBuf::from("/tmp/ps"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/ps/config.json"));
        assert_eq!(paths.state_db(), PathBuf::from("/tmp/ps/state.db"));
        assert_eq!(paths.outbox_dir(), PathBuf::from("/tmp/ps/outbox"));
    }
}

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const STARTUP_FILE_NAME: &str = "StartDisplayHotkeys.bat";

/// Batch file in the user's Startup folder that launches the executable at
/// logon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupEntry {
    dir: PathBuf,
    exe: PathBuf,
}

impl StartupEntry {
    pub fn new(dir: impl Into<PathBuf>, exe: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            exe: exe.into(),
        }
    }

    /// `%APPDATA%\Microsoft\Windows\Start Menu\Programs\Startup` for the
    /// running executable.
    pub fn for_current_exe() -> Result<Self> {
        let config = dirs_next::config_dir().context("resolve roaming config folder")?;
        let exe = std::env::current_exe().context("resolve current executable")?;
        Ok(Self::new(
            config
                .join("Microsoft")
                .join("Windows")
                .join("Start Menu")
                .join("Programs")
                .join("Startup"),
            exe,
        ))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STARTUP_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn add(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create startup folder {}", self.dir.display()))?;
        let path = self.path();
        std::fs::write(&path, launch_script(&self.exe))
            .with_context(|| format!("write startup entry {}", path.display()))?;
        tracing::info!(path = %path.display(), "run on startup enabled");
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        let path = self.path();
        if !path.exists() {
            return Ok(());
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("remove startup entry {}", path.display()))?;
        tracing::info!(path = %path.display(), "run on startup disabled");
        Ok(())
    }

    /// Make the file's presence match `enabled`.
    pub fn sync(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.add()
        } else {
            self.remove()
        }
    }
}

fn launch_script(exe: &Path) -> String {
    format!("start \"\" \"{}\"\r\n", exe.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_quotes_the_executable() {
        let script = launch_script(Path::new("C:\\Program Files\\Display HotKeys\\app.exe"));
        assert_eq!(
            script,
            "start \"\" \"C:\\Program Files\\Display HotKeys\\app.exe\"\r\n"
        );
    }
}

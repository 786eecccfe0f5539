//! Environment-driven configuration.

use std::path::PathBuf;

/// Scalar multiplier converting DXF drawing-unit lengths to millimetres.
/// Part of the DXF renderer's data contract; persisted alongside its
/// `dimensions.json` for cross-reference.
pub const DIMLFAC: f64 = 75.018_753_051_757_81;

/// Server configuration. Paths default under `PIPEDOC_DATA_DIR` (or
/// `./data`); API keys are read by the model clients from their own env
/// vars at call time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw inputs: `<upload_dir>/<session_id>/<original filename>`.
    pub upload_dir: PathBuf,
    /// Derived artifacts: `<output_dir>/<session_id>/…`.
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
    pub max_upload_mb: u64,
}

impl Config {
    /// Build from the environment, creating the data directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the directories cannot be created.
    pub fn from_env() -> std::io::Result<Self> {
        let base = std::env::var("PIPEDOC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        Self::at(base)
    }

    /// Build rooted at an explicit base directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directories cannot be created.
    pub fn at(base: PathBuf) -> std::io::Result<Self> {
        let upload_dir = base.join("uploads");
        let output_dir = base.join("outputs");
        let db_dir = base.join("db");
        std::fs::create_dir_all(&upload_dir)?;
        std::fs::create_dir_all(&output_dir)?;
        std::fs::create_dir_all(&db_dir)?;
        let max_upload_mb = std::env::var("PIPEDOC_MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        Ok(Self {
            upload_dir,
            output_dir,
            db_path: db_dir.join("pipedoc.db"),
            max_upload_mb,
        })
    }

    /// Derived-artifact directory for one session.
    #[must_use]
    pub fn session_output_dir(&self, session_id: &str) -> PathBuf {
        self.output_dir.join(session_id)
    }

    /// Raw-input directory for one session.
    #[must_use]
    pub fn session_upload_dir(&self, session_id: &str) -> PathBuf {
        self.upload_dir.join(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_creates_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().to_path_buf()).unwrap();
        assert!(config.upload_dir.is_dir());
        assert!(config.output_dir.is_dir());
        assert_eq!(
            config.session_output_dir("abc"),
            dir.path().join("outputs").join("abc")
        );
    }
}

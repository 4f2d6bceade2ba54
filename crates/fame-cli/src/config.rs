use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Root directory for all application data.
    pub data_dir: PathBuf,
    /// Path to the SQLite person database.
    pub db_path: PathBuf,
    /// Directory holding captured face crops.
    pub image_dir: PathBuf,
    /// Directory holding bundled default face images.
    pub asset_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Durable launch-state file (first-launch seeding flag).
    pub state_path: PathBuf,
    /// How long quiz feedback stays on screen before the next round.
    pub feedback_delay: Duration,
    /// Whether to insert the default people on first launch.
    pub seed_defaults: bool,
}

impl Config {
    /// Load configuration from `FAME_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FAME_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("fame")
            });

        let path_or = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        Self {
            db_path: path_or("FAME_DB_PATH", data_dir.join("people.db")),
            image_dir: path_or("FAME_IMAGE_DIR", data_dir.join("images")),
            asset_dir: path_or("FAME_ASSET_DIR", data_dir.join("assets")),
            model_dir: path_or("FAME_MODEL_DIR", data_dir.join("models")),
            state_path: data_dir.join("state.toml"),
            feedback_delay: Duration::from_millis(env_u64(
                "FAME_FEEDBACK_DELAY_MS",
                fame_core::quiz::FEEDBACK_DELAY.as_millis() as u64,
            )),
            seed_defaults: std::env::var("FAME_SEED_DEFAULTS")
                .map(|v| v != "0")
                .unwrap_or(true),
            data_dir,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

use roster_core::DEFAULT_CONFIDENCE_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which face locator the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    /// SCRFD ONNX detector.
    Scrfd,
    /// Every frame is one pre-cropped face.
    WholeFrame,
}

impl FromStr for LocatorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrfd" => Ok(Self::Scrfd),
            "whole-frame" => Ok(Self::WholeFrame),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            _ => Err(()),
        }
    }
}

/// Optional `rosterd.toml`; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    face_db_path: Option<PathBuf>,
    confidence_threshold: Option<f64>,
    locator: Option<LocatorKind>,
    bus: Option<BusKind>,
}

/// Daemon configuration: defaults, then the config file, then `ROSTER_*` env.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD ONNX model.
    pub model_dir: PathBuf,
    /// Catalog and attendance database.
    pub db_path: PathBuf,
    /// Face model database (label map + samples).
    pub face_db_path: PathBuf,
    /// LBPH distance below which a match is accepted.
    pub confidence_threshold: f64,
    pub locator: LocatorKind,
    pub bus: BusKind,
}

impl Config {
    /// Load from `ROSTER_CONFIG` (or `$XDG_CONFIG_HOME/roster/rosterd.toml` if
    /// present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("ROSTER_CONFIG") {
            Some(path) => Some(read_file(Path::new(&path))?),
            None => {
                let default = config_home().join("roster/rosterd.toml");
                if default.exists() {
                    Some(read_file(&default)?)
                } else {
                    None
                }
            }
        };
        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = data_home().join("roster");

        let path = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        let confidence_threshold = match env("ROSTER_CONFIDENCE_THRESHOLD") {
            Some(raw) => parse_threshold(&raw)?,
            None => file.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        };
        if !(confidence_threshold.is_finite() && confidence_threshold > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "confidence_threshold",
                value: confidence_threshold.to_string(),
            });
        }

        let locator = match env("ROSTER_LOCATOR") {
            Some(raw) => raw.parse().map_err(|()| ConfigError::InvalidValue {
                key: "ROSTER_LOCATOR",
                value: raw,
            })?,
            None => file.locator.unwrap_or(LocatorKind::Scrfd),
        };

        let bus = match env("ROSTER_BUS") {
            Some(raw) => raw.parse().map_err(|()| ConfigError::InvalidValue {
                key: "ROSTER_BUS",
                value: raw,
            })?,
            None => file.bus.unwrap_or(BusKind::Session),
        };

        Ok(Self {
            model_dir: path("ROSTER_MODEL_DIR", file.model_dir, data_dir.join("models")),
            db_path: path("ROSTER_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            face_db_path: path("ROSTER_FACE_DB_PATH", file.face_db_path, data_dir.join("faces.db")),
            confidence_threshold,
            locator,
            bus,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

fn parse_threshold(raw: &str) -> Result<f64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: "ROSTER_CONFIDENCE_THRESHOLD",
        value: raw.to_string(),
    })
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
}

fn config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
}

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "piazza", about = "A social network server over raw TCP")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub multicast: MulticastConfig,
    pub storage: StorageConfig,
    pub rewards: RewardConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of requests handled concurrently across connections.
    pub workers: usize,
}

/// Rendezvous group the reward engine announces wallet updates on.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MulticastConfig {
    pub addr: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    /// Seconds between data-store snapshots.
    pub snapshot_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RewardConfig {
    /// Seconds between reward cycles.
    pub period_secs: u64,
    /// Share of each post reward credited to its author, in [0, 1].
    pub author_percentage: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 16,
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            addr: "239.255.32.32".to_string(),
            port: 44444,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            snapshot_secs: 60,
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            period_secs: 10,
            author_percentage: 0.7,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("store.json"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not determine home directory")
                .join(".piazza")
        })
    }

    pub fn storage_path(&self) -> &PathBuf {
        self.storage.path.as_ref().unwrap()
    }
}

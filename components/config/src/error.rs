use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("core-id: `{0}` is invalid")]
    InvalidCoreId(usize),

    #[error("CPU set `{0}` is malformed")]
    InvalidCpuSet(String),

    #[error("At least one shard is required")]
    NoShards,

    #[error("Invalid fetch configuration: `{0}`")]
    InvalidFetch(String),

    #[error("An IO error raised")]
    Io(#[from] std::io::Error),

    #[error("Malformed YAML configuration")]
    Yaml(#[from] serde_yaml::Error),
}

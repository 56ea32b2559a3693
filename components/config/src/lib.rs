use std::{fs::File, time::Duration};

use error::ConfigurationError;
use serde::{Deserialize, Serialize};
pub mod error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    #[serde(rename = "server-id")]
    pub server_id: i32,

    /// Processors to run shards on, in form of `0-3,6`. Empty means all processors.
    #[serde(rename = "worker-cpu-set")]
    pub worker_cpu_set: String,

    /// Number of shards. Defaults to the size of the worker CPU set.
    #[serde(rename = "shard-count")]
    pub shard_count: Option<usize>,

    /// Bind each shard thread to a processor of the worker CPU set.
    #[serde(rename = "pin-cores")]
    pub pin_cores: bool,

    #[serde(rename = "grace-period-sec")]
    pub grace_period_sec: u64,

    /// Processor ids resolved from `worker_cpu_set` by `check_and_apply`.
    #[serde(skip)]
    pub cores: Vec<usize>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            server_id: 0,
            worker_cpu_set: String::new(),
            shard_count: None,
            pin_cores: false,
            grace_period_sec: 5,
            cores: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCache {
    #[serde(rename = "max-sessions")]
    pub max_sessions: usize,

    /// Requests that would create a session with more partitions are served sessionless.
    #[serde(rename = "max-partitions-per-session")]
    pub max_partitions_per_session: usize,

    /// Sessions not used for this long are evicted.
    #[serde(rename = "idle-timeout-ms")]
    pub idle_timeout_ms: u64,

    #[serde(rename = "eviction-interval-ms")]
    pub eviction_interval_ms: u64,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            max_partitions_per_session: 1000,
            idle_timeout_ms: 120_000,
            eviction_interval_ms: 1000,
        }
    }
}

impl SessionCache {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Fetch {
    /// Pause between two planning passes of a fetch that waits for more data.
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,

    /// Upper clamp applied to the max wait requested by clients.
    #[serde(rename = "max-wait-ms")]
    pub max_wait_ms: u64,

    #[serde(rename = "session-cache")]
    pub session_cache: SessionCache,
}

impl Default for Fetch {
    fn default() -> Self {
        Self {
            debounce_ms: 10,
            max_wait_ms: 30_000,
            session_cache: SessionCache::default(),
        }
    }
}

impl Fetch {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub server: Server,
    pub fetch: Fetch,
}

impl Configuration {
    /// Load configuration from a YAML file. Keys absent from the file keep their defaults.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigurationError> {
        let configuration = serde_yaml::from_reader(File::open(path)?)?;
        Ok(configuration)
    }

    /// Check and apply the configuration.
    ///
    /// Resolves the worker CPU set into processor ids and validates the fetch settings.
    pub fn check_and_apply(&mut self) -> Result<(), ConfigurationError> {
        let total_processor_num = num_cpus::get();
        let cores = if self.server.worker_cpu_set.trim().is_empty() {
            (0..total_processor_num).collect()
        } else {
            parse_cpu_set(&self.server.worker_cpu_set)?
        };

        if let Some(id) = cores.iter().find(|id| **id >= total_processor_num) {
            return Err(ConfigurationError::InvalidCoreId(*id));
        }
        if cores.is_empty() {
            return Err(ConfigurationError::InvalidCpuSet(
                self.server.worker_cpu_set.clone(),
            ));
        }
        self.server.cores = cores;

        if self.server.shard_count == Some(0) {
            return Err(ConfigurationError::NoShards);
        }

        if self.fetch.debounce_ms == 0 {
            return Err(ConfigurationError::InvalidFetch(
                "debounce-ms must be positive".to_owned(),
            ));
        }

        if self.fetch.session_cache.max_sessions == 0 {
            return Err(ConfigurationError::InvalidFetch(
                "session-cache.max-sessions must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.server
            .shard_count
            .unwrap_or_else(|| self.server.cores.len().max(1))
    }

    /// Processor the given shard is bound to, if pinning is enabled.
    pub fn core_of(&self, shard: usize) -> Option<usize> {
        if !self.server.pin_cores || self.server.cores.is_empty() {
            return None;
        }
        Some(self.server.cores[shard % self.server.cores.len()])
    }

    pub fn server_grace_period(&self) -> Duration {
        Duration::from_secs(self.server.grace_period_sec)
    }
}

/// Parse a CPU set expression such as `0-3,6,8-9` into a sorted, de-duplicated list of processor ids.
pub fn parse_cpu_set(cpu_set: &str) -> Result<Vec<usize>, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidCpuSet(cpu_set.to_owned());
    let mut ids = vec![];
    for item in cpu_set.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((from, to)) => {
                let from = from.trim().parse::<usize>().map_err(|_| invalid())?;
                let to = to.trim().parse::<usize>().map_err(|_| invalid())?;
                if from > to {
                    return Err(invalid());
                }
                ids.extend(from..=to);
            }
            None => ids.push(item.parse::<usize>().map_err(|_| invalid())?),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::{error::ConfigurationError, parse_cpu_set, Configuration};
    use std::{error::Error, io::Write};

    #[test]
    fn test_yaml() -> Result<(), Box<dyn Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"
server:
  server-id: 3
  shard-count: 4
fetch:
  debounce-ms: 5
  session-cache:
    max-sessions: 16
"#
        )?;
        let mut config = Configuration::load(file.path())?;
        config.check_and_apply()?;
        assert_eq!(3, config.server.server_id);
        assert_eq!(4, config.shard_count());
        assert_eq!(5, config.fetch.debounce_ms);
        assert_eq!(16, config.fetch.session_cache.max_sessions);
        // Defaults survive partial files.
        assert_eq!(30_000, config.fetch.max_wait_ms);
        assert_eq!(1000, config.fetch.session_cache.max_partitions_per_session);
        Ok(())
    }

    #[test]
    fn test_parse_cpu_set() -> Result<(), Box<dyn Error>> {
        assert_eq!(vec![0, 1, 2, 3, 6], parse_cpu_set("0-3, 6")?);
        assert_eq!(vec![1, 2], parse_cpu_set("2,1,2")?);
        assert!(parse_cpu_set("3-1").is_err());
        assert!(parse_cpu_set("a").is_err());
        Ok(())
    }

    #[test]
    fn test_check_and_apply() -> Result<(), Box<dyn Error>> {
        let mut config = Configuration::default();
        config.check_and_apply()?;
        assert_eq!(num_cpus::get(), config.shard_count());
        assert_eq!(None, config.core_of(0));

        config.server.pin_cores = true;
        config.server.worker_cpu_set = "0".to_owned();
        config.check_and_apply()?;
        assert_eq!(Some(0), config.core_of(5));

        config.server.worker_cpu_set = format!("{}", num_cpus::get());
        assert!(matches!(
            config.check_and_apply(),
            Err(ConfigurationError::InvalidCoreId(_))
        ));

        let mut config = Configuration::default();
        config.server.shard_count = Some(0);
        assert!(matches!(
            config.check_and_apply(),
            Err(ConfigurationError::NoShards)
        ));

        let mut config = Configuration::default();
        config.fetch.session_cache.max_sessions = 0;
        assert!(config.check_and_apply().is_err());
        Ok(())
    }
}

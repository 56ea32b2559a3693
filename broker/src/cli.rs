use std::path::Path;

use clap::{Args, Parser, Subcommand};
use config::Configuration;
use log::info;

#[derive(Debug, Parser, Clone)]
#[command(author, about, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    /// Path to the configuration file in YAML format.
    ///
    /// Default value: `/etc/broker/broker.yaml`. Defaults apply if the file does not exist.
    #[arg(long, env = "BROKER_CONFIG")]
    config: Option<String>,

    /// Path to the log4rs configuration file in YAML format.
    ///
    /// Default value: `/etc/broker/broker-log.yaml`
    #[arg(long, env = "BROKER_LOG_CONFIG")]
    log: Option<String>,

    /// Number of shards, overriding `server.shard-count` of the configuration file.
    #[arg(long, env = "BROKER_SHARD_COUNT")]
    shard_count: Option<usize>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Start(StartArgs),
    BuildInfo,
}

impl StartArgs {
    pub fn init_log(&self) -> anyhow::Result<()> {
        let config = self
            .log
            .as_deref()
            .unwrap_or("/etc/broker/broker-log.yaml");
        let config_path = Path::new(config);

        if !config_path.exists() {
            eprintln!("Log configuration file {} does not exist", config);
            // Exit with errno set
            std::process::exit(2);
        };

        if !config_path.is_file() {
            eprintln!("{} is not a file", config);
            // Exit with errno set
            std::process::exit(22);
        }

        log4rs::init_file(config_path, Default::default())?;
        info!("Log initialized");
        Ok(())
    }

    pub fn create_config(&self) -> anyhow::Result<Configuration> {
        let path = Path::new(
            self.config
                .as_deref()
                .unwrap_or("/etc/broker/broker.yaml"),
        );
        let mut configuration = if path.exists() && path.is_file() {
            Configuration::load(path)?
        } else {
            Configuration::default()
        };

        if let Some(shard_count) = self.shard_count {
            configuration.server.shard_count = Some(shard_count);
        }

        configuration.check_and_apply()?;
        Ok(configuration)
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, io::Write};

    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn test_create_config() -> Result<(), Box<dyn Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "fetch:\n  debounce-ms: 7")?;
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::try_parse_from(["broker", "start", "--config", &path, "--shard-count", "3"])?;
        let args = match cli.command {
            Commands::Start(args) => args,
            Commands::BuildInfo => return Err("expected start".into()),
        };
        let config = args.create_config()?;
        assert_eq!(3, config.shard_count());
        assert_eq!(7, config.fetch.debounce_ms);
        Ok(())
    }

    #[test]
    fn test_build_info() -> Result<(), Box<dyn Error>> {
        let cli = Cli::try_parse_from(["broker", "build-info"])?;
        assert!(matches!(cli.command, Commands::BuildInfo));
        Ok(())
    }
}

use broker::{cli::Commands, Cli};
use clap::Parser;
use log::info;
use tokio::sync::broadcast;

fn main() {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Start(args) => {
            if let Err(e) = args.init_log() {
                eprintln!("Failed to initialize log. Cause: {:?}", e);
                return;
            }
            match args.create_config() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "Failed to create configuration from the specified configuration file. Cause: {:?}",
                        e
                    );
                    return;
                }
            }
        }

        Commands::BuildInfo => {
            display_built_info();
            return;
        }
    };

    let (shutdown_tx, _rx) = broadcast::channel(1);
    let tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Received shutdown signal");
        if tx.send(()).is_err() {
            eprintln!("Could not send shutdown signal to shutdown channel");
        }
    }) {
        eprintln!("Failed to set Ctrl-C handler. Cause: {}", e);
        return;
    }

    if let Err(e) = broker::server::launch(config, shutdown_tx) {
        eprintln!("Failed to start broker: {:?}", e);
    }
}

// Additively prints the built info to both stdout and log.
macro_rules! build_info {
    ($($st:tt)*) => {
        println!($($st)*);
        info!($($st)*);
    };
}

/// Display the built information.
fn display_built_info() {
    build_info!(
        "Broker v{}, built for {} by {}.",
        broker::built_info::PKG_VERSION,
        broker::built_info::TARGET,
        broker::built_info::RUSTC_VERSION
    );

    let built_time = built::util::strptime(broker::built_info::BUILT_TIME_UTC);
    build_info!(
        "Built with profile \"{}\", on {} ({} days ago).",
        broker::built_info::PROFILE,
        built_time.with_timezone(&built::chrono::offset::Local),
        (built::chrono::offset::Utc::now() - built_time).num_days(),
    );
}

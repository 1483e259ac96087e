use anyhow::Result;
use clap::Parser;
use tab_recall::cli::{self, Cli};
use tokio::runtime::Runtime;

fn main() -> Result<()> {
    let args = Cli::parse();
    let options = args.runtime_options();

    let config = match cli::load_config(&options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tab-recall: error: {e:#}");
            std::process::exit(2);
        }
    };

    // CLI --log-level takes precedence, then RUST_LOG, then the config file
    let level = tab_recall::debug::effective_level(options.log_level, config.log_level);
    tab_recall::debug::init_log_bridge(level);

    log::info!("Starting tab-recall {}", tab_recall::VERSION);

    let runtime = Runtime::new()?;
    let result = runtime.block_on(cli::run(args.command, &config, &options));

    // Let background tasks (the history actor) wind down before exiting
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    if let Err(e) = result {
        log::error!("tab-recall failed: {e:#}");
        eprintln!("tab-recall: error: {e:#}");
        // The runtime is already shut down; nothing is left to drop
        std::process::exit(1);
    }
    Ok(())
}

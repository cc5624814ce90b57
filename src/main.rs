use log::{error, info};

use mimamori::options::Options;
use mimamori::prelude::Config;

#[tokio::main]
async fn main() {
    let options = Options::new();

    // a bad config is the only fatal error, reported before anything starts
    let config = match Config::new(&options.config_file) {
        Ok(config) => config,
        Err(err) => {
            mimamori::init_logging("info");
            error!("Failed to load config: {:?}", err);
            std::process::exit(255);
        }
    };

    mimamori::init_logging(config.loglevel());
    info!(
        "mimamori {} starting with config file: {}",
        mimamori::CARGO_PKG_VERSION,
        options.config_file
    );
    config.log_summary();

    if let Err(err) = mimamori::run(config, options.runtime).await {
        error!("Application error: {:?}", err);
        std::process::exit(255);
    }
}

use clap::Parser;
use detection_service::configuration::config::{CliArgs, Config};
use detection_service::controller::controller_handler::Controller;
use log::{error, info};

// Storage backends own private runtimes, so the controller is built before
// the server runtime exists.
fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = CliArgs::parse();

    info!("Importing configuration");
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from {}: {}", args.config_file.display(), e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Unable to start the async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(controller.run()) {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    controller.shutdown();
}

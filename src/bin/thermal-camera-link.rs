use clap::Parser;
use log::{error, info};
use thermal_camera_link::{init_logging, run};
use thermal_camera_link::app::Args;
use thermal_camera_link::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    if let Err(err) = init_logging() {
        eprintln!("Failed to initialize logger: {}", err);
    }
    info!(concat!("Thermal Camera Link ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}

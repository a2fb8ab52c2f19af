use std::env;
use crate::app::{run_application, Args};
use crate::error::AppRunError;

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod stream;

pub fn init_logging() -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    run_application(args)?;
    Ok(())
}

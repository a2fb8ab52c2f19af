pub mod capability;
pub mod connection;
pub mod constants;
pub mod discovery;
pub mod emulator;
pub mod session;
pub mod types;

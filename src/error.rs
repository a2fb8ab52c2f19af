use std::any::Any;
use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use serde_json;
use futures::channel::mpsc::SendError;

use crate::device::types::{CommunicationInterface, ErrorCode, PermissionErrorKind};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { source: io::Error },

    #[error("Camera link failed: {source}")]
    Link { #[from] source: LinkError },

    #[error("No camera was discovered within {waited}")]
    NothingDiscovered { waited: humantime::Duration },
}

/// An operation was requested that does not fit the current connection state.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Only one camera connection is supported at a time (connected to {device_id})")]
    AlreadyConnected { device_id: String },

    #[error("Can't connect, {device_id} is still being released")]
    Busy { device_id: String },

    #[error("Can't connect, no camera available")]
    NoDevice,
}

#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("Permission was denied for identity {device_id}")]
    Denied { device_id: String },

    #[error("Error when asking for permission, error: {kind} identity: {device_id}")]
    Failed { kind: PermissionErrorKind, device_id: String },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Could not connect to {device_id}: {source}")]
    Connect { device_id: String, source: io::Error },

    #[error("Could not disconnect from {device_id}: {source}")]
    Disconnect { device_id: String, source: io::Error },

    #[error("Connection lost to {device_id}: {reason}")]
    LinkLost { device_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Discovery error on interface {interface}: {code}")]
    Transport { interface: CommunicationInterface, code: ErrorCode },

    #[error("Failed to start discovery: {source}")]
    Start { source: io::Error },
}

/// A frame pair could not be enqueued because the consuming side was torn down.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Frame buffer was closed, frame pair dropped")]
    Abandoned,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream dispatcher is already active")]
    AlreadyActive,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Session { #[from] source: SessionError },

    #[error(transparent)]
    Permission { #[from] source: PermissionError },

    #[error(transparent)]
    Protocol { #[from] source: ProtocolError },

    #[error(transparent)]
    Discovery { #[from] source: DiscoveryError },

    #[error(transparent)]
    Stream { #[from] source: StreamError },

    #[error("Camera link task is not running: {source}")]
    TaskGone { #[from] source: SendError },

    #[error("Camera link task stopped before replying")]
    NoReply,
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = error.type_id();

    format!("panic from thread: [{:?}]: [{}]", type_id, stringified)
}

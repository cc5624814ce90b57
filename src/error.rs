use std::time::Duration;

use thiserror::Error;

/// The register transport could not be reached at the start of a cycle.
#[derive(Debug, Error)]
pub enum ConnectFailure {
    #[error("cannot open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected fault while connecting: {0}")]
    Fault(String),
}

/// A block read did not produce a usable set of registers.
#[derive(Debug, Error)]
pub enum ReadFailure {
    #[error("device answered with exception {0:?}")]
    Exception(tokio_modbus::ExceptionCode),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("expected {requested} registers, received {received}")]
    Length { requested: u16, received: usize },

    #[error("transport fault: {0}")]
    Transport(#[from] std::io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("unexpected fault while reading: {0}")]
    Fault(String),
}

/// A sample could not be written to the measurement store.
#[derive(Debug, Error)]
pub enum PersistFailure {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("refusing to store an empty reading")]
    EmptyReading,

    #[error("reading contains channel {0} which is not in the channel map")]
    UnknownChannel(String),

    #[error("unexpected fault while persisting: {0}")]
    Fault(String),
}

/// Renders a panic payload caught at a stage boundary.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

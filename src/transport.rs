//! Scoped access to the register transport.
//!
//! A [`TransportSession`] wraps one live connection for one acquisition
//! attempt. Reading consumes the session, and the connection is closed
//! before `read` returns whatever the result was. If the session is dropped
//! instead (the cycle panicked or was cancelled mid-read), `Drop` releases the
//! connection.

use crate::prelude::*;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::error::panic_message;

/// Something that can open a connection to the device.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// Human readable endpoint, for logs.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn RegisterConnection>, ConnectFailure>;
}

/// An open connection to the device.
#[async_trait]
pub trait RegisterConnection: Send {
    async fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadFailure>;

    async fn close(&mut self) -> std::io::Result<()>;
}

/// One contiguous block of register values; `registers[i]` was read from
/// address `start + i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReading {
    pub start: u16,
    pub registers: Vec<u16>,
}

impl RawReading {
    pub fn new(start: u16, registers: Vec<u16>) -> Self {
        Self { start, registers }
    }

    /// Pairs of (address, value), in address order.
    pub fn pairs(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.registers
            .iter()
            .enumerate()
            .map(move |(i, value)| (self.start.wrapping_add(i as u16), *value))
    }
}

pub struct TransportSession {
    connection: Option<Box<dyn RegisterConnection>>,
    endpoint: String,
    timeout: Duration,
}

impl TransportSession {
    pub async fn acquire(
        transport: &dyn RegisterTransport,
        timeout: Duration,
    ) -> Result<Self, ConnectFailure> {
        let endpoint = transport.describe();
        debug!("connecting to {}", endpoint);

        let connect = AssertUnwindSafe(transport.connect()).catch_unwind();
        let connection = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(result)) => result?,
            Ok(Err(panic)) => return Err(ConnectFailure::Fault(panic_message(panic.as_ref()))),
            Err(_) => return Err(ConnectFailure::Timeout(timeout)),
        };

        debug!("connected to {}", endpoint);

        Ok(Self {
            connection: Some(connection),
            endpoint,
            timeout,
        })
    }

    /// Reads `count` holding registers from `start`, then releases the
    /// connection. A response of any other length is a failure.
    pub async fn read(mut self, start: u16, count: u16) -> Result<RawReading, ReadFailure> {
        let result = self.read_block(start, count).await;
        self.release().await;
        result
    }

    async fn read_block(&mut self, start: u16, count: u16) -> Result<RawReading, ReadFailure> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| ReadFailure::Fault("session already released".to_string()))?;

        let registers = tokio::time::timeout(
            self.timeout,
            connection.read_holding_registers(start, count),
        )
        .await
        .map_err(|_| ReadFailure::Timeout(self.timeout))??;

        if registers.len() != count as usize {
            return Err(ReadFailure::Length {
                requested: count,
                received: registers.len(),
            });
        }

        Ok(RawReading::new(start, registers))
    }

    async fn release(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match tokio::time::timeout(self.timeout, connection.close()).await {
                Ok(Ok(())) => debug!("closed connection to {}", self.endpoint),
                Ok(Err(e)) => warn!("error closing connection to {}: {}", self.endpoint, e),
                Err(_) => warn!("timed out closing connection to {}", self.endpoint),
            }
            // dropping the connection releases the underlying port either way
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            warn!(
                "connection to {} abandoned mid-cycle, dropping it",
                self.endpoint
            );
        }
    }
}

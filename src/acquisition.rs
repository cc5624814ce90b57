//! One acquisition cycle: connect, read, normalize, persist.
//!
//! Every stage runs behind a panic guard so a fault in one cycle is reported
//! as that stage's failure and never reaches the scheduler.

use crate::prelude::*;

use crate::database::Database;
use crate::datalog_writer::DatalogWriter;
use crate::error::panic_message;
use crate::normalizer::{normalize, NormalizedReading};
use crate::reader::RegisterReader;
use crate::scheduler::Job;
use crate::transport::{RawReading, RegisterTransport, TransportSession};

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Connecting,
    Connected,
    ConnectFail,
    Reading,
    ReadOk,
    ReadFail,
    Normalizing,
    Persisting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Persisted { timestamp: String },
    ConnectFailed,
    ReadFailed,
    PersistFailed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub persisted: u64,
    pub connect_failures: u64,
    pub read_failures: u64,
    pub persist_failures: u64,
    pub datalog_failures: u64,
}

impl CycleStats {
    pub fn print_summary(&self) {
        info!("Cycle Statistics:");
        info!("  Cycles run: {}", self.cycles);
        info!("  Rows persisted: {}", self.persisted);
        info!("  Failures:");
        info!("    Connect: {}", self.connect_failures);
        info!("    Read: {}", self.read_failures);
        info!("    Persist: {}", self.persist_failures);
        info!("    Datalog: {}", self.datalog_failures);
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Persisted { .. } => self.persisted += 1,
            CycleOutcome::ConnectFailed => self.connect_failures += 1,
            CycleOutcome::ReadFailed => self.read_failures += 1,
            CycleOutcome::PersistFailed => self.persist_failures += 1,
        }
    }
}

#[derive(Clone)]
pub struct Acquisition {
    channel_map: Arc<ChannelMap>,
    transport: Arc<dyn RegisterTransport>,
    timeout: Duration,
    reader: RegisterReader,
    database: Database,
    datalog: Option<DatalogWriter>,
    clock: Arc<dyn Clock>,
    pub shared_stats: Arc<Mutex<CycleStats>>,
}

impl Acquisition {
    pub fn new(
        channel_map: Arc<ChannelMap>,
        transport: Arc<dyn RegisterTransport>,
        timeout: Duration,
        database: Database,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reader: RegisterReader::new(&channel_map),
            channel_map,
            transport,
            timeout,
            database,
            datalog: None,
            clock,
            shared_stats: Arc::new(Mutex::new(CycleStats::default())),
        }
    }

    pub fn with_datalog(mut self, datalog: DatalogWriter) -> Self {
        self.datalog = Some(datalog);
        self
    }

    pub fn stats(&self) -> CycleStats {
        self.shared_stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Runs one full cycle. Always reaches `Done`; failures are logged and
    /// reported through the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        info!("--- acquisition cycle starting ---");
        self.transition(CycleState::Idle, CycleState::Connecting);

        let outcome = match self.connect().await {
            Err(err) => {
                error!("could not connect to {}: {}", self.transport.describe(), err);
                self.transition(CycleState::Connecting, CycleState::ConnectFail);
                CycleOutcome::ConnectFailed
            }
            Ok(session) => {
                self.transition(CycleState::Connecting, CycleState::Connected);
                self.transition(CycleState::Connected, CycleState::Reading);

                match self.read(session).await {
                    Err(err) => {
                        error!("register read failed, no sample this cycle: {}", err);
                        self.transition(CycleState::Reading, CycleState::ReadFail);
                        CycleOutcome::ReadFailed
                    }
                    Ok(raw) => {
                        self.transition(CycleState::Reading, CycleState::ReadOk);
                        self.write_datalog(&raw);

                        self.transition(CycleState::ReadOk, CycleState::Normalizing);
                        match contain(|| Ok(normalize(&self.channel_map, &raw))) {
                            Err(err) => {
                                error!("sample lost, could not normalize it: {}", err);
                                CycleOutcome::PersistFailed
                            }
                            Ok(reading) => {
                                for (name, value) in reading.iter() {
                                    info!("  {}: {}", name, value);
                                }

                                self.transition(CycleState::Normalizing, CycleState::Persisting);
                                match self.persist(&reading).await {
                                    Ok(timestamp) => {
                                        info!("sample stored at {}", timestamp);
                                        CycleOutcome::Persisted { timestamp }
                                    }
                                    Err(err) => {
                                        error!("sample lost, could not store it: {}", err);
                                        CycleOutcome::PersistFailed
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };

        debug!("cycle state -> {:?} ({:?})", CycleState::Done, outcome);
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.record(&outcome);
        }

        outcome
    }

    async fn connect(&self) -> Result<TransportSession, ConnectFailure> {
        AssertUnwindSafe(TransportSession::acquire(self.transport.as_ref(), self.timeout))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ConnectFailure::Fault(panic_message(panic.as_ref()))))
    }

    async fn read(&self, session: TransportSession) -> Result<RawReading, ReadFailure> {
        AssertUnwindSafe(self.reader.read(session))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ReadFailure::Fault(panic_message(panic.as_ref()))))
    }

    async fn persist(&self, reading: &NormalizedReading) -> Result<String, PersistFailure> {
        AssertUnwindSafe(self.database.append(reading))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PersistFailure::Fault(panic_message(panic.as_ref()))))
    }

    fn write_datalog(&self, raw: &RawReading) {
        let Some(datalog) = &self.datalog else {
            return;
        };

        if let Err(err) = contain(|| datalog.write(raw, self.clock.wall().timestamp())) {
            warn!("datalog write failed: {}", err);
            if let Ok(mut stats) = self.shared_stats.lock() {
                stats.datalog_failures += 1;
            }
        }
    }

    fn transition(&self, from: CycleState, to: CycleState) {
        debug!("cycle state {:?} -> {:?}", from, to);
    }
}

/// Runs a synchronous stage, turning a panic into an error.
fn contain<T>(stage: impl FnOnce() -> Result<T>) -> Result<T> {
    std::panic::catch_unwind(AssertUnwindSafe(stage))
        .unwrap_or_else(|panic| Err(anyhow!("fault: {}", panic_message(panic.as_ref()))))
}

#[async_trait]
impl Job for Acquisition {
    async fn run(&self) {
        self.run_cycle().await;
    }
}

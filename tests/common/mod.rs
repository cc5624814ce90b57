#![allow(dead_code)]

use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mimamori::clock::ManualClock;
use mimamori::database::Database;
use mimamori::prelude::*;
use mimamori::transport::{RegisterConnection, RegisterTransport};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    pub fn channel_map() -> Arc<ChannelMap> {
        Arc::new(
            ChannelMap::new(vec![
                ChannelDefinition::new(0, "temperature", 10.0),
                ChannelDefinition::new(1, "humidness", 10.0),
                ChannelDefinition::new(2, "EC_conductivity", 1.0),
                ChannelDefinition::new(3, "PH", 10.0),
            ])
            .unwrap(),
        )
    }

    pub fn config(extra: &str) -> Config {
        let yaml = format!(
            "port: /dev/ttyACM0\nchannelMap:\n  - {{ address: 0, name: temperature, divisor: 10 }}\n{}",
            extra
        );
        Config::from_yaml(&yaml).unwrap()
    }

    pub fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            chrono::Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        ))
    }

    pub fn database(dir: &tempfile::TempDir, channel_map: Arc<ChannelMap>, clock: Arc<ManualClock>) -> Database {
        let path = dir.path().join("sensor_data.db");
        Database::new(path.to_str().unwrap(), channel_map, clock)
    }
}

/// What a mock device does when asked for registers.
#[derive(Clone, Debug)]
pub enum Behaviour {
    Respond(Vec<u16>),
    Exception(tokio_modbus::ExceptionCode),
    Broken,
    HangOnRead,
    PanicOnRead,
    Refuse,
    HangOnConnect,
}

/// Counters shared between a mock transport and the test that owns it.
#[derive(Clone, Default)]
pub struct Probe {
    connects: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    reads: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl Probe {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections handed out and not yet dropped.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Connections closed through `close()` rather than just dropped.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.reads.lock().unwrap().clone()
    }
}

pub struct MockTransport {
    behaviour: Behaviour,
    pub probe: Probe,
}

impl MockTransport {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            probe: Probe::default(),
        }
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    fn describe(&self) -> String {
        "mock device".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn RegisterConnection>, ConnectFailure> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);

        match self.behaviour {
            Behaviour::Refuse => {
                return Err(ConnectFailure::Open {
                    port: "/dev/ttyACM0".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
                })
            }
            Behaviour::HangOnConnect => std::future::pending::<()>().await,
            _ => {}
        }

        self.probe.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            behaviour: self.behaviour.clone(),
            probe: self.probe.clone(),
        }))
    }
}

struct MockConnection {
    behaviour: Behaviour,
    probe: Probe,
}

#[async_trait]
impl RegisterConnection for MockConnection {
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, ReadFailure> {
        self.probe.reads.lock().unwrap().push((start, count));

        match &self.behaviour {
            Behaviour::Respond(values) => Ok(values.clone()),
            Behaviour::Exception(code) => Err(ReadFailure::Exception(code.clone())),
            Behaviour::Broken => Err(ReadFailure::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "serial line went away",
            ))),
            Behaviour::HangOnRead => std::future::pending().await,
            Behaviour::PanicOnRead => panic!("device driver exploded"),
            Behaviour::Refuse | Behaviour::HangOnConnect => unreachable!(),
        }
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.probe.open.fetch_sub(1, Ordering::SeqCst);
    }
}

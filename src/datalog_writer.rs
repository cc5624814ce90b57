use crate::prelude::*;
use crate::transport::RawReading;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Appends every raw register block to a JSON-lines file, so samples lost
/// to a persistence failure can still be recovered by hand.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    station_id: u8,
    blocks_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str, station_id: u8) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow!("failed to open datalog file {}: {}", path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .map_err(|e| anyhow!("failed to set permissions on datalog file {}: {}", path, e))?;
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            station_id,
            blocks_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write(&self, raw: &RawReading, utc_timestamp: i64) -> Result<()> {
        let mut raw_data = serde_json::Map::new();
        for (address, value) in raw.pairs() {
            raw_data.insert(
                address.to_string(),
                serde_json::Value::String(format!("0x{:04X}", value)),
            );
        }

        let line = serde_json::to_string(&serde_json::json!({
            "utc_timestamp": utc_timestamp,
            "station_id": self.station_id,
            "start": raw.start,
            "raw_data": raw_data,
        }))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| anyhow!("failed to write datalog file {}: {}", self.path, e))?;

        let mut blocks_written = self
            .blocks_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock block counter"))?;
        *blocks_written += 1;
        debug!("{} register blocks stored in datalog file", *blocks_written);

        Ok(())
    }
}

pub use anyhow::{anyhow, bail, Context as _, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channel_map::{ChannelDefinition, ChannelMap};
pub use crate::clock::{Clock, SystemClock};
pub use crate::config::Config;
pub use crate::error::{ConnectFailure, PersistFailure, ReadFailure};

pub use std::io::Write;
pub use std::str::FromStr;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::command::Command;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::coordinator::{self, Coordinator};
pub use crate::mi::inverter::Serial;
pub use crate::mqtt::{self, Mqtt};
pub use crate::options::Options;
pub use crate::radio::{self, Radio};
pub use crate::scheduler::Scheduler;
pub use crate::utils::Utils;

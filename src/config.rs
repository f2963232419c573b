use crate::prelude::*;

use crate::mi::protocol::ProtocolRevision;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverters: Vec<Inverter>,
    pub mqtt: Mqtt,
    pub radio: Radio,

    pub scheduler: Option<Scheduler>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    pub read_only: bool,

    #[serde(default = "Config::default_max_retransmits")]
    pub max_retransmits: u8,

    #[serde(default = "Config::default_strict_crc")]
    pub strict_crc: bool,
}

// Inverter {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(deserialize_with = "de_serial")]
    pub serial: Option<Serial>,

    /// Channel count override; normally derived from the serial.
    pub channels: Option<u8>,

    pub revision: Option<ProtocolRevision>,

    /// Configured module power per channel in watts, used for the
    /// irradiance estimate.
    pub max_channel_power: Option<Vec<f64>>,
}
impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    pub fn channels(&self) -> Option<u8> {
        self.channels
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision.unwrap_or_default()
    }

    pub fn max_channel_power(&self, channels: u8) -> Vec<f64> {
        let mut power = self.max_channel_power.clone().unwrap_or_default();
        power.resize(channels as usize, 0.0);
        power
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Radio {{{
/// The radio gateway exposing the RF transceiver over TCP.
#[derive(Clone, Debug, Deserialize)]
pub struct Radio {
    pub host: String,
    pub port: u16,
}
impl Radio {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
} // }}}

// Scheduler {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Scheduler {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "Config::default_tick_millis")]
    pub tick_millis: u64,
}
impl Scheduler {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    pub fn tick_millis(&self) -> u64 {
        self.tick_millis
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self {
            config: Arc::new(Mutex::new(config)),
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn inverters(&self) -> Vec<Inverter> {
        self.config.lock().unwrap().inverters.clone()
    }

    pub fn enabled_inverters(&self) -> Vec<Inverter> {
        self.inverters().into_iter().filter(|i| i.enabled()).collect()
    }

    pub fn enabled_inverter_with_serial(&self, serial: Serial) -> Option<Inverter> {
        self.enabled_inverters()
            .into_iter()
            .find(|i| i.serial() == Some(serial))
    }

    pub fn inverters_for_message(&self, message: &mqtt::Message) -> Result<Vec<Inverter>> {
        let (target_inverter, _) = message.split_cmd_topic()?;
        let inverters = self.enabled_inverters();

        match target_inverter {
            mqtt::TargetInverter::All => Ok(inverters),
            mqtt::TargetInverter::Serial(serial) => Ok(inverters
                .into_iter()
                .filter(|i| i.serial() == Some(serial))
                .collect()),
        }
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn radio(&self) -> Radio {
        self.config.lock().unwrap().radio.clone()
    }

    pub fn scheduler(&self) -> Option<Scheduler> {
        self.config.lock().unwrap().scheduler.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    pub fn read_only(&self) -> bool {
        self.config.lock().unwrap().read_only
    }

    pub fn max_retransmits(&self) -> u8 {
        self.config.lock().unwrap().max_retransmits
    }

    pub fn strict_crc(&self) -> bool {
        self.config.lock().unwrap().strict_crc
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| crate::file_error!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!(
            "  Inverters: {} configured, {} enabled",
            config.inverters.len(),
            config.inverters.iter().filter(|i| i.enabled).count()
        );
        info!(
            "  MQTT: {}",
            if config.mqtt.enabled { "enabled" } else { "disabled" }
        );
        info!("  Radio: {}:{}", config.radio.host, config.radio.port);
        info!("  Read Only: {}", config.read_only);
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
        }

        if self.radio.port == 0 {
            bail!("radio.port must be between 1 and 65535");
        }
        if self.radio.host.is_empty() {
            bail!("radio.host cannot be empty");
        }

        for (i, inverter) in self.inverters.iter().enumerate() {
            if inverter.enabled {
                if inverter.serial.is_none() {
                    bail!("inverter[{}].serial is required", i);
                }
                if let Some(channels) = inverter.channels {
                    if !matches!(channels, 1 | 2 | 4) {
                        bail!("inverter[{}].channels must be 1, 2 or 4", i);
                    }
                }
            }
        }

        if let Some(scheduler) = &self.scheduler {
            if scheduler.enabled && scheduler.tick_millis == 0 {
                bail!("scheduler.tick_millis cannot be 0");
            }
        }

        Ok(())
    }

    fn default_mqtt_port() -> u16 {
        1883
    }
    fn default_mqtt_namespace() -> String {
        "mi".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_max_retransmits() -> u8 {
        5
    }

    fn default_strict_crc() -> bool {
        false
    }

    fn default_poll_interval_secs() -> u64 {
        30
    }

    fn default_tick_millis() -> u64 {
        1000
    }
}

fn de_serial<'de, D>(deserializer: D) -> Result<Option<Serial>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Serial::from_str(&s).map(Some).map_err(serde::de::Error::custom)
    }
}

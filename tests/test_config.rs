mod common;
use common::*;

use mi_bridge::prelude::*;
use mi_bridge::mi::protocol::ProtocolRevision;

use std::io::Write as _;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_minimal_config() {
    common_setup();

    let file = write_config(
        r#"
inverters:
  - serial: "104162804632"
mqtt:
  host: localhost
radio:
  host: 192.168.1.10
  port: 8899
read_only: false
"#,
    );

    let config = Config::new(file.path().to_string_lossy().to_string()).unwrap();
    assert_eq!(config.inverters.len(), 1);
    assert_eq!(config.max_retransmits, 5);
    assert!(!config.strict_crc);
    assert_eq!(config.mqtt.port(), 1883);
    assert_eq!(config.mqtt.namespace(), "mi");

    let inverter = &config.inverters[0];
    assert_eq!(
        inverter.serial().unwrap().to_string(),
        "104162804632"
    );
    assert_eq!(inverter.revision(), ProtocolRevision::Current);
    // unset channel powers give a zeroed vector sized to the device
    assert_eq!(inverter.max_channel_power(2), vec![0.0, 0.0]);
}

#[test]
fn loads_inverter_overrides() {
    common_setup();

    let file = write_config(
        r#"
inverters:
  - serial: "104162804632"
    channels: 2
    revision: legacy
    max_channel_power: [380.0]
mqtt:
  host: localhost
radio:
  host: 192.168.1.10
  port: 8899
read_only: true
strict_crc: true
max_retransmits: 3
scheduler:
  poll_interval_secs: 15
  tick_millis: 500
"#,
    );

    let config = Config::new(file.path().to_string_lossy().to_string()).unwrap();
    let inverter = &config.inverters[0];
    assert_eq!(inverter.channels(), Some(2));
    assert_eq!(inverter.revision(), ProtocolRevision::Legacy);
    assert_eq!(inverter.max_channel_power(2), vec![380.0, 0.0]);

    assert!(config.read_only);
    assert!(config.strict_crc);
    assert_eq!(config.max_retransmits, 3);

    let scheduler = config.scheduler.unwrap();
    assert_eq!(scheduler.poll_interval_secs(), 15);
    assert_eq!(scheduler.tick_millis(), 500);
}

#[test]
fn rejects_enabled_inverter_without_serial() {
    common_setup();

    let file = write_config(
        r#"
inverters:
  - serial: ""
mqtt:
  host: localhost
radio:
  host: 192.168.1.10
  port: 8899
read_only: false
"#,
    );

    assert!(Config::new(file.path().to_string_lossy().to_string()).is_err());
}

#[test]
fn rejects_bad_channel_count() {
    common_setup();

    let file = write_config(
        r#"
inverters:
  - serial: "104162804632"
    channels: 3
mqtt:
  host: localhost
radio:
  host: 192.168.1.10
  port: 8899
read_only: false
"#,
    );

    assert!(Config::new(file.path().to_string_lossy().to_string()).is_err());
}

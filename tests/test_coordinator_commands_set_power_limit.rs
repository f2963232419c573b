mod common;
use common::*;

use mi_bridge::prelude::*;
use mi_bridge::coordinator::commands::SetPowerLimit;

#[tokio::test]
async fn publishes_ok_on_accepted_ack() {
    common_setup();

    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let inverter = Factory::config_inverter("104162804632");
    let serial = inverter.serial().unwrap();
    let command = Command::SetPowerLimitPct(inverter, 60);

    let subject = SetPowerLimit::new(channels.clone(), command, serial);

    let sf = async { subject.run().await };

    let tf = async {
        channels
            .to_coordinator
            .send(coordinator::ChannelData::PowerLimitAck(serial, true))?;
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();

    match to_mqtt.recv().await.unwrap() {
        mqtt::ChannelData::Message(message) => {
            assert_eq!(message.topic, "result/104162804632/set/power_limit_pct");
            assert_eq!(message.payload, "OK");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn publishes_fail_on_rejected_ack() {
    common_setup();

    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let inverter = Factory::config_inverter("104162804632");
    let serial = inverter.serial().unwrap();
    let command = Command::SetPowerLimitWatts(inverter, 300);

    let subject = SetPowerLimit::new(channels.clone(), command, serial);

    let sf = async { subject.run().await };

    let tf = async {
        // an ack for some other device first, then the rejection
        channels
            .to_coordinator
            .send(coordinator::ChannelData::PowerLimitAck(Serial::new(1), true))?;
        channels
            .to_coordinator
            .send(coordinator::ChannelData::PowerLimitAck(serial, false))?;
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();

    match to_mqtt.recv().await.unwrap() {
        mqtt::ChannelData::Message(message) => {
            assert_eq!(message.topic, "result/104162804632/set/power_limit_watts");
            assert_eq!(message.payload, "FAIL");
        }
        other => panic!("unexpected {:?}", other),
    }
}

use crate::prelude::*;

/// Drives the polling cadence: a fast tick feeding the retry state machine
/// and a slower interval starting fresh request cycles.
#[derive(Clone)]
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let scheduler = self.config.scheduler().unwrap_or_else(Self::defaults);
        if !scheduler.enabled() {
            info!("scheduler disabled, skipping");
            return Ok(());
        }

        let mut tick =
            tokio::time::interval(std::time::Duration::from_millis(scheduler.tick_millis()));
        let mut poll = tokio::time::interval(std::time::Duration::from_secs(
            scheduler.poll_interval_secs(),
        ));
        let mut shutdown = self.channels.to_coordinator.subscribe();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let _ = self
                        .channels
                        .to_coordinator
                        .send(coordinator::ChannelData::PollTick);
                }
                _ = poll.tick() => {
                    let _ = self
                        .channels
                        .to_coordinator
                        .send(coordinator::ChannelData::StartCycles { high_priority: false });
                }
                message = shutdown.recv() => {
                    if let Ok(coordinator::ChannelData::Shutdown) = message {
                        break;
                    }
                }
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    fn defaults() -> config::Scheduler {
        config::Scheduler {
            enabled: true,
            poll_interval_secs: 30,
            tick_millis: 1000,
        }
    }
}

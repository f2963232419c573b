use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_radio: broadcast::Sender<radio::ChannelData>,
    pub to_radio: broadcast::Sender<radio::ChannelData>,
    pub from_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
    pub to_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
    pub to_coordinator: broadcast::Sender<coordinator::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_radio: Self::channel(),
            to_radio: Self::channel(),
            from_mqtt: Self::channel(),
            to_mqtt: Self::channel(),
            to_coordinator: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}

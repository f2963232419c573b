pub mod set_power_limit;

pub use set_power_limit::SetPowerLimit;

use crate::prelude::*;

/// A command that blocks on a device acknowledgement arriving on the
/// coordinator event channel.
#[async_trait::async_trait]
pub trait WaitForAck {
    async fn wait_for_ack(&mut self) -> Result<bool>;
}

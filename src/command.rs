use crate::prelude::*;

#[derive(Debug, Clone)]
pub enum Command {
    SetPowerLimitPct(config::Inverter, u16),
    SetPowerLimitWatts(config::Inverter, u16),
    ReadHardwareInfo(config::Inverter),
    ReadAlarms(config::Inverter),
    ReadConfig(config::Inverter),
    Restart(config::Inverter),
    CleanState(config::Inverter),
}

impl Command {
    pub fn inverter(&self) -> &config::Inverter {
        use Command::*;

        match self {
            SetPowerLimitPct(inverter, _)
            | SetPowerLimitWatts(inverter, _)
            | ReadHardwareInfo(inverter)
            | ReadAlarms(inverter)
            | ReadConfig(inverter)
            | Restart(inverter)
            | CleanState(inverter) => inverter,
        }
    }

    /// Whether the command changes device state, as opposed to reading it.
    pub fn is_mutation(&self) -> bool {
        use Command::*;

        matches!(
            self,
            SetPowerLimitPct(_, _) | SetPowerLimitWatts(_, _) | Restart(_) | CleanState(_)
        )
    }

    pub fn to_result_topic(&self) -> String {
        use Command::*;

        let serial = self
            .inverter()
            .serial()
            .map(|s| s.to_string())
            .unwrap_or_default();

        let rest = match self {
            SetPowerLimitPct(_, _) => format!("{}/set/power_limit_pct", serial),
            SetPowerLimitWatts(_, _) => format!("{}/set/power_limit_watts", serial),
            ReadHardwareInfo(_) => format!("{}/read/info", serial),
            ReadAlarms(_) => format!("{}/read/alarms", serial),
            ReadConfig(_) => format!("{}/read/config", serial),
            Restart(_) => format!("{}/restart", serial),
            CleanState(_) => format!("{}/clean_state", serial),
        };

        format!("result/{}", rest)
    }
}

use serde::Serialize;
use std::collections::HashMap;

/// Measurement field kinds. Channel slot 0 is the device aggregate,
/// slots 1..=4 the physical DC inputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DcVoltage,
    DcCurrent,
    AcVoltage,
    Frequency,
    DcPower,
    YieldDay,
    Temperature,
    Irradiation,
    AcPower,
    Event,
    FwVersion,
    FwBuildYear,
    FwBuildDate,
    FwBuildTime,
    HwVersion,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::DcVoltage => "dc_voltage",
            Field::DcCurrent => "dc_current",
            Field::AcVoltage => "ac_voltage",
            Field::Frequency => "frequency",
            Field::DcPower => "dc_power",
            Field::YieldDay => "yield_day",
            Field::Temperature => "temperature",
            Field::Irradiation => "irradiation",
            Field::AcPower => "ac_power",
            Field::Event => "event",
            Field::FwVersion => "fw_version",
            Field::FwBuildYear => "fw_build_year",
            Field::FwBuildDate => "fw_build_date",
            Field::FwBuildTime => "fw_build_time",
            Field::HwVersion => "hw_version",
        }
    }
}

/// The per-inverter measurement record the decoders write into. Values are
/// keyed by channel slot and field kind; the record never forgets a field, a
/// new cycle just overwrites.
#[derive(Clone, Debug, Default)]
pub struct Record {
    pub ts: u64,
    values: HashMap<(u8, Field), f64>,
}

impl Record {
    pub fn set(&mut self, channel: u8, field: Field, value: f64) {
        self.values.insert((channel, field), value);
    }

    pub fn get(&self, channel: u8, field: Field) -> Option<f64> {
        self.values.get(&(channel, field)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Daily yield for the device aggregate: the sum over the physical
    /// channels' per-channel daily yields.
    pub fn yield_day_total(&self, channels: u8) -> f64 {
        (1..=channels)
            .filter_map(|ch| self.get(ch, Field::YieldDay))
            .sum()
    }

    /// Derived aggregate values recomputed after a cycle finishes or the
    /// fallback decoder applies a payload.
    pub fn update_derived(&mut self, channels: u8) {
        let dc_total: f64 = (1..=channels)
            .filter_map(|ch| self.get(ch, Field::DcPower))
            .sum();
        self.set(0, Field::DcPower, dc_total);
    }

    /// JSON object for MQTT publishing: `{"ts": .., "channels": {"0": {..}}}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut channels: HashMap<String, serde_json::Map<String, serde_json::Value>> =
            HashMap::new();

        for ((channel, field), value) in &self.values {
            channels
                .entry(channel.to_string())
                .or_default()
                .insert(field.as_str().to_string(), serde_json::json!(value));
        }

        serde_json::json!({ "ts": self.ts, "channels": channels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_day_total_sums_physical_channels() {
        let mut record = Record::default();
        record.set(1, Field::YieldDay, 250.0);
        record.set(2, Field::YieldDay, 300.0);
        record.set(0, Field::YieldDay, 999.0); // aggregate slot must not count
        assert_eq!(record.yield_day_total(2), 550.0);
    }

    #[test]
    fn update_derived_aggregates_dc_power() {
        let mut record = Record::default();
        record.set(1, Field::DcPower, 120.0);
        record.set(2, Field::DcPower, 80.5);
        record.update_derived(2);
        assert_eq!(record.get(0, Field::DcPower), Some(200.5));
    }

    #[test]
    fn json_shape() {
        let mut record = Record::default();
        record.ts = 1700000000;
        record.set(0, Field::AcPower, 42.0);
        let json = record.to_json();
        assert_eq!(json["ts"], 1700000000);
        assert_eq!(json["channels"]["0"]["ac_power"], 42.0);
    }
}

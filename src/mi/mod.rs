pub mod frame;
pub mod inverter;
pub mod payload;
pub mod protocol;
pub mod record;

pub mod max86150;
pub mod thermistor;

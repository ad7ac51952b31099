//! The master's own onboard sensor.

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: {operation} timed out")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: initialization failed ({details})")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// What the master logs about itself each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnboardReadings {
    pub temperature_celsius: f32,
    pub humidity_percent: Option<f32>,
}

/// Placeholder for boards without an onboard sensor.
pub struct NoSensor;

impl Sensor for NoSensor {
    type Readings = OnboardReadings;

    async fn read(&mut self) -> Result<OnboardReadings, SensorError> {
        Err(SensorError::InitializationFailed {
            sensor: "none",
            details: "no onboard sensor fitted",
        })
    }
}

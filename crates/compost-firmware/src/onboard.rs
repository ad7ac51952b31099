use compost_core::sensors::{OnboardReadings, Sensor, SensorError};
use embassy_time::Delay;
use embedded_hal_async::i2c::I2c;
use sht4x::{Precision, Sht4xAsync};

/// SHT40 inside the master enclosure. Its temperature feeds the master store.
pub struct Sht40Sensor<I> {
    inner: Sht4xAsync<I, Delay>,
}

impl<I: I2c> Sht40Sensor<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            inner: Sht4xAsync::new(i2c),
        }
    }
}

impl<I: I2c> Sensor for Sht40Sensor<I> {
    type Readings = OnboardReadings;

    async fn read(&mut self) -> Result<OnboardReadings, SensorError> {
        let measurement = match self.inner.measure(Precision::High, &mut Delay).await {
            Ok(m) => m,
            Err(e) => {
                log::error!("[ONBOARD] SHT40 not answering: {:?}", e);
                return Err(SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "measure",
                    details: "no answer on I2C",
                });
            }
        };

        Ok(OnboardReadings {
            temperature_celsius: measurement.temperature_celsius().to_num::<f32>(),
            humidity_percent: Some(measurement.humidity_percent().to_num::<f32>()),
        })
    }
}

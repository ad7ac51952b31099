//! Synthetic measurements that drift with virtual time.

use compost_core::sensors::{OnboardReadings, Sensor, SensorError};

pub struct NodeSample {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub oxygen: f32,
}

/// Generates readings that vary over the simulated days.
#[derive(Clone, Copy)]
pub struct MockSensorGenerator {
    /// Virtual seconds since the first wake.
    elapsed_secs: f64,
}

impl MockSensorGenerator {
    pub fn new(elapsed_secs: f64) -> Self {
        Self { elapsed_secs }
    }

    pub fn node_sample(&self, id: u8) -> NodeSample {
        let t = self.elapsed_secs;
        let day = t / 86_400.0;

        // Fresh input heats up most, the pile cools as it matures.
        let (base, swing) = match id {
            1 => (55.0, 10.0),
            2 => (35.0, 5.0),
            _ => (15.0, 6.0),
        };
        let temperature = base + swing * (day * core::f64::consts::TAU).sin();
        let humidity = 60.0 + 8.0 * (t / 7_200.0).sin() + 1.5 * (t / 1_300.0).cos();
        let pressure = 1013.0 + 4.0 * (t / 43_200.0).sin();
        let oxygen = 17.0 + 2.5 * (t / 10_800.0).cos();

        NodeSample {
            temperature: temperature as f32,
            humidity: humidity as f32,
            pressure: pressure as f32,
            oxygen: oxygen as f32,
        }
    }

    pub fn onboard_temperature(&self) -> f32 {
        let day = self.elapsed_secs / 86_400.0;
        (21.0 + 2.0 * (day * core::f64::consts::TAU).sin()) as f32
    }
}

pub struct SimOnboardSensor {
    generator: MockSensorGenerator,
}

impl SimOnboardSensor {
    pub fn new(generator: MockSensorGenerator) -> Self {
        Self { generator }
    }
}

impl Sensor for SimOnboardSensor {
    type Readings = OnboardReadings;

    async fn read(&mut self) -> Result<OnboardReadings, SensorError> {
        Ok(OnboardReadings {
            temperature_celsius: self.generator.onboard_temperature(),
            humidity_percent: None,
        })
    }
}

use serde::Serialize;

/// Value a DS18B20 driver reports when the probe is not on the bus.
pub const DISCONNECTED_C: f64 = -127.0;

#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub api_key: String,
    pub device_id: String,
    pub temperature_c: f64,
    pub temperature_f: f64,
}

impl Reading {
    pub fn new(api_key: &str, device_id: &str, temperature_c: f64) -> Self {
        Self {
            api_key: api_key.to_string(),
            device_id: device_id.to_string(),
            temperature_c: round2(temperature_c),
            temperature_f: round2(temperature_c * 9.0 / 5.0 + 32.0),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fahrenheit_conversion() {
        let reading = Reading::new("k", "pool-monitor-01", 26.666);
        assert_eq!(reading.temperature_c, 26.67);
        assert_eq!(reading.temperature_f, 80.0);
    }
}

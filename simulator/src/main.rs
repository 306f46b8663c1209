mod telemetry;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::time::Duration;
use telemetry::{Reading, DISCONNECTED_C};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated pool monitor posting water temperature to the relay.
#[derive(Debug, Parser)]
struct Args {
    /// Ingress endpoint of the relay
    #[arg(long, env = "RELAY_URL", default_value = "http://localhost:8080/pool-data")]
    url: String,

    /// Shared secret expected by the relay
    #[arg(long, env = "RELAY_API_KEY")]
    api_key: String,

    #[arg(long, env = "DEVICE_ID", default_value = "pool-monitor-01")]
    device_id: String,

    /// Seconds between readings
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 60)]
    interval_secs: u64,

    /// Probability that a read reports a disconnected probe
    #[arg(long, env = "DROPOUT_RATE", default_value_t = 0.02)]
    dropout_rate: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!("Starting pool monitor simulator");
    info!(
        "Relay: {}, Device: {}, Interval: {}s",
        args.url, args.device_id, args.interval_secs
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let mut water_c: f64 = 26.0;

    loop {
        let temperature_c = read_probe(&mut rand::thread_rng(), &mut water_c, args.dropout_rate);

        if temperature_c == DISCONNECTED_C {
            warn!("Error: Could not read temperature data");
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        }

        let reading = Reading::new(&args.api_key, &args.device_id, temperature_c);
        info!(
            "Temperature: {:.2} C / {:.2} F",
            reading.temperature_c, reading.temperature_f
        );

        match client.post(&args.url).json(&reading).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.is_success() {
                    info!("HTTP Response code: {}", status.as_u16());
                } else {
                    warn!("HTTP Response code: {}: {}", status.as_u16(), body);
                }
            }
            Err(e) => error!("Error on sending POST: {}", e),
        }

        tokio::time::sleep(Duration::from_secs(args.interval_secs)).await;
    }
}

/// Slow random walk around a pool temperature, with occasional probe dropouts.
fn read_probe(rng: &mut impl Rng, water_c: &mut f64, dropout_rate: f64) -> f64 {
    if rng.gen_bool(dropout_rate.clamp(0.0, 1.0)) {
        return DISCONNECTED_C;
    }
    *water_c = (*water_c + rng.gen_range(-0.3..0.3)).clamp(10.0, 35.0);
    *water_c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_probe_stays_in_range() {
        let mut rng = rand::thread_rng();
        let mut water_c = 26.0;
        for _ in 0..1000 {
            let t = read_probe(&mut rng, &mut water_c, 0.0);
            assert!((10.0..=35.0).contains(&t));
        }
    }

    #[test]
    fn test_read_probe_dropout() {
        let mut rng = rand::thread_rng();
        let mut water_c = 26.0;
        assert_eq!(read_probe(&mut rng, &mut water_c, 1.0), DISCONNECTED_C);
        assert_eq!(water_c, 26.0);
    }
}

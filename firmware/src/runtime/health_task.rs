use embassy_time::{Duration, Timer};

use crate::status;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[embassy_executor::task]
pub async fn run() -> ! {
    let mut last = status::snapshot();
    loop {
        Timer::after(REPORT_INTERVAL).await;
        let health = status::snapshot();
        if health.passes == last.passes {
            defmt::warn!("health: control loop made no progress");
        }
        if health.rx_dropped != last.rx_dropped || health.tx_dropped != last.tx_dropped {
            defmt::warn!("health: {}", health);
        } else {
            defmt::debug!("health: {}", health);
        }
        last = health;
    }
}

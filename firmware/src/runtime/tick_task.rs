use embassy_time::{Duration, Ticker};
use pdm_core::timer::TimerBank;

/// Drives the core timer bank from the embassy time base. A late wake-up
/// catches up tick by tick, so countdowns never skip.
#[embassy_executor::task]
pub async fn run(timers: &'static TimerBank) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        timers.tick();
    }
}

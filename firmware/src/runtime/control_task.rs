use embassy_futures::yield_now;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use pdm_core::board::{Board, drain_frames};
use pdm_core::timer::TimerBank;

use super::{ActiveBoard, BoardIo};
use crate::bus::BusQueue;
use crate::status;

/// The main loop: drain inbound frames, run one scheduler pass, hand parked
/// frames to the CAN task, then pet the watchdog. A pass that wedges stops
/// the petting and the watchdog resets the module.
#[embassy_executor::task]
pub async fn run(
    mut board: ActiveBoard,
    mut io: BoardIo,
    timers: &'static TimerBank,
    queue: &'static BusQueue,
    watchdog: &'static mut IndependentWatchdog<'static, IWDG>,
) -> ! {
    let inbound = queue.rx_receiver();
    watchdog.unleash();
    loop {
        drain_frames::<BoardIo, _>(&mut board, timers, || inbound.try_receive().ok());
        board.pass(&mut io, timers);
        let parked = io.flush();
        status::record_pass(parked);
        watchdog.pet();
        yield_now().await;
    }
}

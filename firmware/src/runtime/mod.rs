use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::can::{self, CanConfigurator};
use embassy_stm32::peripherals::{FDCAN1, IWDG};
use embassy_stm32::wdg::IndependentWatchdog;
use pdm_core::timer::{TimerBank, TimerError};
use static_cell::StaticCell;

use crate::bus::{BusQueue, QueuedTx};
use crate::hw::{AnalogInputs, BoardPins, ControlLines, LampDrivers};
use crate::io::FirmwareIo;

mod can_task;
mod control_task;
mod health_task;
mod tick_task;

#[cfg(not(any(feature = "head", feature = "tail")))]
compile_error!("select a board with the `head` or `tail` feature");

#[cfg(feature = "head")]
type ActiveBoard = pdm_core::board::HeadUnit;
#[cfg(all(feature = "tail", not(feature = "head")))]
type ActiveBoard = pdm_core::board::TailUnit;

type BoardIo = FirmwareIo<'static, BoardPins<'static>>;

const BUS_BITRATE: u32 = 500_000;
const WATCHDOG_TIMEOUT_US: u32 = 250_000;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

hal::bind_interrupts!(struct Irqs {
    TIM16_FDCAN_IT0 => can::IT0InterruptHandler<FDCAN1>;
    TIM17_FDCAN_IT1 => can::IT1InterruptHandler<FDCAN1>;
});

static TIMERS: TimerBank = TimerBank::new();
static BUS: BusQueue = BusQueue::new();
static WATCHDOG: StaticCell<IndependentWatchdog<'static, IWDG>> = StaticCell::new();

#[cfg(feature = "head")]
fn build_board(timers: &TimerBank) -> Result<ActiveBoard, TimerError> {
    pdm_core::board::HeadUnit::new(timers, pdm_core::board::HeadConfig::DEFAULT)
}

#[cfg(all(feature = "tail", not(feature = "head")))]
fn build_board(timers: &TimerBank) -> Result<ActiveBoard, TimerError> {
    pdm_core::board::TailUnit::new(timers, pdm_core::board::TailConfig::DEFAULT)
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());
    defmt::info!(
        "pdm: {} unit starting",
        if cfg!(feature = "head") { "head" } else { "tail" }
    );

    let board = match build_board(&TIMERS) {
        Ok(board) => board,
        Err(err) => defmt::panic!("pdm: board construction failed: {}", err),
    };

    let pins = BoardPins::new(
        LampDrivers::new(p.TIM3, p.PA6, p.PA7, p.PB0, p.PB1),
        ControlLines::new(p.PB4, p.PB5, p.PB6),
        AnalogInputs::new(p.ADC1, p.PA0, p.PA1, p.PA4, p.PA5),
    );
    let io = FirmwareIo::new(pins, QueuedTx::new(BUS.tx_sender()));

    let mut can = CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    can.set_bitrate(BUS_BITRATE);
    let can = can.into_normal_mode();

    let watchdog = WATCHDOG.init(IndependentWatchdog::new(p.IWDG, WATCHDOG_TIMEOUT_US));

    defmt::unwrap!(spawner.spawn(tick_task::run(&TIMERS)));
    defmt::unwrap!(spawner.spawn(can_task::run(can, &BUS)));
    defmt::unwrap!(spawner.spawn(health_task::run()));
    defmt::unwrap!(spawner.spawn(control_task::run(board, io, &TIMERS, &BUS, watchdog)));

    defmt::info!("pdm: tasks running");
}

use core::panic::PanicInfo;

/// Logs and traps; the watchdog then resets the module with every output
/// back at its power-on level.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    defmt::error!("pdm: panic: {}", defmt::Display2Format(info));
    cortex_m::asm::udf();
}

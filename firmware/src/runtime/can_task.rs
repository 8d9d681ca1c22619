use embassy_futures::join::join;
use embassy_stm32::can::{Can, frame::Frame};
use embedded_can::Id;
use pdm_core::hal::CanFrame;

use crate::bus::{self, BusQueue};

#[embassy_executor::task]
pub async fn run(can: Can<'static>, queue: &'static BusQueue) -> ! {
    let (mut tx, mut rx, _properties) = can.split();
    let inbound = queue.rx_sender();
    let outbound = queue.tx_receiver();

    let receive = async move {
        loop {
            match rx.read().await {
                Ok(envelope) => {
                    if let Some(frame) = from_wire(&envelope.frame) {
                        bus::offer_inbound(&inbound, frame);
                    }
                }
                Err(err) => defmt::warn!("can: receive error {}", err),
            }
        }
    };

    let transmit = async move {
        loop {
            let frame = outbound.receive().await;
            match Frame::new_standard(frame.id, frame.payload()) {
                Ok(wire) => {
                    tx.write(&wire).await;
                }
                Err(_) => defmt::warn!("can: unencodable frame {=u16:#x}", frame.id),
            }
        }
    };

    join(receive, transmit).await;
    loop {
        core::future::pending::<()>().await;
    }
}

/// Extended and oversized frames are not part of the vehicle protocol.
fn from_wire(frame: &Frame) -> Option<CanFrame> {
    let Id::Standard(id) = frame.id() else {
        return None;
    };
    CanFrame::new(id.as_raw(), frame.data()).ok()
}

//! Fabric FPGA programmer firmware for Raspberry Pi Pico
//!
//! Serves the fabric programming protocol over USB CDC-ACM and configures
//! an ECP5 over slave SPI. The last megabyte of the Pico's flash holds the
//! stored bitstream, which is loaded into the FPGA at power-on.
//!
//! ## Pin Assignments
//!
//! | Pin   | Function        |
//! |-------|-----------------|
//! | GP10  | SCK             |
//! | GP11  | MOSI (FPGA SI)  |
//! | GP12  | MISO (FPGA SO)  |
//! | GP13  | CSN             |
//! | GP15  | PROGRAMN        |

#![no_std]
#![no_main]

mod board;

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::USB;
use embassy_rp::spi::{self, Spi};
use embassy_rp::usb::{Driver, InterruptHandler as UsbInterruptHandler};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::{Builder, UsbDevice};
use fabric_core::dispatch::Dispatcher;
use fabric_core::fpga::{Ecp5, SPI_CLOCK_HZ};
use fabric_core::store::{BitstreamStore, StoreGeometry};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::board::{Board, FlashDriver, FpgaSpi, OnboardFlash, UsbDriver, UsbLink, FLASH_SIZE};

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => UsbInterruptHandler<USB>;
});

/// Load the stored bitstream into the FPGA at power-on
const AUTO_PROGRAM_ON_STARTUP: bool = true;

pub const USB_VID: u16 = 0x2E8A;
pub const USB_PID: u16 = 0x000A;

type AppDispatcher = Dispatcher<UsbLink, FpgaSpi, OnboardFlash, Board>;

static DISPATCHER: StaticCell<AppDispatcher> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();
static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

fn usb_config() -> embassy_usb::Config<'static> {
    let mut config = embassy_usb::Config::new(USB_VID, USB_PID);
    config.manufacturer = Some("fabric");
    config.product = Some("pico-fabric");
    config.serial_number = Some("00000001");
    config.max_power = 100;
    config.max_packet_size_0 = 64;
    config
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("pico-fabric starting...");

    let p = embassy_rp::init(Default::default());

    // ---- FPGA slave SPI ----
    let mut spi_config = spi::Config::default();
    spi_config.frequency = SPI_CLOCK_HZ;
    spi_config.phase = spi::Phase::CaptureOnFirstTransition;
    spi_config.polarity = spi::Polarity::IdleLow;

    let spi = Spi::new(
        p.SPI1, p.PIN_10, p.PIN_11, p.PIN_12, p.DMA_CH0, p.DMA_CH1, spi_config,
    );
    let cs = Output::new(p.PIN_13, Level::High); // deasserted
    let program_n = Output::new(p.PIN_15, Level::High); // not in reset
    let bus = FpgaSpi::new(spi, cs, program_n);

    // ---- Flash store ----
    let geometry = StoreGeometry::default();
    let mut flash = FlashDriver::new_blocking(p.FLASH);
    let mut uid = [0u8; 8];
    if flash.blocking_unique_id(&mut uid).is_err() {
        warn!("Reading flash unique id failed");
    }
    let base = FLASH_SIZE as u32 - geometry.size();
    let region = OnboardFlash::new(flash, base, geometry.size());
    info!("Bitstream store at 0x{:08X}, {} bytes", base, geometry.size());

    // ---- USB CDC-ACM ----
    let driver = Driver::new(p.USB, Irqs);
    let mut builder = Builder::new(
        driver,
        usb_config(),
        CONFIG_DESC.init([0; 256]),
        BOS_DESC.init([0; 256]),
        MSOS_DESC.init([0; 256]),
        CONTROL_BUF.init([0; 64]),
    );
    let class = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(State::new()),
        board::USB_PACKET_SIZE as u16,
    );
    let usb = builder.build();
    spawner.must_spawn(usb_task(usb));

    let dispatcher = DISPATCHER.init(Dispatcher::new(
        UsbLink::new(class),
        Ecp5::new(bus),
        BitstreamStore::new(region, geometry),
        Board::new(uid),
    ));

    if dispatcher.startup(AUTO_PROGRAM_ON_STARTUP).await.is_err() {
        // No host attached yet
        warn!("Startup notice not delivered");
    }

    info!("pico-fabric ready");
    loop {
        dispatcher.poll().await;
    }
}

/// USB device task
#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) {
    usb.run().await;
}

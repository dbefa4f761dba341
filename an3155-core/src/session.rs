//! Session driver (§4.5): the linear phase-1-through-7-plus-99 state machine
//! that drives one flashing attempt to completion or to a terminal error.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info, warn};

use crate::chip::{self, ChipProfile};
use crate::codec::{self, ACK, GET, GET_ID, GO, NACK, SYNC_BYTE};
use crate::error::Error;
use crate::image::FirmwareImage;
use crate::port::PortIo;
use crate::{erase, write_verify};

/// Default bit rate for the bootloader session (tested range 1200..921600).
pub const DEFAULT_BAUDRATE: u32 = 57_600;

/// Period between auto-baud probes in Phase 1.
const AUTO_BAUD_RETRY_INTERVAL: Duration = Duration::from_millis(250);
/// Number of auto-baud probes attempted before giving up.
const AUTO_BAUD_MAX_ATTEMPTS: u32 = 4;
/// Two consecutive 2000ms watchdog ticks without progress, collapsed into
/// one deadline per in-flight exchange (see SPEC_FULL.md §5 / §9).
const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(4000);

/// Recognized configuration for a flashing attempt (§6).
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// If true, Phase 4 performs a global erase; otherwise a partial erase
    /// bounded by the image's top address.
    pub erase_chip: bool,
    /// Bit rate the bootloader session was opened at. Carried for logging;
    /// the port is assumed already configured at this rate.
    pub baud: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            erase_chip: false,
            baud: DEFAULT_BAUDRATE,
        }
    }
}

/// Upload phase identifiers (§4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AutoBaud,
    Get,
    GetId,
    Erase,
    Write,
    Verify,
    Go,
    Teardown,
}

/// State held for the lifetime of one flashing attempt (§3).
pub struct Session<'a, T> {
    pub(crate) port: Option<PortIo<T>>,
    pub(crate) options: Options,
    pub(crate) image: &'a FirmwareImage,
    pub(crate) chip: Option<ChipProfile>,
    pub(crate) use_extended_erase: bool,
    pub(crate) verify_buffer: Vec<Vec<u8>>,
    phase: Phase,
}

impl<'a, T> Session<'a, T>
where
    T: Read + Write,
{
    pub fn new(port: T, image: &'a FirmwareImage, options: Options) -> Self {
        Self {
            port: Some(PortIo::new(port)),
            options,
            image,
            chip: None,
            use_extended_erase: false,
            verify_buffer: Vec::new(),
            phase: Phase::AutoBaud,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drives the session through every phase to completion, tearing down
    /// exactly once regardless of which phase fails.
    pub fn run(mut self) -> Result<(), Error> {
        let result = self.drive();
        self.teardown();
        result
    }

    fn drive(&mut self) -> Result<(), Error> {
        self.phase = Phase::AutoBaud;
        self.auto_baud_sync()?;

        self.phase = Phase::Get;
        self.get()?;

        self.phase = Phase::GetId;
        self.get_id()?;

        self.phase = Phase::Erase;
        erase::erase(self)?;

        self.phase = Phase::Write;
        write_verify::write(self)?;

        self.phase = Phase::Verify;
        write_verify::verify(self)?;

        self.phase = Phase::Go;
        self.go()?;

        Ok(())
    }

    fn teardown(&mut self) {
        self.phase = Phase::Teardown;
        if let Some(port) = self.port.take() {
            // Dropping the transport closes it.
            drop(port.into_inner());
        }
    }

    fn port_mut(&mut self) -> &mut PortIo<T> {
        self.port.as_mut().expect("port is held until teardown")
    }

    pub(crate) fn send_and_ack(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.port_mut().send(frame)?;
        self.expect_ack()
    }

    pub(crate) fn expect_ack(&mut self) -> Result<(), Error> {
        let byte = self.port_mut().retrieve(1, WATCHDOG_TIMEOUT)?[0];
        match byte {
            ACK => Ok(()),
            NACK => Err(Error::ProtocolMismatch("received NACK".into())),
            other => Err(Error::ProtocolMismatch(format!(
                "expected ACK/NACK, got 0x{other:02X}"
            ))),
        }
    }

    pub(crate) fn retrieve(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        self.port_mut().retrieve(n, WATCHDOG_TIMEOUT)
    }

    /// Phase 1: auto-baud synchronization. Every 250ms, emit `0x7F` and await
    /// one byte; accept `0x7F`, ACK or NACK as success. Four attempts.
    fn auto_baud_sync(&mut self) -> Result<(), Error> {
        info!("starting auto-baud synchronization");
        for attempt in 1..=AUTO_BAUD_MAX_ATTEMPTS {
            debug!("auto-baud probe attempt {attempt}/{AUTO_BAUD_MAX_ATTEMPTS}");
            self.port_mut().send(&[SYNC_BYTE])?;
            match self.port_mut().retrieve(1, AUTO_BAUD_RETRY_INTERVAL) {
                Ok(bytes) => match bytes[0] {
                    SYNC_BYTE | ACK | NACK => {
                        info!("bootloader synchronized on attempt {attempt}");
                        return Ok(());
                    }
                    other => {
                        warn!("unexpected auto-baud response: 0x{other:02X}");
                    }
                },
                Err(Error::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::BootloaderUnresponsive)
    }

    /// Phase 2: GET. Records whether the bootloader's command set includes
    /// the extended-erase opcode.
    fn get(&mut self) -> Result<(), Error> {
        info!("sending GET");
        self.send_and_ack(&codec::command_frame(GET))?;
        let len = self.retrieve(1)?[0];
        // `block` is [bootloader_version, cmd_0, cmd_1, ...]; the source
        // reads the extended-erase flag at index 7 of this block, which
        // assumes the command list is long enough and ordered the way real
        // devices report it. Preserved verbatim (SPEC_FULL.md §9).
        let block = self.retrieve(len as usize + 1)?;
        self.expect_ack()?;
        self.use_extended_erase = block.get(7).copied() == Some(codec::EXTENDED_ERASE);
        debug!("use_extended_erase = {}", self.use_extended_erase);
        Ok(())
    }

    /// Phase 3: GET ID. Resolves the chip and validates the image fits.
    fn get_id(&mut self) -> Result<(), Error> {
        info!("sending GET ID");
        self.send_and_ack(&codec::command_frame(GET_ID))?;
        let len = self.retrieve(1)?[0];
        if len != 1 {
            return Err(Error::ProtocolMismatch(format!(
                "expected a single product-id length byte, got {len}"
            )));
        }
        let id_bytes = self.retrieve(2)?;
        self.expect_ack()?;
        let product_id = u16::from_be_bytes([id_bytes[0], id_bytes[1]]);

        let profile = chip::lookup(product_id).ok_or(Error::UnknownChip(product_id))?;
        if profile.available_flash_size == 0 {
            warn!(
                "chip {} (0x{:04X}) recognized but geometry unknown; aborting",
                profile.family, product_id
            );
            return Err(Error::UnknownChip(product_id));
        }
        // Strict `<`: an image exactly the size of flash is rejected.
        if self.image.bytes_total >= profile.available_flash_size {
            return Err(Error::ImageTooLarge {
                image_bytes: self.image.bytes_total,
                flash_size: profile.available_flash_size,
            });
        }
        info!(
            "identified chip: {} (0x{:04X}), {} bytes flash, {} byte pages",
            profile.family, product_id, profile.available_flash_size, profile.page_size
        );
        self.chip = Some(profile);
        Ok(())
    }

    /// Phase 7: GO.
    fn go(&mut self) -> Result<(), Error> {
        info!("sending GO at 0x{:08X}", crate::image::FLASH_BASE_ADDRESS);
        self.send_and_ack(&codec::command_frame(GO))?;
        self.send_and_ack(&codec::address_frame(crate::image::FLASH_BASE_ADDRESS))?;
        Ok(())
    }
}

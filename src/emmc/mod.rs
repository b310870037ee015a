mod block;
mod card;
mod clock;
mod config;
mod interrupt;
mod regs;
mod scr;

pub mod cmd;
pub mod constant;

use core::fmt::Display;

use log::{debug, info, warn};

use crate::{err::SdError, hal::EmmcHal};
use cmd::CommandResult;
use constant::*;

pub use block::BlockDevice;
pub use clock::clock_divider;
pub use cmd::{Command, DataBuffer};
pub use config::EmmcConfig;
pub use scr::{Scr, SdVersion};

/// Driver handle for multi-threaded callers. All entry points take
/// `&mut self`, so sharing goes through one lock.
pub type SharedEmmc<H> = spin::Mutex<EmmcHost<H>>;

/// What the driver has learned about the inserted card. Cleared at the
/// start of every card reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardSession {
    /// Relative card address; 0 means no usable session.
    pub rca: u32,
    pub ocr: u32,
    pub supports_sdhc: bool,
    pub supports_1_8v: bool,
    pub failed_voltage_switch: bool,
    pub base_clock: u32,
    pub card_removal: bool,
    pub scr: Scr,
    pub card_id: [u32; 4],
}

// SD Host Controller structure
pub struct EmmcHost<H> {
    hal: H,
    config: EmmcConfig,
    host_version: u32,
    session: CardSession,
    last: CommandResult,
    // Byte offset for the read/write adapter
    offset: u64,
    // Transfer context of the next data command
    block_size: u32,
    blocks_to_transfer: u32,
}

impl<H> Display for EmmcHost<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "EMMC Controller {{ version: {}, rca: {:#x}, sdhc: {}, base_clock: {} }}",
            self.host_version, self.session.rca, self.session.supports_sdhc, self.session.base_clock
        )
    }
}

impl<H: EmmcHal> EmmcHost<H> {
    pub fn new(hal: H) -> Self {
        Self::with_config(hal, EmmcConfig::default())
    }

    pub fn with_config(hal: H, config: EmmcConfig) -> Self {
        Self {
            hal,
            config,
            host_version: 0,
            session: CardSession::default(),
            last: CommandResult::new(),
            offset: 0,
            block_size: 0,
            blocks_to_transfer: 0,
        }
    }

    /// Check the controller revision and bring the card up.
    pub fn initialize(&mut self) -> Result<(), SdError> {
        let ver = self.read_reg(EMMC_SLOTISR_VER);
        let vendor = ver >> 24;
        self.host_version = (ver >> 16) & 0xff;
        let slot_status = ver & 0xff;
        debug!(
            "EMMC: vendor {:#x}, sdversion {:#x}, slot_status {:#x}",
            vendor, self.host_version, slot_status
        );

        if self.host_version < 2 {
            warn!("Only SDHCI versions >= 3.0 are supported");
            return Err(SdError::UnsupportedHost);
        }

        self.card_reset()?;

        info!("EMMC Controller ready: {}", self);
        Ok(())
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn config(&self) -> &EmmcConfig {
        &self.config
    }

    pub fn host_version(&self) -> u32 {
        self.host_version
    }

    pub fn session(&self) -> &CardSession {
        &self.session
    }

    pub fn rca(&self) -> u32 {
        self.session.rca
    }

    pub fn ocr(&self) -> u32 {
        self.session.ocr
    }

    pub fn supports_sdhc(&self) -> bool {
        self.session.supports_sdhc
    }

    pub fn supports_1_8v(&self) -> bool {
        self.session.supports_1_8v
    }

    pub fn failed_voltage_switch(&self) -> bool {
        self.session.failed_voltage_switch
    }

    pub fn card_id(&self) -> [u32; 4] {
        self.session.card_id
    }

    pub fn scr(&self) -> &Scr {
        &self.session.scr
    }

    pub fn base_clock(&self) -> u32 {
        self.session.base_clock
    }

    pub fn card_removed(&self) -> bool {
        self.session.card_removal
    }

    /// Outcome, interrupt bits and response of the most recent command.
    pub fn last_command(&self) -> &CommandResult {
        &self.last
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Drop the session so the next transfer runs a full card reset.
    pub fn invalidate(&mut self) {
        self.session.rca = 0;
    }
}

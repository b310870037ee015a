use log::warn;

use crate::{err::SdError, hal::EmmcHal};

use super::{constant::*, EmmcHost};

impl<H: EmmcHal> EmmcHost<H> {
    // Read a 32-bit register
    pub(crate) fn read_reg(&mut self, offset: u32) -> u32 {
        self.hal.read32(offset)
    }

    // Write a 32-bit register
    pub(crate) fn write_reg(&mut self, offset: u32, value: u32) {
        self.hal.write32(offset, value)
    }

    pub(crate) fn delay_us(&mut self, us: u32) {
        self.hal.delay_us(us)
    }

    /// Poll `reg` once per millisecond until `(reg & mask) != 0` equals
    /// `set`. At least one poll is made; at most `max(usec / 1000, 1)`.
    pub fn timeout_wait(&mut self, reg: u32, mask: u32, set: bool, usec: u32) -> Result<(), SdError> {
        let polls = (usec / 1000).max(1);

        for _ in 0..polls {
            self.delay_us(1);
            if ((self.read_reg(reg) & mask) != 0) == set {
                return Ok(());
            }
            self.delay_us(999);
        }

        Err(SdError::Timeout)
    }

    fn reset_line(&mut self, bit: u32) -> Result<(), SdError> {
        let control1 = self.read_reg(EMMC_CONTROL1) | bit;
        self.write_reg(EMMC_CONTROL1, control1);

        self.timeout_wait(EMMC_CONTROL1, bit, false, SD_LINE_RESET_TIMEOUT_US)
            .map_err(|_| SdError::ResetFailed)
    }

    // Reset command line
    pub fn reset_cmd(&mut self) -> Result<(), SdError> {
        self.reset_line(EMMC_RESET_CMD).inspect_err(|_| warn!("CMD line did not reset properly"))
    }

    // Reset data line
    pub fn reset_dat(&mut self) -> Result<(), SdError> {
        self.reset_line(EMMC_RESET_DAT).inspect_err(|_| warn!("DAT line did not reset properly"))
    }

    /// Drop the card's bus power.
    pub fn power_off(&mut self) {
        let control0 = self.read_reg(EMMC_CONTROL0) & !EMMC_CTRL0_POWER;
        self.write_reg(EMMC_CONTROL0, control0);
    }
}

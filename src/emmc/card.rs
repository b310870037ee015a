use log::{debug, info, warn};

use crate::{
    err::{ErrorFlags, SdError},
    hal::EmmcHal,
};

use super::{
    cmd::{self, CommandResult, DataBuffer},
    constant::*,
    scr::Scr,
    CardSession, EmmcHost,
};

/// How one pass through the identification sequence ended.
enum ResetPass {
    Ready,
    /// The 1.8V switch did not take; power was dropped and the card needs
    /// to be brought up again at 3.3V.
    VoltageSwitchFailed,
}

impl<H: EmmcHal> EmmcHost<H> {
    /// Reset the controller and run the card identification sequence
    /// (PLSS 4.2, HCSS 3.6).
    ///
    /// A failed 1.8V switch restarts the sequence once with the 1.8V request
    /// withheld. On error the session is left invalid.
    ///
    /// The host version must already be known, so call
    /// [`initialize`](EmmcHost::initialize) first; otherwise the clock divider
    /// cannot be computed and this returns [`SdError::UnsupportedHost`].
    pub fn card_reset(&mut self) -> Result<(), SdError> {
        self.session.failed_voltage_switch = false;

        let result = match self.reset_pass() {
            Ok(ResetPass::Ready) => Ok(()),
            Ok(ResetPass::VoltageSwitchFailed) => {
                debug!("retrying card reset without 1.8V signalling");
                match self.reset_pass() {
                    Ok(ResetPass::Ready) => Ok(()),
                    Ok(ResetPass::VoltageSwitchFailed) => Err(SdError::VoltageSwitchFailed),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("card reset failed: {}", e);
            self.session.rca = 0;
        }
        result
    }

    fn reset_pass(&mut self) -> Result<ResetPass, SdError> {
        if !self.hal.power_on() {
            warn!("controller did not power on successfully");
            return Err(SdError::NoCard);
        }

        debug!("resetting controller");

        let mut control1 = self.read_reg(EMMC_CONTROL1);
        control1 |= EMMC_RESET_ALL;
        control1 &= !(EMMC_CLK_EN | EMMC_CLK_INTLEN);
        self.write_reg(EMMC_CONTROL1, control1);

        self.timeout_wait(EMMC_CONTROL1, EMMC_RESET_MASK, false, SD_LINE_RESET_TIMEOUT_US)
            .map_err(|_| SdError::ResetFailed)
            .inspect_err(|_| warn!("controller did not reset properly"))?;

        debug!(
            "control0: {:#010x}, control1: {:#010x}, control2: {:#010x}",
            self.read_reg(EMMC_CONTROL0),
            self.read_reg(EMMC_CONTROL1),
            self.read_reg(EMMC_CONTROL2)
        );

        // Check for a valid card
        debug!("checking for an inserted card");
        self.timeout_wait(EMMC_STATUS, EMMC_STATUS_CARD_INSERTED, true, SD_CARD_DETECT_TIMEOUT_US)
            .map_err(|_| SdError::NoCard)
            .inspect_err(|_| warn!("no card inserted"))?;

        debug!("status: {:#010x}", self.read_reg(EMMC_STATUS));

        // Clear control2
        self.write_reg(EMMC_CONTROL2, 0);

        let mut base_clock = self.hal.base_clock_hz();
        if base_clock == 0 {
            warn!("assuming clock rate to be 100MHz");
            base_clock = SD_DEFAULT_BASE_CLOCK;
        }

        // Set clock rate to something slow
        debug!("setting clock rate");
        let mut control1 = self.read_reg(EMMC_CONTROL1);
        control1 |= EMMC_CLK_INTLEN;

        let f_id = super::clock_divider(self.host_version, base_clock, SD_CLOCK_ID)
            .ok_or(SdError::UnsupportedHost)
            .inspect_err(|_| warn!("unable to get a valid clock divider for ID frequency"))?;
        control1 |= f_id;

        control1 &= !EMMC_DATA_TOUNIT_MASK;
        control1 |= EMMC_DATA_TOUNIT_2POW24 << EMMC_DATA_TOUNIT_SHIFT;
        self.write_reg(EMMC_CONTROL1, control1);

        self.timeout_wait(EMMC_CONTROL1, EMMC_CLK_STABLE, true, SD_LINE_RESET_TIMEOUT_US)
            .map_err(|_| SdError::ClockUnstable)
            .inspect_err(|_| warn!("controller's clock did not stabilise within 1 second"))?;

        debug!("control0: {:#010x}, control1: {:#010x}", self.read_reg(EMMC_CONTROL0), self.read_reg(EMMC_CONTROL1));

        // Enable the SD clock
        debug!("enabling SD clock");
        self.delay_us(SD_CLOCK_SETTLE_US);
        let control1 = self.read_reg(EMMC_CONTROL1) | EMMC_CLK_EN;
        self.write_reg(EMMC_CONTROL1, control1);
        self.delay_us(SD_CLOCK_SETTLE_US);

        // Mask off sending interrupts to the ARM, but route everything to the
        // interrupt register
        self.write_reg(EMMC_IRPT_EN, 0);
        self.write_reg(EMMC_INTERRUPT, EMMC_INT_ALL);
        let mut irpt_mask = !Irpt::CARD_INTERRUPT.bits();
        if self.config.card_interrupts {
            irpt_mask |= Irpt::CARD_INTERRUPT.bits();
        }
        self.write_reg(EMMC_IRPT_MASK, irpt_mask);

        debug!("interrupts disabled");
        self.delay_us(SD_CLOCK_SETTLE_US);

        // Fresh session, only the failed 1.8V switch survives
        self.session = CardSession {
            failed_voltage_switch: self.session.failed_voltage_switch,
            base_clock,
            ..CardSession::default()
        };
        self.last = CommandResult::new();
        self.block_size = 0;
        self.blocks_to_transfer = 0;

        // Send CMD0 to the card (reset to idle state)
        self.issue_command(cmd::GO_IDLE_STATE, 0)
            .into_result()
            .inspect_err(|_| warn!("no CMD0 response"))?;

        // Send CMD8 to the card
        // Voltage supplied = 0x1 = 2.7-3.6V (standard)
        // Check pattern = 10101010b (as per PLSS 4.3.13) = 0xAA
        debug!("note a timeout error on the following command (CMD8) is normal and expected if the SD card version is less than 2.0");
        let outcome = self.issue_command(cmd::SEND_IF_COND, SD_IF_COND_PATTERN);
        let v2_later = if outcome.is_bare_timeout() {
            false
        } else if outcome.is_command_timeout() {
            self.reset_cmd()?;
            self.write_reg(EMMC_INTERRUPT, ErrorFlags::CMD_TIMEOUT.bits());
            false
        } else if outcome.is_failure() {
            warn!("failure sending CMD8 ({:#010x})", self.last.interrupt);
            return Err(SdError::from(outcome.error_flags()));
        } else {
            if self.last.r0() & SD_IF_COND_MASK != SD_IF_COND_PATTERN {
                warn!("unusable card");
                debug!("CMD8 response {:#010x}", self.last.r0());
                return Err(SdError::UnsupportedCard);
            }
            true
        };

        // Here we are supposed to check the response to CMD5 (HCSS 3.6)
        // It only returns if the card is a SDIO card
        debug!("note that a timeout error on the following command (CMD5) is normal and expected if the card is not a SDIO card");
        let outcome = self.issue_command_timeout(cmd::IO_SET_OP_COND, 0, SD_SDIO_PROBE_TIMEOUT_US);
        if !outcome.is_bare_timeout() {
            if outcome.is_command_timeout() {
                self.reset_cmd()?;
                self.write_reg(EMMC_INTERRUPT, ErrorFlags::CMD_TIMEOUT.bits());
            } else {
                warn!("SDIO card detected - not currently supported");
                debug!("CMD5 returned {:#010x}", self.last.r0());
                return Err(SdError::UnsupportedCard);
            }
        }

        // Call an inquiry ACMD41 (voltage window = 0) to get the OCR
        debug!("sending inquiry ACMD41");
        self.issue_command(cmd::SD_SEND_OP_COND, 0)
            .into_result()
            .inspect_err(|_| warn!("inquiry ACMD41 failed"))?;
        debug!("inquiry ACMD41 returned {:#010x}", self.last.r0());

        // Call initialization ACMD41
        let mut op_cond = SD_OCR_VOLTAGE_WINDOW;
        if v2_later {
            op_cond |= SD_OCR_HCS;
            if self.config.signal_1v8 && !self.session.failed_voltage_switch {
                op_cond |= SD_OCR_S18;
            }
            if self.config.sdxc_max_performance {
                op_cond |= SD_OCR_XPC;
            }
        }

        loop {
            self.issue_command(cmd::SD_SEND_OP_COND, op_cond)
                .into_result()
                .inspect_err(|e| warn!("error issuing ACMD41: {}", e))?;

            let r0 = self.last.r0();
            if r0 & SD_OCR_BUSY != 0 {
                self.session.ocr = (r0 >> 8) & 0xffff;
                self.session.supports_sdhc = r0 & SD_OCR_HCS != 0;
                if self.config.signal_1v8 && !self.session.failed_voltage_switch {
                    self.session.supports_1_8v = r0 & SD_OCR_S18 != 0;
                }
                break;
            }

            debug!("card is busy, retrying");
            self.delay_us(SD_OP_COND_RETRY_US);
        }

        debug!(
            "card identified: OCR: {:04x}, 1.8v support: {}, SDHC support: {}",
            self.session.ocr, self.session.supports_1_8v, self.session.supports_sdhc
        );

        // The card is an SD card now, so it supports SDR12 at 25 MHz
        let _ = self.switch_clock_rate(base_clock, SD_CLOCK_NORMAL);

        // A small wait before the voltage switch
        self.delay_us(5000);

        if self.session.supports_1_8v && !self.voltage_switch() {
            self.session.failed_voltage_switch = true;
            self.power_off();
            return Ok(ResetPass::VoltageSwitchFailed);
        }

        // Send CMD2 to get the cards CID
        self.issue_command(cmd::ALL_SEND_CID, 0)
            .into_result()
            .inspect_err(|_| warn!("error sending ALL_SEND_CID"))?;
        self.session.card_id = self.last.response;
        let cid = self.session.card_id;
        debug!("card CID: {:08x}{:08x}{:08x}{:08x}", cid[3], cid[2], cid[1], cid[0]);

        // Send CMD3 to enter the data state
        self.issue_command(cmd::SEND_RELATIVE_ADDR, 0)
            .into_result()
            .inspect_err(|_| warn!("error sending SEND_RELATIVE_ADDR"))?;

        let cmd3_resp = self.last.r0();
        debug!("CMD3 response: {:#010x}", cmd3_resp);

        self.session.rca = (cmd3_resp >> SD_R6_RCA_SHIFT) & 0xffff;
        if cmd3_resp & SD_R6_CRC_ERROR != 0 {
            return Err(SdError::CardError(cmd3_resp, "CRC error"));
        }
        if cmd3_resp & SD_R6_ILLEGAL_CMD != 0 {
            return Err(SdError::CardError(cmd3_resp, "illegal command"));
        }
        if cmd3_resp & SD_R6_ERROR != 0 {
            return Err(SdError::CardError(cmd3_resp, "generic error"));
        }
        if cmd3_resp & SD_R6_READY == 0 {
            return Err(SdError::CardError(cmd3_resp, "not ready for data"));
        }

        debug!("RCA: {:04x}", self.session.rca);

        // Now select the card (toggles it to transfer state)
        self.issue_command(cmd::SELECT_CARD, self.session.rca << SD_R6_RCA_SHIFT)
            .into_result()
            .inspect_err(|_| warn!("error sending CMD7"))?;

        let status = (self.last.r0() >> SD_STATUS_STATE_SHIFT) & SD_STATUS_STATE_MASK;
        if status != SD_STATE_STBY && status != SD_STATE_TRAN {
            warn!("invalid status ({})", status);
            return Err(SdError::InvalidResponse);
        }

        // If not an SDHC card, ensure BLOCKLEN is 512 bytes
        if !self.session.supports_sdhc {
            self.issue_command(cmd::SET_BLOCKLEN, SD_BLOCK_SIZE)
                .into_result()
                .inspect_err(|_| warn!("error sending SET_BLOCKLEN"))?;
        }
        let blksizecnt = (self.read_reg(EMMC_BLKSIZECNT) & !EMMC_BLKSIZE_MASK) | SD_BLOCK_SIZE;
        self.write_reg(EMMC_BLKSIZECNT, blksizecnt);

        // Get the cards SCR register
        let mut scr = [0u8; 8];
        self.block_size = 8;
        self.blocks_to_transfer = 1;
        let outcome = self.issue_data_command(
            cmd::SEND_SCR,
            0,
            SD_DEFAULT_TIMEOUT_US,
            &mut DataBuffer::Read(&mut scr),
        );
        self.block_size = SD_BLOCK_SIZE;
        outcome.into_result().inspect_err(|_| warn!("error sending SEND_SCR"))?;

        self.session.scr = Scr::parse(&scr);
        let parsed = self.session.scr;
        debug!(
            "SCR: {:08x}{:08x}, version {}, bus_widths {:01x}",
            u32::from_be_bytes([scr[0], scr[1], scr[2], scr[3]]),
            u32::from_be_bytes([scr[4], scr[5], scr[6], scr[7]]),
            parsed.version,
            parsed.bus_widths
        );

        if self.config.bus_4bit && parsed.supports_4bit() {
            self.switch_bus_width_4();
        }

        info!("Found a valid version {} SD card", parsed.version);

        // Reset interrupt register
        self.write_reg(EMMC_INTERRUPT, EMMC_INT_ALL);

        Ok(ResetPass::Ready)
    }

    // HCSS 3.4
    fn switch_bus_width_4(&mut self) {
        debug!("switching to 4-bit data mode");

        // Disable card interrupt in host
        let old_irpt_mask = self.read_reg(EMMC_IRPT_MASK);
        self.write_reg(EMMC_IRPT_MASK, old_irpt_mask & !Irpt::CARD_INTERRUPT.bits());

        if self.issue_command(cmd::SET_BUS_WIDTH, SD_BUS_WIDTH_4).is_failure() {
            warn!("switch to 4-bit data mode failed");
            return;
        }

        let control0 = self.read_reg(EMMC_CONTROL0) | EMMC_CTRL0_4BITBUS;
        self.write_reg(EMMC_CONTROL0, control0);

        // Re-enable card interrupt in host
        self.write_reg(EMMC_IRPT_MASK, old_irpt_mask);

        debug!("switch to 4-bit complete");
    }

    // HCSS 3.6.1
    fn voltage_switch(&mut self) -> bool {
        debug!("switching to 1.8V mode");

        if self.issue_command(cmd::VOLTAGE_SWITCH, 0).is_failure() {
            debug!("error issuing VOLTAGE_SWITCH");
            return false;
        }

        // Disable SD clock
        let control1 = self.read_reg(EMMC_CONTROL1) & !EMMC_CLK_EN;
        self.write_reg(EMMC_CONTROL1, control1);

        let dat30 = self.dat_lines();
        if dat30 != 0 {
            debug!("DAT[3:0] did not settle to 0");
            return false;
        }

        // Set 1.8V signal enable to 1
        let control0 = self.read_reg(EMMC_CONTROL0) | EMMC_CTRL0_POWER;
        self.write_reg(EMMC_CONTROL0, control0);

        self.delay_us(5000);

        if self.read_reg(EMMC_CONTROL0) & EMMC_CTRL0_POWER == 0 {
            debug!("controller did not keep 1.8V signal enable high");
            return false;
        }

        // Re-enable the SD clock
        let control1 = self.read_reg(EMMC_CONTROL1) | EMMC_CLK_EN;
        self.write_reg(EMMC_CONTROL1, control1);

        self.delay_us(10000);

        let dat30 = self.dat_lines();
        if dat30 != EMMC_STATUS_DAT_MASK {
            debug!("DAT[3:0] did not settle to 1111b ({:01x})", dat30);
            return false;
        }

        debug!("voltage switch complete");
        true
    }

    fn dat_lines(&mut self) -> u32 {
        (self.read_reg(EMMC_STATUS) >> EMMC_STATUS_DAT_SHIFT) & EMMC_STATUS_DAT_MASK
    }

    fn card_state(&mut self) -> Result<u32, SdError> {
        let outcome = self.issue_command(cmd::SEND_STATUS, self.session.rca << SD_R6_RCA_SHIFT);
        if let Err(e) = outcome.into_result() {
            warn!("no response from CMD13");
            self.session.rca = 0;
            return Err(e);
        }
        Ok((self.last.r0() >> SD_STATUS_STATE_SHIFT) & SD_STATUS_STATE_MASK)
    }

    /// Bring the card into the transfer state before a data command.
    pub fn ensure_data_mode(&mut self) -> Result<(), SdError> {
        if self.session.rca == 0 {
            // Try again to initialise the card
            self.card_reset()?;
        }

        debug!("obtaining status register for card_rca {:#x}", self.session.rca);
        let cur_state = self.card_state()?;
        debug!("status {}", cur_state);

        match cur_state {
            SD_STATE_STBY => {
                // Currently in the stand-by state - select it
                if let Err(e) = self.issue_command(cmd::SELECT_CARD, self.session.rca << SD_R6_RCA_SHIFT).into_result() {
                    warn!("no response from CMD7");
                    self.session.rca = 0;
                    return Err(e);
                }
            }
            SD_STATE_DATA => {
                // In the data transfer state - cancel the transmission
                if let Err(e) = self.issue_command(cmd::STOP_TRANSMISSION, 0).into_result() {
                    warn!("no response from CMD12");
                    self.session.rca = 0;
                    return Err(e);
                }

                // Reset the data circuit
                let _ = self.reset_dat();
            }
            SD_STATE_TRAN => return Ok(()),
            // Not in the transfer state - re-initialise
            _ => self.card_reset()?,
        }

        // Check again that we're now in the correct mode
        debug!("rechecking status");
        let cur_state = self.card_state()?;
        if cur_state != SD_STATE_TRAN {
            warn!("unable to initialise SD card to data mode (state {})", cur_state);
            self.session.rca = 0;
            return Err(SdError::InvalidResponse);
        }

        Ok(())
    }
}

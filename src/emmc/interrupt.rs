use log::debug;

use crate::hal::EmmcHal;

use super::{
    cmd,
    constant::*,
    EmmcHost,
};

impl<H: EmmcHal> EmmcHost<H> {
    /// Drain interrupt bits left over from earlier activity.
    ///
    /// Everything seen is cleared with a single write; nothing is written
    /// when the register reads 0.
    pub fn handle_interrupts(&mut self) {
        let irpts = Irpt::from_bits_retain(self.read_reg(EMMC_INTERRUPT));
        let mut reset_mask = 0;

        if irpts.contains(Irpt::CMD_DONE) {
            debug!("spurious command complete interrupt");
            reset_mask |= Irpt::CMD_DONE.bits();
        }

        if irpts.contains(Irpt::DATA_DONE) {
            debug!("spurious transfer complete interrupt");
            reset_mask |= Irpt::DATA_DONE.bits();
        }

        if irpts.contains(Irpt::BLOCK_GAP) {
            debug!("spurious block gap event interrupt");
            reset_mask |= Irpt::BLOCK_GAP.bits();
        }

        if irpts.contains(Irpt::DMA) {
            debug!("spurious DMA interrupt");
            reset_mask |= Irpt::DMA.bits();
        }

        if irpts.contains(Irpt::WRITE_RDY) {
            debug!("spurious buffer write ready interrupt");
            reset_mask |= Irpt::WRITE_RDY.bits();
            let _ = self.reset_dat();
        }

        if irpts.contains(Irpt::READ_RDY) {
            debug!("spurious buffer read ready interrupt");
            reset_mask |= Irpt::READ_RDY.bits();
            let _ = self.reset_dat();
        }

        if irpts.contains(Irpt::CARD_INSERTION) {
            debug!("card insertion detected");
            reset_mask |= Irpt::CARD_INSERTION.bits();
        }

        if irpts.contains(Irpt::CARD_REMOVAL) {
            debug!("card removal detected");
            reset_mask |= Irpt::CARD_REMOVAL.bits();
            self.session.card_removal = true;
        }

        if irpts.contains(Irpt::CARD_INTERRUPT) {
            debug!("card interrupt detected");
            self.handle_card_interrupt();
            reset_mask |= Irpt::CARD_INTERRUPT.bits();
        }

        if irpts.contains(Irpt::ERR) {
            debug!("spurious error interrupt: {:#010x}", irpts.bits());
            reset_mask |= EMMC_INT_ERROR_MASK;
        }

        if reset_mask != 0 {
            self.write_reg(EMMC_INTERRUPT, reset_mask);
        }
    }

    /// Poll the card status in response to a card interrupt.
    pub fn handle_card_interrupt(&mut self) {
        let Some(desc) = cmd::SEND_STATUS.descriptor() else {
            return;
        };

        if self.session.rca == 0 {
            debug!("no card currently selected");
            return;
        }

        self.last.command = Some(cmd::SEND_STATUS);
        self.issue_command_int(desc, self.session.rca << SD_R6_RCA_SHIFT, SD_DEFAULT_TIMEOUT_US, None);
        if self.last.outcome.is_failure() {
            debug!("unable to get card status");
        } else {
            debug!("card status: {:#010x}", self.last.r0());
        }
    }
}

use core::fmt;

use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    err::{ErrorFlags, Outcome, SdError},
    hal::EmmcHal,
};

use super::{constant::*, EmmcHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseKind {
    None = 0,
    R136 = 1,
    R48 = 2,
    R48Busy = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandType {
    Normal = 0,
    Suspend = 1,
    Resume = 2,
    Abort = 3,
}

bitflags! {
    /// Single-bit fields of the CMDTM register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u32 {
        const DMA = 1 << 0;
        const BLKCNT_EN = 1 << 1;
        const AUTO_CMD12 = 1 << 2;
        const AUTO_CMD23 = 2 << 2;
        const DAT_DIR_CH = 1 << 4;
        const MULTI_BLOCK = 1 << 5;
        const CRCCHK_EN = 1 << 19;
        const IXCHK_EN = 1 << 20;
        const ISDATA = 1 << 21;
    }
}

const CMD_RSPNS_TYPE_SHIFT: u32 = 16;
const CMD_TYPE_SHIFT: u32 = 22;
const CMD_INDEX_SHIFT: u32 = 24;

/// Response classes of PLSS 4.9 and how the host has to expect them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resp {
    None,
    R1,
    R1b,
    R2,
    R3,
    R4,
    R5,
    R5b,
    R6,
    R7,
}

/// Encoded command descriptor, i.e. the CMDTM value issued for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdDescriptor {
    index: u8,
    response: ResponseKind,
    kind: CommandType,
    flags: CmdFlags,
}

impl CmdDescriptor {
    const fn new(index: u8) -> Self {
        Self {
            index,
            response: ResponseKind::None,
            kind: CommandType::Normal,
            flags: CmdFlags::empty(),
        }
    }

    const fn rsp(mut self, resp: Resp) -> Self {
        let (response, crc) = match resp {
            Resp::None => (ResponseKind::None, false),
            Resp::R1 | Resp::R5 | Resp::R6 | Resp::R7 => (ResponseKind::R48, true),
            Resp::R1b | Resp::R5b => (ResponseKind::R48Busy, true),
            Resp::R2 => (ResponseKind::R136, true),
            Resp::R3 => (ResponseKind::R48, false),
            Resp::R4 => (ResponseKind::R136, false),
        };
        self.response = response;
        if crc {
            self.flags = self.flags.union(CmdFlags::CRCCHK_EN);
        }
        self
    }

    const fn data(mut self) -> Self {
        self.flags = self.flags.union(CmdFlags::ISDATA);
        self
    }

    const fn read(self) -> Self {
        let mut cmd = self.data();
        cmd.flags = cmd.flags.union(CmdFlags::DAT_DIR_CH);
        cmd
    }

    const fn write(self) -> Self {
        self.data()
    }

    const fn multi(mut self) -> Self {
        self.flags = self
            .flags
            .union(CmdFlags::MULTI_BLOCK)
            .union(CmdFlags::BLKCNT_EN)
            .union(CmdFlags::AUTO_CMD12);
        self
    }

    const fn abort(mut self) -> Self {
        self.kind = CommandType::Abort;
        self
    }

    pub const fn index(&self) -> u8 {
        self.index
    }

    pub const fn response(&self) -> ResponseKind {
        self.response
    }

    pub const fn kind(&self) -> CommandType {
        self.kind
    }

    pub const fn flags(&self) -> CmdFlags {
        self.flags
    }

    pub const fn is_data(&self) -> bool {
        self.flags.contains(CmdFlags::ISDATA)
    }

    /// Data flows card to host.
    pub const fn is_read(&self) -> bool {
        self.flags.contains(CmdFlags::DAT_DIR_CH)
    }

    pub const fn bits(&self) -> u32 {
        ((self.index as u32) << CMD_INDEX_SHIFT)
            | ((self.kind as u32) << CMD_TYPE_SHIFT)
            | ((self.response as u32) << CMD_RSPNS_TYPE_SHIFT)
            | self.flags.bits()
    }
}

const fn cmd(index: u8) -> CmdDescriptor {
    CmdDescriptor::new(index)
}

const fn build_sd_commands() -> [Option<CmdDescriptor>; 64] {
    let mut t = [None; 64];
    t[0] = Some(cmd(0));
    t[2] = Some(cmd(2).rsp(Resp::R2));
    t[3] = Some(cmd(3).rsp(Resp::R6));
    t[4] = Some(cmd(4));
    t[5] = Some(cmd(5).rsp(Resp::R4));
    t[6] = Some(cmd(6).rsp(Resp::R1));
    t[7] = Some(cmd(7).rsp(Resp::R1b));
    t[8] = Some(cmd(8).rsp(Resp::R7));
    t[9] = Some(cmd(9).rsp(Resp::R2));
    t[10] = Some(cmd(10).rsp(Resp::R2));
    t[11] = Some(cmd(11).rsp(Resp::R1));
    t[12] = Some(cmd(12).rsp(Resp::R1b).abort());
    t[13] = Some(cmd(13).rsp(Resp::R1));
    t[15] = Some(cmd(15));
    t[16] = Some(cmd(16).rsp(Resp::R1));
    t[17] = Some(cmd(17).rsp(Resp::R1).read());
    t[18] = Some(cmd(18).rsp(Resp::R1).read().multi());
    t[19] = Some(cmd(19).rsp(Resp::R1).read());
    t[20] = Some(cmd(20).rsp(Resp::R1b));
    t[23] = Some(cmd(23).rsp(Resp::R1));
    t[24] = Some(cmd(24).rsp(Resp::R1).write());
    t[25] = Some(cmd(25).rsp(Resp::R1).write().multi());
    t[27] = Some(cmd(27).rsp(Resp::R1).write());
    t[28] = Some(cmd(28).rsp(Resp::R1b));
    t[29] = Some(cmd(29).rsp(Resp::R1b));
    t[30] = Some(cmd(30).rsp(Resp::R1).read());
    t[32] = Some(cmd(32).rsp(Resp::R1));
    t[33] = Some(cmd(33).rsp(Resp::R1));
    t[38] = Some(cmd(38).rsp(Resp::R1b));
    t[55] = Some(cmd(55).rsp(Resp::R1));
    t[56] = Some(cmd(56).rsp(Resp::R1).data());
    t
}

const fn build_sd_acommands() -> [Option<CmdDescriptor>; 64] {
    let mut t = [None; 64];
    t[6] = Some(cmd(6).rsp(Resp::R1));
    t[13] = Some(cmd(13).rsp(Resp::R1));
    t[22] = Some(cmd(22).rsp(Resp::R1).read());
    t[23] = Some(cmd(23).rsp(Resp::R1));
    t[41] = Some(cmd(41).rsp(Resp::R3));
    t[42] = Some(cmd(42).rsp(Resp::R1));
    t[51] = Some(cmd(51).rsp(Resp::R1).read());
    t
}

/// Standard commands; `None` marks reserved / unimplemented indices.
pub static SD_COMMANDS: [Option<CmdDescriptor>; 64] = build_sd_commands();
/// Application commands (sent after `APP_CMD`).
pub static SD_ACOMMANDS: [Option<CmdDescriptor>; 64] = build_sd_acommands();

/// Command identifier: a standard command or an application command index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Cmd(u8),
    Acmd(u8),
}

impl Command {
    pub fn descriptor(self) -> Option<CmdDescriptor> {
        let (table, index) = match self {
            Command::Cmd(index) => (&SD_COMMANDS, index),
            Command::Acmd(index) => (&SD_ACOMMANDS, index),
        };
        table.get(index as usize).copied().flatten()
    }

    pub fn is_app(self) -> bool {
        matches!(self, Command::Acmd(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Cmd(index) => write!(f, "CMD{}", index),
            Command::Acmd(index) => write!(f, "ACMD{}", index),
        }
    }
}

// SD command indices
pub const GO_IDLE_STATE: Command = Command::Cmd(0);
pub const ALL_SEND_CID: Command = Command::Cmd(2);
pub const SEND_RELATIVE_ADDR: Command = Command::Cmd(3);
pub const SET_DSR: Command = Command::Cmd(4);
pub const IO_SET_OP_COND: Command = Command::Cmd(5);
pub const SWITCH_FUNC: Command = Command::Cmd(6);
pub const SELECT_CARD: Command = Command::Cmd(7);
pub const SEND_IF_COND: Command = Command::Cmd(8);
pub const SEND_CSD: Command = Command::Cmd(9);
pub const SEND_CID: Command = Command::Cmd(10);
pub const VOLTAGE_SWITCH: Command = Command::Cmd(11);
pub const STOP_TRANSMISSION: Command = Command::Cmd(12);
pub const SEND_STATUS: Command = Command::Cmd(13);
pub const GO_INACTIVE_STATE: Command = Command::Cmd(15);
pub const SET_BLOCKLEN: Command = Command::Cmd(16);
pub const READ_SINGLE_BLOCK: Command = Command::Cmd(17);
pub const READ_MULTIPLE_BLOCK: Command = Command::Cmd(18);
pub const SEND_TUNING_BLOCK: Command = Command::Cmd(19);
pub const SPEED_CLASS_CONTROL: Command = Command::Cmd(20);
pub const SET_BLOCK_COUNT: Command = Command::Cmd(23);
pub const WRITE_BLOCK: Command = Command::Cmd(24);
pub const WRITE_MULTIPLE_BLOCK: Command = Command::Cmd(25);
pub const PROGRAM_CSD: Command = Command::Cmd(27);
pub const SET_WRITE_PROT: Command = Command::Cmd(28);
pub const CLR_WRITE_PROT: Command = Command::Cmd(29);
pub const SEND_WRITE_PROT: Command = Command::Cmd(30);
pub const ERASE_WR_BLK_START: Command = Command::Cmd(32);
pub const ERASE_WR_BLK_END: Command = Command::Cmd(33);
pub const ERASE: Command = Command::Cmd(38);
pub const APP_CMD: Command = Command::Cmd(55);
pub const GEN_CMD: Command = Command::Cmd(56);

// SD application commands
pub const SET_BUS_WIDTH: Command = Command::Acmd(6);
pub const SD_STATUS: Command = Command::Acmd(13);
pub const SEND_NUM_WR_BLOCKS: Command = Command::Acmd(22);
pub const SET_WR_BLK_ERASE_COUNT: Command = Command::Acmd(23);
pub const SD_SEND_OP_COND: Command = Command::Acmd(41);
pub const SET_CLR_CARD_DETECT: Command = Command::Acmd(42);
pub const SEND_SCR: Command = Command::Acmd(51);

/// Record of the most recent command issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub command: Option<Command>,
    pub cmd_reg: u32,
    pub outcome: Outcome,
    /// Raw interrupt register value when the command failed.
    pub interrupt: u32,
    pub response: [u32; 4],
}

impl CommandResult {
    pub const fn new() -> Self {
        Self {
            command: None,
            cmd_reg: 0,
            outcome: Outcome::Failure(ErrorFlags::empty()),
            interrupt: 0,
            response: [0; 4],
        }
    }

    pub fn r0(&self) -> u32 {
        self.response[0]
    }
}

impl Default for CommandResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller buffer for the data phase of a command.
pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl DataBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_write(&self) -> bool {
        matches!(self, DataBuffer::Write(_))
    }
}

impl<H: EmmcHal> EmmcHost<H> {
    /// Issue `command` with the default timeout.
    pub fn issue_command(&mut self, command: Command, argument: u32) -> Outcome {
        self.issue(command, argument, SD_DEFAULT_TIMEOUT_US, None)
    }

    pub fn issue_command_timeout(&mut self, command: Command, argument: u32, timeout: u32) -> Outcome {
        self.issue(command, argument, timeout, None)
    }

    /// Issue a data command; `block_size`/`blocks_to_transfer` must already describe `buf`.
    pub(crate) fn issue_data_command(
        &mut self,
        command: Command,
        argument: u32,
        timeout: u32,
        buf: &mut DataBuffer<'_>,
    ) -> Outcome {
        self.issue(command, argument, timeout, Some(buf))
    }

    fn issue(
        &mut self,
        command: Command,
        argument: u32,
        timeout: u32,
        data: Option<&mut DataBuffer<'_>>,
    ) -> Outcome {
        let (Some(desc), Some(app_desc)) = (command.descriptor(), APP_CMD.descriptor()) else {
            warn!("Invalid command {}", command);
            self.last.command = Some(command);
            self.last.outcome = Outcome::Failure(ErrorFlags::empty());
            return self.last.outcome;
        };

        // First, handle any pending interrupts
        self.handle_interrupts();

        if self.session.card_removal {
            self.last.command = Some(command);
            self.last.outcome = Outcome::Failure(ErrorFlags::empty());
            return self.last.outcome;
        }

        if command.is_app() {
            debug!("Issuing command {}", command);
            self.last.command = Some(APP_CMD);
            let rca = self.session.rca << SD_R6_RCA_SHIFT;
            self.issue_command_int(app_desc, rca, timeout, None);
            if self.last.outcome.is_failure() {
                self.log_failure();
                return self.last.outcome;
            }
        } else {
            debug!("Issuing command {}", command);
        }

        self.last.command = Some(command);
        self.issue_command_int(desc, argument, timeout, data);

        if self.last.outcome.is_failure() {
            self.log_failure();
        }
        self.last.outcome
    }

    fn log_failure(&self) {
        if let (Some(command), Outcome::Failure(flags)) = (self.last.command, self.last.outcome) {
            debug!(
                "Error issuing {} (intr {:#010x}): {}",
                command,
                self.last.interrupt,
                SdError::from(flags)
            );
        }
    }

    fn record_error(&mut self, irpts: u32) {
        self.last.outcome = Outcome::Failure(ErrorFlags::from_interrupt(irpts));
        self.last.interrupt = irpts;
    }

    /// Run one command through the controller (HCSS 3.7.1.1 / 3.7.2.2).
    /// The result is left in `self.last`.
    pub(crate) fn issue_command_int(
        &mut self,
        desc: CmdDescriptor,
        argument: u32,
        timeout: u32,
        data: Option<&mut DataBuffer<'_>>,
    ) {
        let cmd_reg = desc.bits();
        self.last.cmd_reg = cmd_reg;
        self.last.outcome = Outcome::Failure(ErrorFlags::empty());

        if self.config.poll_status_reg {
            // Check command inhibit
            if self.timeout_wait(EMMC_STATUS, EMMC_STATUS_CMD_INHIBIT, false, timeout).is_err() {
                warn!("CMD line stayed busy");
                return;
            }

            if desc.response() == ResponseKind::R48Busy
                && desc.kind() != CommandType::Abort
                && self.timeout_wait(EMMC_STATUS, EMMC_STATUS_DAT_INHIBIT, false, timeout).is_err()
            {
                warn!("DAT line stayed busy");
                return;
            }
        }

        if self.blocks_to_transfer > 0xffff {
            warn!("blocks_to_transfer too great ({})", self.blocks_to_transfer);
            return;
        }
        let blksizecnt = self.block_size | (self.blocks_to_transfer << 16);
        self.write_reg(EMMC_BLKSIZECNT, blksizecnt);

        self.write_reg(EMMC_ARG1, argument);

        // Writing CMDTM starts the command
        self.write_reg(EMMC_CMDTM, cmd_reg);

        // Wait for command complete interrupt
        let done = Irpt::CMD_DONE.bits();
        let _ = self.timeout_wait(EMMC_INTERRUPT, Irpt::ERR.bits() | done, true, timeout);
        let irpts = self.read_reg(EMMC_INTERRUPT);
        self.write_reg(EMMC_INTERRUPT, EMMC_INT_ERROR_MASK | done);

        if irpts & (EMMC_INT_ERROR_MASK | done) != done {
            debug!("Error occured whilst waiting for command complete interrupt");
            self.record_error(irpts);
            return;
        }

        match desc.response() {
            ResponseKind::R48 | ResponseKind::R48Busy => {
                self.last.response[0] = self.read_reg(EMMC_RESP0);
            }
            ResponseKind::R136 => {
                self.last.response[0] = self.read_reg(EMMC_RESP0);
                self.last.response[1] = self.read_reg(EMMC_RESP1);
                self.last.response[2] = self.read_reg(EMMC_RESP2);
                self.last.response[3] = self.read_reg(EMMC_RESP3);
            }
            ResponseKind::None => {}
        }

        if desc.is_data() {
            let Some(buf) = data else {
                warn!("CMD{} needs a data buffer", desc.index());
                return;
            };
            if buf.is_write() == desc.is_read() {
                warn!("CMD{} data direction does not match buffer", desc.index());
                return;
            }

            let ready = if desc.is_read() { Irpt::READ_RDY } else { Irpt::WRITE_RDY }.bits();
            if self.blocks_to_transfer > 1 {
                debug!("Multi block transfer");
            }

            let _ = self.timeout_wait(EMMC_INTERRUPT, ready | Irpt::ERR.bits(), true, timeout);
            let irpts = self.read_reg(EMMC_INTERRUPT);
            self.write_reg(EMMC_INTERRUPT, EMMC_INT_ERROR_MASK | ready);

            if irpts & (EMMC_INT_ERROR_MASK | ready) != ready {
                debug!("Error occured whilst waiting for data ready interrupt");
                self.record_error(irpts);
                return;
            }

            debug_assert!(self.block_size <= EMMC_FIFO_SIZE);
            let length = (self.block_size * self.blocks_to_transfer) as usize;
            if length & 3 != 0 || length > buf.len() {
                warn!("transfer of {} bytes does not fit a {} byte buffer", length, buf.len());
                return;
            }

            match buf {
                DataBuffer::Read(buf) => {
                    for word in buf[..length].chunks_exact_mut(4) {
                        word.copy_from_slice(&self.read_reg(EMMC_DATA).to_ne_bytes());
                    }
                }
                DataBuffer::Write(buf) => {
                    for word in buf[..length].chunks_exact(4) {
                        self.write_reg(EMMC_DATA, u32::from_ne_bytes([word[0], word[1], word[2], word[3]]));
                    }
                }
            }

            debug!("Block transfer complete");
        }

        // Wait for transfer complete (set for data transfers and busy responses)
        if desc.response() == ResponseKind::R48Busy || desc.is_data() {
            let done = Irpt::DATA_DONE.bits();
            if self.config.poll_status_reg
                && self.read_reg(EMMC_STATUS) & EMMC_STATUS_DAT_INHIBIT == 0
            {
                self.write_reg(EMMC_INTERRUPT, EMMC_INT_ERROR_MASK | done);
            } else {
                let _ = self.timeout_wait(EMMC_INTERRUPT, Irpt::ERR.bits() | done, true, timeout);
                let irpts = self.read_reg(EMMC_INTERRUPT);
                self.write_reg(EMMC_INTERRUPT, EMMC_INT_ERROR_MASK | done);

                let seen = irpts & (EMMC_INT_ERROR_MASK | done);
                if seen != done && seen != EMMC_INT_DATA_DONE_WITH_TIMEOUT {
                    debug!("Error occured whilst waiting for transfer complete interrupt");
                    self.record_error(irpts);
                    return;
                }

                self.write_reg(EMMC_INTERRUPT, EMMC_INT_ERROR_MASK | done);
            }
        }

        self.last.outcome = Outcome::Success;
    }
}

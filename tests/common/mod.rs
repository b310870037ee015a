//! Simulated BCM2835 EMMC controller with one SD card behind it.

#![allow(dead_code)]

use std::{cell::Cell, collections::VecDeque};

use sd_emmc::{
    EmmcConfig, EmmcHal, EmmcHost,
    emmc::{cmd::Command, constant::*},
};

pub const RCA: u32 = 0x1234;
pub const CID: [u32; 4] = [0x1122_3344, 0x5566_7788, 0x99aa_bbcc, 0xddee_ff00];

/// SD 2.00, 1-bit bus only.
pub const SCR_SD2_1BIT: [u8; 8] = [0x02, 0x31, 0x00, 0x00, 0, 0, 0, 0];
/// SD 3.0x, 1-bit and 4-bit bus.
pub const SCR_SD3_4BIT: [u8; 8] = [0x02, 0x35, 0x80, 0x00, 0, 0, 0, 0];

const CMD_TIMEOUT: u32 = 1 << 16;
const READY_FOR_DATA: u32 = 1 << 8;
const APP_CMD_STATUS: u32 = 1 << 5;

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 512) as u8).collect()
}

pub struct SimCard {
    pub v2: bool,
    pub sdhc: bool,
    pub s18: bool,
    pub sdio: bool,
    /// ACMD41 replies with busy set this many times after each CMD0.
    pub busy_polls: u32,
    pub scr: [u8; 8],
    pub state: u32,
    pub bus_width: u32,
    pub block_len: u32,
    pub storage: Vec<u8>,
    pub app_cmd: bool,
    pub busy_left: u32,
    /// Replaces the echoed check pattern in the CMD8 response.
    pub if_cond_echo: Option<u32>,
    /// Replaces the status half (bits 0..=15) of the CMD3 response.
    pub r6_status: Option<u32>,
    /// CMD7 leaves the card in standby.
    pub ignores_select: bool,
}

impl SimCard {
    /// SD 2.0 standard capacity card, 1-bit bus.
    pub fn sdsc() -> Self {
        Self {
            v2: true,
            sdhc: false,
            s18: false,
            sdio: false,
            busy_polls: 1,
            scr: SCR_SD2_1BIT,
            state: SD_STATE_IDLE,
            bus_width: 0,
            block_len: 512,
            storage: pattern(64 * 512),
            app_cmd: false,
            busy_left: 0,
            if_cond_echo: None,
            r6_status: None,
            ignores_select: false,
        }
    }

    /// SDHC card with 4-bit bus support.
    pub fn sdhc() -> Self {
        Self { sdhc: true, scr: SCR_SD3_4BIT, ..Self::sdsc() }
    }

    fn status(&self) -> u32 {
        let mut status = (self.state << SD_STATUS_STATE_SHIFT) | READY_FOR_DATA;
        if self.app_cmd {
            status |= APP_CMD_STATUS;
        }
        status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issued {
    pub command: Command,
    pub arg: u32,
    pub blksizecnt: u32,
}

struct Failure {
    command: Command,
    remaining: u32,
    bits: u32,
}

pub struct Sim {
    regs: [u32; 64],
    interrupt: u32,
    pub card: SimCard,
    pub card_present: bool,
    pub slotisr_ver: u32,
    pub base_clock: u32,
    pub power_ok: bool,
    pub power_on_calls: u32,
    /// Forces the DAT[3:0] level reported in STATUS.
    pub dat_override: Option<u32>,
    /// STATUS reports CMD inhibit for this many more reads.
    pub cmd_inhibit_reads: u32,
    /// STATUS reports DAT inhibit for this many more reads.
    pub dat_inhibit_reads: u32,
    /// Latched once a read or write transfer has moved all of its data.
    pub transfer_done: u32,
    pub now_us: u64,
    /// Register reads plus writes.
    pub accesses: usize,
    pub writes: Vec<(u32, u32)>,
    pub commands: Vec<Issued>,
    pub barriers: Cell<u32>,
    failures: Vec<Failure>,
    fifo_in: VecDeque<u32>,
    /// Bits to latch when the read FIFO runs empty.
    pending_read: Option<u32>,
    pending_write: Option<(usize, usize)>,
    written: Vec<u8>,
}

impl Sim {
    pub fn new(card: SimCard) -> Self {
        Self {
            regs: [0; 64],
            interrupt: 0,
            card,
            card_present: true,
            slotisr_ver: 0x9902_0000,
            base_clock: 0,
            power_ok: true,
            power_on_calls: 0,
            dat_override: None,
            cmd_inhibit_reads: 0,
            dat_inhibit_reads: 0,
            transfer_done: Irpt::DATA_DONE.bits(),
            now_us: 0,
            accesses: 0,
            writes: Vec::new(),
            commands: Vec::new(),
            barriers: Cell::new(0),
            failures: Vec::new(),
            fifo_in: VecDeque::new(),
            pending_read: None,
            pending_write: None,
            written: Vec::new(),
        }
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.regs[(offset / 4) as usize]
    }

    /// Latch interrupt bits as if hardware raised them.
    pub fn raise(&mut self, bits: u32) {
        self.interrupt |= bits;
    }

    pub fn pending_interrupts(&self) -> u32 {
        self.interrupt
    }

    /// Make the next `times` issues of `command` fail with `bits` latched.
    pub fn fail(&mut self, command: Command, times: u32, bits: u32) {
        self.failures.push(Failure { command, remaining: times, bits });
    }

    pub fn count(&self, command: Command) -> usize {
        self.commands.iter().filter(|c| c.command == command).count()
    }

    pub fn issued(&self, command: Command) -> Vec<Issued> {
        self.commands.iter().copied().filter(|c| c.command == command).collect()
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.writes.clear();
        self.accesses = 0;
    }

    fn respond(&mut self, r0: u32) {
        self.regs[(EMMC_RESP0 / 4) as usize] = r0;
    }

    fn byte_address(&self, arg: u32) -> usize {
        if self.card.sdhc { arg as usize * 512 } else { arg as usize }
    }

    fn ensure_storage(&mut self, end: usize) {
        if self.card.storage.len() < end {
            self.card.storage.resize(end, 0);
        }
    }

    fn execute(&mut self, cmdtm: u32) {
        let index = (cmdtm >> 24) as u8;
        let command = if std::mem::take(&mut self.card.app_cmd) {
            Command::Acmd(index)
        } else {
            Command::Cmd(index)
        };
        let arg = self.reg(EMMC_ARG1);
        let blksizecnt = self.reg(EMMC_BLKSIZECNT);
        self.commands.push(Issued { command, arg, blksizecnt });

        if let Some(failure) = self
            .failures
            .iter_mut()
            .find(|f| f.command == command && f.remaining > 0)
        {
            failure.remaining -= 1;
            self.interrupt |= failure.bits;
            return;
        }

        let done = Irpt::CMD_DONE.bits();
        let busy_done = done | Irpt::DATA_DONE.bits();

        match command {
            Command::Cmd(0) => {
                self.card.state = SD_STATE_IDLE;
                self.card.busy_left = self.card.busy_polls;
                self.interrupt |= done;
            }
            Command::Cmd(8) => {
                if self.card.v2 {
                    let echo = self.card.if_cond_echo.unwrap_or(arg & 0xfff);
                    self.respond(echo);
                    self.interrupt |= done;
                } else {
                    self.interrupt |= CMD_TIMEOUT;
                }
            }
            Command::Cmd(5) => {
                if self.card.sdio {
                    self.respond(0x80ff_8000);
                    self.interrupt |= done;
                } else {
                    self.interrupt |= CMD_TIMEOUT;
                }
            }
            Command::Cmd(55) => {
                self.card.app_cmd = true;
                self.respond(self.card.status());
                self.interrupt |= done;
            }
            Command::Acmd(41) => {
                if arg == 0 {
                    self.respond(SD_OCR_VOLTAGE_WINDOW);
                } else if self.card.busy_left > 0 {
                    self.card.busy_left -= 1;
                    self.respond(SD_OCR_VOLTAGE_WINDOW);
                } else {
                    let mut ocr = SD_OCR_BUSY | SD_OCR_VOLTAGE_WINDOW;
                    if self.card.sdhc && arg & SD_OCR_HCS != 0 {
                        ocr |= SD_OCR_HCS;
                    }
                    if self.card.s18 && arg & SD_OCR_S18 != 0 {
                        ocr |= SD_OCR_S18;
                    }
                    self.respond(ocr);
                    self.card.state = SD_STATE_READY;
                }
                self.interrupt |= done;
            }
            Command::Cmd(2) => {
                self.regs[(EMMC_RESP0 / 4) as usize..=(EMMC_RESP3 / 4) as usize].copy_from_slice(&CID);
                self.card.state = SD_STATE_IDENT;
                self.interrupt |= done;
            }
            Command::Cmd(3) => {
                let status = self
                    .card
                    .r6_status
                    .unwrap_or((self.card.state << SD_STATUS_STATE_SHIFT) | READY_FOR_DATA);
                self.respond((RCA << 16) | status);
                self.card.state = SD_STATE_STBY;
                self.interrupt |= done;
            }
            Command::Cmd(7) => {
                self.respond(self.card.status());
                self.card.state = if arg >> 16 == RCA && !self.card.ignores_select {
                    SD_STATE_TRAN
                } else {
                    SD_STATE_STBY
                };
                self.interrupt |= busy_done;
            }
            Command::Cmd(12) => {
                self.respond(self.card.status());
                self.card.state = SD_STATE_TRAN;
                self.interrupt |= busy_done;
            }
            Command::Cmd(13) => {
                if arg >> 16 == RCA {
                    self.respond(self.card.status());
                    self.interrupt |= done;
                } else {
                    self.interrupt |= CMD_TIMEOUT;
                }
            }
            Command::Cmd(16) => {
                self.card.block_len = arg;
                self.respond(self.card.status());
                self.interrupt |= done;
            }
            Command::Acmd(6) => {
                self.card.bus_width = arg;
                self.respond(self.card.status());
                self.interrupt |= done;
            }
            Command::Acmd(51) => {
                let scr = self.card.scr;
                self.fifo_in.push_back(u32::from_ne_bytes([scr[0], scr[1], scr[2], scr[3]]));
                self.fifo_in.push_back(u32::from_ne_bytes([scr[4], scr[5], scr[6], scr[7]]));
                self.respond(self.card.status());
                self.pending_read = Some(Irpt::DATA_DONE.bits());
                self.interrupt |= done | Irpt::READ_RDY.bits();
            }
            Command::Cmd(17) | Command::Cmd(18) => {
                let addr = self.byte_address(arg);
                let len = ((blksizecnt & 0xfff) * (blksizecnt >> 16)) as usize;
                self.ensure_storage(addr + len);
                let data: Vec<u8> = self.card.storage[addr..addr + len].to_vec();
                for word in data.chunks_exact(4) {
                    self.fifo_in.push_back(u32::from_ne_bytes([word[0], word[1], word[2], word[3]]));
                }
                self.respond(self.card.status());
                self.pending_read = Some(self.transfer_done);
                self.interrupt |= done | Irpt::READ_RDY.bits();
            }
            Command::Cmd(24) | Command::Cmd(25) => {
                let addr = self.byte_address(arg);
                let len = ((blksizecnt & 0xfff) * (blksizecnt >> 16)) as usize;
                self.pending_write = Some((addr, len));
                self.written.clear();
                self.respond(self.card.status());
                self.interrupt |= done | Irpt::WRITE_RDY.bits();
            }
            _ => {
                self.respond(self.card.status());
                self.interrupt |= done;
            }
        }
    }

    fn push_data(&mut self, value: u32) {
        let Some((addr, len)) = self.pending_write else {
            return;
        };
        self.written.extend_from_slice(&value.to_ne_bytes());
        if self.written.len() >= len {
            self.ensure_storage(addr + len);
            let data = std::mem::take(&mut self.written);
            self.card.storage[addr..addr + len].copy_from_slice(&data[..len]);
            self.pending_write = None;
            self.interrupt |= self.transfer_done;
        }
    }

    fn pop_data(&mut self) -> u32 {
        let value = self.fifo_in.pop_front().unwrap_or(0);
        if self.fifo_in.is_empty() {
            if let Some(bits) = self.pending_read.take() {
                self.interrupt |= bits;
            }
        }
        value
    }

    fn clear_data_path(&mut self) {
        self.fifo_in.clear();
        self.pending_read = None;
        self.pending_write = None;
    }
}

impl EmmcHal for Sim {
    fn read32(&mut self, offset: u32) -> u32 {
        self.accesses += 1;
        match offset {
            EMMC_INTERRUPT => {
                if self.interrupt & EMMC_INT_ERROR_MASK != 0 {
                    self.interrupt | Irpt::ERR.bits()
                } else {
                    self.interrupt
                }
            }
            EMMC_STATUS => {
                let mut status = 0;
                if self.card_present {
                    status |= EMMC_STATUS_CARD_INSERTED;
                }
                let clock_on = self.reg(EMMC_CONTROL1) & EMMC_CLK_EN != 0;
                let dat = self.dat_override.unwrap_or(if clock_on { 0xf } else { 0 });
                if self.cmd_inhibit_reads > 0 {
                    self.cmd_inhibit_reads -= 1;
                    status |= EMMC_STATUS_CMD_INHIBIT;
                }
                if self.dat_inhibit_reads > 0 {
                    self.dat_inhibit_reads -= 1;
                    status |= EMMC_STATUS_DAT_INHIBIT;
                }
                status | (dat << EMMC_STATUS_DAT_SHIFT)
            }
            EMMC_CONTROL1 => {
                let control1 = self.reg(EMMC_CONTROL1);
                control1 | ((control1 & EMMC_CLK_INTLEN) << 1)
            }
            EMMC_SLOTISR_VER => self.slotisr_ver,
            EMMC_DATA => self.pop_data(),
            _ => self.reg(offset),
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.accesses += 1;
        self.writes.push((offset, value));
        match offset {
            EMMC_INTERRUPT => self.interrupt &= !value,
            EMMC_CONTROL1 => {
                if value & EMMC_RESET_ALL != 0 {
                    self.regs = [0; 64];
                    self.interrupt = 0;
                    self.clear_data_path();
                } else {
                    if value & EMMC_RESET_DAT != 0 {
                        self.clear_data_path();
                    }
                    self.regs[(EMMC_CONTROL1 / 4) as usize] = value & !(EMMC_RESET_MASK | EMMC_CLK_STABLE);
                }
            }
            EMMC_CMDTM => {
                self.regs[(EMMC_CMDTM / 4) as usize] = value;
                self.execute(value);
            }
            EMMC_DATA => self.push_data(value),
            _ => self.regs[(offset / 4) as usize] = value,
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.now_us += us as u64;
    }

    fn power_on(&mut self) -> bool {
        self.power_on_calls += 1;
        self.power_ok
    }

    fn base_clock_hz(&mut self) -> u32 {
        self.base_clock
    }

    fn data_mem_barrier(&self) {
        self.barriers.set(self.barriers.get() + 1);
    }
}

/// Feature-independent defaults: 4-bit bus and XPC requested, 3.3V only.
pub const CONFIG: EmmcConfig = EmmcConfig {
    poll_status_reg: false,
    signal_1v8: false,
    bus_4bit: true,
    sdxc_max_performance: true,
    card_interrupts: false,
};

pub fn host(card: SimCard) -> EmmcHost<Sim> {
    EmmcHost::with_config(Sim::new(card), CONFIG)
}

pub fn host_with(card: SimCard, config: EmmcConfig) -> EmmcHost<Sim> {
    EmmcHost::with_config(Sim::new(card), config)
}

/// An initialised host with an empty command log.
pub fn ready(card: SimCard) -> EmmcHost<Sim> {
    let mut host = host(card);
    host.initialize().expect("card initialisation");
    host.hal_mut().clear_log();
    host
}

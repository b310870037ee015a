#![allow(unused)]

use bitflags::bitflags;

// EMMC register offsets (HCSS 3.00 layout as wired on BCM2835)
pub const EMMC_ARG2: u32 = 0x00;                    // Argument 2 / SDMA address
pub const EMMC_BLKSIZECNT: u32 = 0x04;              // Block size [9:0] | block count [31:16]
pub const EMMC_ARG1: u32 = 0x08;                    // Command argument
pub const EMMC_CMDTM: u32 = 0x0C;                   // Command + transfer mode, writing starts the command
pub const EMMC_RESP0: u32 = 0x10;
pub const EMMC_RESP1: u32 = 0x14;
pub const EMMC_RESP2: u32 = 0x18;
pub const EMMC_RESP3: u32 = 0x1C;
pub const EMMC_DATA: u32 = 0x20;                    // Data FIFO
pub const EMMC_STATUS: u32 = 0x24;                  // Present state
pub const EMMC_CONTROL0: u32 = 0x28;                // Host / power / block gap / wakeup control
pub const EMMC_CONTROL1: u32 = 0x2C;                // Clock / timeout / software reset
pub const EMMC_INTERRUPT: u32 = 0x30;               // Interrupt status, write 1 to clear
pub const EMMC_IRPT_MASK: u32 = 0x34;               // Interrupt status enable
pub const EMMC_IRPT_EN: u32 = 0x38;                 // Interrupt signal enable
pub const EMMC_CONTROL2: u32 = 0x3C;                // Auto CMD status / host control 2
pub const EMMC_CAPABILITIES_0: u32 = 0x40;
pub const EMMC_CAPABILITIES_1: u32 = 0x44;
pub const EMMC_FORCE_IRPT: u32 = 0x50;
pub const EMMC_BOOT_TIMEOUT: u32 = 0x70;
pub const EMMC_DBG_SEL: u32 = 0x74;
pub const EMMC_EXRDFIFO_CFG: u32 = 0x80;
pub const EMMC_EXRDFIFO_EN: u32 = 0x84;
pub const EMMC_TUNE_STEP: u32 = 0x88;
pub const EMMC_TUNE_STEPS_STD: u32 = 0x8C;
pub const EMMC_TUNE_STEPS_DDR: u32 = 0x90;
pub const EMMC_SPI_INT_SPT: u32 = 0xF0;
pub const EMMC_SLOTISR_VER: u32 = 0xFC;             // Vendor [31:24] | SD version [23:16] | slot status [7:0]

// STATUS
pub const EMMC_STATUS_CMD_INHIBIT: u32 = 1 << 0;
pub const EMMC_STATUS_DAT_INHIBIT: u32 = 1 << 1;
pub const EMMC_STATUS_CARD_INSERTED: u32 = 1 << 16;
pub const EMMC_STATUS_DAT_SHIFT: u32 = 20;
pub const EMMC_STATUS_DAT_MASK: u32 = 0xf;

// CONTROL0
pub const EMMC_CTRL0_4BITBUS: u32 = 1 << 1;
pub const EMMC_CTRL0_POWER: u32 = 1 << 8;           // 1.8V signal enable / bus power

// CONTROL1
pub const EMMC_CLK_INTLEN: u32 = 1 << 0;
pub const EMMC_CLK_STABLE: u32 = 1 << 1;
pub const EMMC_CLK_EN: u32 = 1 << 2;
pub const EMMC_CLK_GENSEL: u32 = 1 << 5;
pub const EMMC_CLK_FREQ_MS2_SHIFT: u32 = 6;
pub const EMMC_CLK_FREQ8_SHIFT: u32 = 8;
pub const EMMC_CLK_DIV_MASK: u32 = 0xffe0;          // divider fields + generator select
pub const EMMC_DATA_TOUNIT_SHIFT: u32 = 16;
pub const EMMC_DATA_TOUNIT_MASK: u32 = 0xf << EMMC_DATA_TOUNIT_SHIFT;
pub const EMMC_DATA_TOUNIT_2POW24: u32 = 11;        // TMCLK * 2^24
pub const EMMC_RESET_ALL: u32 = 1 << 24;
pub const EMMC_RESET_CMD: u32 = 1 << 25;
pub const EMMC_RESET_DAT: u32 = 1 << 26;
pub const EMMC_RESET_MASK: u32 = 7 << 24;

pub const EMMC_BLKSIZE_MASK: u32 = 0xfff;

bitflags! {
    /// Interrupt register bits below the error half.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Irpt: u32 {
        const CMD_DONE = 1 << 0;
        const DATA_DONE = 1 << 1;
        const BLOCK_GAP = 1 << 2;
        const DMA = 1 << 3;
        const WRITE_RDY = 1 << 4;
        const READ_RDY = 1 << 5;
        const CARD_INSERTION = 1 << 6;
        const CARD_REMOVAL = 1 << 7;
        const CARD_INTERRUPT = 1 << 8;
        const ERR = 1 << 15;
    }
}

pub const EMMC_INT_ERROR_MASK: u32 = 0xffff_0000;
pub const EMMC_INT_ALL: u32 = 0xffff_ffff;
/// Data timeout latched together with transfer complete; the latter wins (HCSS 2.2.17).
pub const EMMC_INT_DATA_DONE_WITH_TIMEOUT: u32 = 0x0010_0002;

// SD clock frequencies (Hz)
pub const SD_CLOCK_ID: u32 = 400_000;
pub const SD_CLOCK_NORMAL: u32 = 25_000_000;
pub const SD_CLOCK_HIGH: u32 = 50_000_000;
pub const SD_CLOCK_100: u32 = 100_000_000;
pub const SD_CLOCK_208: u32 = 208_000_000;
pub const SD_DEFAULT_BASE_CLOCK: u32 = 100_000_000;

pub const SD_BLOCK_SIZE: u32 = 512;
/// Internal FIFO size of the controller.
pub const EMMC_FIFO_SIZE: u32 = 1024;

// Timeouts (us)
pub const SD_DEFAULT_TIMEOUT_US: u32 = 500_000;
pub const SD_DATA_TIMEOUT_US: u32 = 5_000_000;
pub const SD_SDIO_PROBE_TIMEOUT_US: u32 = 10_000;
pub const SD_LINE_RESET_TIMEOUT_US: u32 = 1_000_000;
pub const SD_CARD_DETECT_TIMEOUT_US: u32 = 500_000;
pub const SD_CLOCK_SETTLE_US: u32 = 2_000;
pub const SD_OP_COND_RETRY_US: u32 = 500_000;

pub const SD_TRANSFER_RETRIES: u32 = 3;

// CMD8
pub const SD_IF_COND_PATTERN: u32 = 0x1aa;
pub const SD_IF_COND_MASK: u32 = 0xfff;

// ACMD41 argument / OCR bits
pub const SD_OCR_VOLTAGE_WINDOW: u32 = 0x00ff_8000;
pub const SD_OCR_S18: u32 = 1 << 24;
pub const SD_OCR_XPC: u32 = 1 << 28;
pub const SD_OCR_HCS: u32 = 1 << 30;
pub const SD_OCR_BUSY: u32 = 1 << 31;

// R1 / R6 card status fields
pub const SD_STATUS_STATE_SHIFT: u32 = 9;
pub const SD_STATUS_STATE_MASK: u32 = 0xf;
pub const SD_R6_RCA_SHIFT: u32 = 16;
pub const SD_R6_CRC_ERROR: u32 = 1 << 15;
pub const SD_R6_ILLEGAL_CMD: u32 = 1 << 14;
pub const SD_R6_ERROR: u32 = 1 << 13;
pub const SD_R6_READY: u32 = 1 << 8;

// Card states (PLSS 4.10.1)
pub const SD_STATE_IDLE: u32 = 0;
pub const SD_STATE_READY: u32 = 1;
pub const SD_STATE_IDENT: u32 = 2;
pub const SD_STATE_STBY: u32 = 3;
pub const SD_STATE_TRAN: u32 = 4;
pub const SD_STATE_DATA: u32 = 5;
pub const SD_STATE_RCV: u32 = 6;
pub const SD_STATE_PRG: u32 = 7;
pub const SD_STATE_DIS: u32 = 8;

// ACMD6 argument
pub const SD_BUS_WIDTH_4: u32 = 2;
// SCR bus width bit for 4-bit mode
pub const SD_SCR_BUS_WIDTH_4: u8 = 1 << 2;

// ===== Block Device Interface =====

use log::{debug, warn};

use crate::{err::SdError, hal::EmmcHal};

use super::{
    cmd::{self, DataBuffer},
    constant::*,
    EmmcHost,
};

// Block device trait that could be used by a filesystem
pub trait BlockDevice {
    fn read_block(&mut self, block_addr: u32, buffer: &mut [u8]) -> Result<(), SdError>;
    fn write_block(&mut self, block_addr: u32, buffer: &[u8]) -> Result<(), SdError>;
    fn read_blocks(&mut self, block_addr: u32, blocks: u16, buffer: &mut [u8]) -> Result<(), SdError>;
    fn write_blocks(&mut self, block_addr: u32, blocks: u16, buffer: &[u8]) -> Result<(), SdError>;
}

// Transfers are whole 512-byte blocks
fn check_transfer_len(len: usize) -> Result<(), SdError> {
    if len == 0 || len % SD_BLOCK_SIZE as usize != 0 {
        debug!("buffer size ({}) is not a multiple of the block size ({})", len, SD_BLOCK_SIZE);
        return Err(SdError::InvalidArgument);
    }
    Ok(())
}

impl<H: EmmcHal> EmmcHost<H> {
    /// Issue the single or multi block command covering `buf` (HCSS 3.7.2.1).
    ///
    /// Three attempts are made; when all fail the session is dropped so the
    /// next transfer re-initialises the card.
    fn do_data_command(&mut self, mut buf: DataBuffer<'_>, block_no: u32) -> Result<(), SdError> {
        // PLSS table 4.20 - SDSC cards use byte addresses rather than block addresses
        let address = if self.session.supports_sdhc {
            block_no
        } else {
            block_no.checked_mul(SD_BLOCK_SIZE).ok_or(SdError::InvalidArgument)?
        };

        let block_size = self.block_size as usize;
        if block_size == 0 || buf.len() < block_size {
            warn!("buffer size ({}) less than block size ({})", buf.len(), block_size);
            return Err(SdError::InvalidArgument);
        }
        if buf.len() % block_size != 0 {
            warn!("buffer size ({}) not an exact multiple of block size ({})", buf.len(), block_size);
            return Err(SdError::InvalidArgument);
        }
        let blocks = u32::try_from(buf.len() / block_size).map_err(|_| SdError::InvalidArgument)?;
        self.blocks_to_transfer = blocks;

        let command = match (buf.is_write(), blocks > 1) {
            (true, true) => cmd::WRITE_MULTIPLE_BLOCK,
            (true, false) => cmd::WRITE_BLOCK,
            (false, true) => cmd::READ_MULTIPLE_BLOCK,
            (false, false) => cmd::READ_SINGLE_BLOCK,
        };

        for attempt in 1..=SD_TRANSFER_RETRIES {
            if self
                .issue_data_command(command, address, SD_DATA_TIMEOUT_US, &mut buf)
                .is_success()
            {
                return Ok(());
            }

            debug!("error sending {}, error = {:?}", command, self.last.outcome.error_flags());
            if attempt < SD_TRANSFER_RETRIES {
                debug!("retrying");
            } else {
                debug!("giving up");
            }
        }

        self.session.rca = 0;
        self.last.outcome.into_result().and(Err(SdError::TransferError))
    }

    /// Read `buf.len()` bytes starting at block `block_no`.
    pub fn do_read(&mut self, buf: &mut [u8], block_no: u32) -> Result<usize, SdError> {
        check_transfer_len(buf.len())?;

        // Check the status of the card
        self.ensure_data_mode()?;

        debug!("reading from block {}", block_no);
        let len = buf.len();
        self.do_data_command(DataBuffer::Read(buf), block_no)?;
        debug!("data read successful");

        Ok(len)
    }

    /// Write `buf` starting at block `block_no`.
    pub fn do_write(&mut self, buf: &[u8], block_no: u32) -> Result<usize, SdError> {
        check_transfer_len(buf.len())?;

        // Check the status of the card
        self.ensure_data_mode()?;

        debug!("writing to block {}", block_no);
        self.do_data_command(DataBuffer::Write(buf), block_no)?;
        debug!("data write successful");

        Ok(buf.len())
    }

    pub fn seek(&mut self, offset: u64) -> u64 {
        self.offset = offset;
        self.offset
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn current_block(&self) -> Result<u32, SdError> {
        if self.offset % SD_BLOCK_SIZE as u64 != 0 {
            return Err(SdError::Misaligned);
        }
        u32::try_from(self.offset / SD_BLOCK_SIZE as u64).map_err(|_| SdError::InvalidArgument)
    }

    /// Read at the current offset. The offset is not advanced.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SdError> {
        let block = self.current_block()?;

        self.hal.data_mem_barrier();
        let result = self.do_read(buf, block);
        self.hal.data_mem_barrier();

        result
    }

    /// Write at the current offset. The offset is not advanced.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, SdError> {
        let block = self.current_block()?;

        self.hal.data_mem_barrier();
        let result = self.do_write(buf, block);
        self.hal.data_mem_barrier();

        result
    }
}

impl<H: EmmcHal> BlockDevice for EmmcHost<H> {
    fn read_block(&mut self, block_addr: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        self.read_blocks(block_addr, 1, buffer)
    }

    fn write_block(&mut self, block_addr: u32, buffer: &[u8]) -> Result<(), SdError> {
        self.write_blocks(block_addr, 1, buffer)
    }

    fn read_blocks(&mut self, block_addr: u32, blocks: u16, buffer: &mut [u8]) -> Result<(), SdError> {
        let len = blocks as usize * SD_BLOCK_SIZE as usize;
        if buffer.len() < len {
            return Err(SdError::InvalidArgument);
        }

        self.hal.data_mem_barrier();
        let result = self.do_read(&mut buffer[..len], block_addr);
        self.hal.data_mem_barrier();

        result.map(|_| ())
    }

    fn write_blocks(&mut self, block_addr: u32, blocks: u16, buffer: &[u8]) -> Result<(), SdError> {
        let len = blocks as usize * SD_BLOCK_SIZE as usize;
        if buffer.len() < len {
            return Err(SdError::InvalidArgument);
        }

        self.hal.data_mem_barrier();
        let result = self.do_write(&buffer[..len], block_addr);
        self.hal.data_mem_barrier();

        result.map(|_| ())
    }
}

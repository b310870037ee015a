//! SD card driver for the BCM2835-family EMMC controller (SDHCI 3.0 register
//! layout), polled and PIO only.

#![cfg_attr(not(test), no_std)]

pub mod emmc;
pub mod hal;
mod err;

pub use emmc::{BlockDevice, EmmcConfig, EmmcHost, SharedEmmc};
pub use err::{ErrorFlags, Outcome, SdError};
pub use hal::{EmmcHal, Mmio};

/// Find last set: 1-based position of the most significant set bit, 0 for 0.
pub const fn generic_fls(x: u32) -> u32 {
    32 - x.leading_zeros()
}

use log::{debug, warn};

use crate::{err::SdError, generic_fls, hal::EmmcHal};

use super::{constant::*, EmmcHost};

const EMMC_CLK_DIV_MAX: u32 = 0x3ff;

/// Compute the CONTROL1 divider fields for `target_rate` from a `base_clock`.
///
/// Only the 10-bit divided clock mode is handled, so the controller must be
/// at least version 2. The divisor is rounded up to a power of two, giving a
/// card clock no faster than `target_rate`. Returns `None` for older hosts
/// or a zero target.
pub fn clock_divider(host_version: u32, base_clock: u32, target_rate: u32) -> Option<u32> {
    if host_version < 2 {
        warn!("Unsupported host version {}", host_version);
        return None;
    }
    if target_rate == 0 {
        return None;
    }

    let targetted = if target_rate >= base_clock {
        1
    } else {
        let div = base_clock / target_rate;
        if base_clock % target_rate != 0 { div - 1 } else { div }
    };

    // A request of 0 lands between base/2 and base: no power of two fits,
    // fall back to the slowest clock.
    let divisor = match targetted {
        0 => EMMC_CLK_DIV_MAX,
        1 => 0,
        t => {
            let mut shift = generic_fls(t) - 1;
            if !t.is_power_of_two() {
                shift += 1;
            }
            (1u32 << (shift.min(31) - 1)).min(EMMC_CLK_DIV_MAX)
        }
    };

    let freq_select = divisor & 0xff;
    let upper_bits = (divisor >> 8) & 0x3;
    let ret = (freq_select << EMMC_CLK_FREQ8_SHIFT) | (upper_bits << EMMC_CLK_FREQ_MS2_SHIFT);

    debug!(
        "base_clock: {}, target_rate: {}, divisor: {:#x}, control1: {:#x}",
        base_clock, target_rate, divisor, ret
    );

    Some(ret)
}

impl<H: EmmcHal> EmmcHost<H> {
    /// Reprogram the SD clock generator for `target_rate`.
    pub fn switch_clock_rate(&mut self, base_clock: u32, target_rate: u32) -> Result<(), SdError> {
        let divider = clock_divider(self.host_version, base_clock, target_rate)
            .ok_or(SdError::InvalidArgument)?;

        // Wait for the CMD and DAT lines to go idle
        while self.read_reg(EMMC_STATUS) & (EMMC_STATUS_CMD_INHIBIT | EMMC_STATUS_DAT_INHIBIT) != 0 {
            self.delay_us(1000);
        }

        // Turn the SD clock off
        let mut control1 = self.read_reg(EMMC_CONTROL1);
        control1 &= !EMMC_CLK_EN;
        self.write_reg(EMMC_CONTROL1, control1);
        self.delay_us(SD_CLOCK_SETTLE_US);

        // New divider, generator select cleared
        control1 &= !EMMC_CLK_DIV_MASK;
        control1 |= divider;
        self.write_reg(EMMC_CONTROL1, control1);
        self.delay_us(SD_CLOCK_SETTLE_US);

        control1 |= EMMC_CLK_EN;
        self.write_reg(EMMC_CONTROL1, control1);
        self.delay_us(SD_CLOCK_SETTLE_US);

        debug!("successfully set clock rate to {}", target_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(field: u32) -> u32 {
        ((field >> EMMC_CLK_FREQ8_SHIFT) & 0xff) | (((field >> EMMC_CLK_FREQ_MS2_SHIFT) & 0x3) << 8)
    }

    #[test]
    fn normal_speed_from_100mhz() {
        let field = clock_divider(2, 100_000_000, 25_000_000).unwrap();
        assert_eq!(field, 0x200);
        // Card clock = base / (2 * N)
        assert!(100_000_000 / (2 * decode(field)) <= 25_000_000);
    }

    #[test]
    fn identification_speed_rounds_up_to_power_of_two() {
        let field = clock_divider(2, 100_000_000, SD_CLOCK_ID).unwrap();
        assert_eq!(field, 0x8000);
        assert_eq!(decode(field), 128);
        assert!(100_000_000 / (2 * 128) <= SD_CLOCK_ID);
    }

    #[test]
    fn no_division_at_or_above_base() {
        assert_eq!(clock_divider(2, 100_000_000, 100_000_000), Some(0));
        assert_eq!(clock_divider(2, 100_000_000, 200_000_000), Some(0));
    }

    #[test]
    fn target_between_half_and_full_base_runs_slowest() {
        // base/target = 1 with remainder
        assert_eq!(clock_divider(2, 100_000_000, 60_000_000), Some(0xffc0));

        let base = 41_666_666;
        let field = clock_divider(2, base, SD_CLOCK_NORMAL).unwrap();
        assert_eq!(decode(field), 0x3ff);
        assert!(base / (2 * decode(field)) <= SD_CLOCK_NORMAL);
    }

    #[test]
    fn divider_is_clamped() {
        let field = clock_divider(2, 100_000_000, 1).unwrap();
        assert_eq!(field, 0xffc0);
        assert_eq!(decode(field), 0x3ff);

        for target in [1, 10, 1_000, 50_000, 400_000, 12_500_000] {
            let field = clock_divider(3, 250_000_000, target).unwrap();
            assert!(decode(field) < 0x400);
            assert_eq!(field & !EMMC_CLK_DIV_MASK, 0);
        }
    }

    #[test]
    fn old_hosts_and_zero_targets_fail() {
        assert_eq!(clock_divider(1, 100_000_000, 25_000_000), None);
        assert_eq!(clock_divider(2, 100_000_000, 0), None);
    }
}

//! Platform services the controller driver consumes but does not implement.

use cfg_if::cfg_if;

/// Register window, delay source, power rail and clock query of one EMMC slot.
///
/// Offsets passed to `read32`/`write32` are relative to the controller base
/// (see `emmc::constant`).
pub trait EmmcHal {
    fn read32(&mut self, offset: u32) -> u32;

    fn write32(&mut self, offset: u32, value: u32);

    fn delay_us(&mut self, us: u32);

    /// Switch the slot's power rail on. Returns `false` if the platform
    /// reports the device missing or still off.
    fn power_on(&mut self) -> bool;

    /// Rate of the controller's base clock in Hz, or 0 if unknown.
    fn base_clock_hz(&mut self) -> u32;

    fn data_mem_barrier(&self) {
        barrier();
    }
}

/// Full-system data synchronisation barrier.
pub fn barrier() {
    cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            aarch64_cpu::asm::barrier::dsb(aarch64_cpu::asm::barrier::SY);
        } else {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Volatile 32-bit access to a memory-mapped register block.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base_addr: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base_addr` must point at a mapped register block that stays valid
    /// for the lifetime of the returned value, and nothing else may access
    /// it concurrently.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }

    // Read a 32-bit register
    pub fn read(&self, offset: u32) -> u32 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u32) }
    }

    // Write a 32-bit register
    pub fn write(&self, offset: u32, value: u32) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u32, value) }
    }
}

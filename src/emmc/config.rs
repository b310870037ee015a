/// Runtime switches of the controller driver. The defaults follow the
/// enabled Cargo features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmmcConfig {
    /// Poll the STATUS inhibit bits around commands instead of trusting
    /// interrupts alone.
    pub poll_status_reg: bool,
    /// Ask for 1.8V signalling and run the voltage switch when offered.
    pub signal_1v8: bool,
    /// Switch to a 4-bit data bus when the SCR allows it.
    pub bus_4bit: bool,
    /// Request maximum performance (XPC) from SDXC cards.
    pub sdxc_max_performance: bool,
    /// Leave the card interrupt routed into the interrupt register.
    pub card_interrupts: bool,
}

impl EmmcConfig {
    pub const fn new() -> Self {
        Self {
            poll_status_reg: cfg!(feature = "poll-status-reg"),
            signal_1v8: cfg!(feature = "signal-1v8"),
            bus_4bit: cfg!(feature = "bus-4bit"),
            sdxc_max_performance: cfg!(feature = "sdxc-max-performance"),
            card_interrupts: cfg!(feature = "card-interrupts"),
        }
    }
}

impl Default for EmmcConfig {
    fn default() -> Self {
        Self::new()
    }
}

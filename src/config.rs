//! Compile-time-flavored defaults for buffer sizing and flow-control thresholds,
//! overridable per host via [`EngineConfig`].

/// Default fixed capacity of one chain buffer, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Default chain length (in buffers) at or above which the receive loop sets
/// the Q2 input holdoff.
pub const DEFAULT_Q2_UPPER: usize = 16;

/// Default chain length below which the Q2 holdoff is cleared. Must stay
/// below `DEFAULT_Q2_UPPER` or the holdoff would never clear.
pub const DEFAULT_Q2_LOWER: usize = 4;

/// Default Q3 stall threshold, expressed in units of `buffer_size`.
pub const DEFAULT_Q3_UPPER_UNITS: usize = 16;

/// Host-tunable limits and policy for one engine instance.
///
/// All thresholds default to the constants above; a host overrides only what
/// it needs to. `max_message_size == 0` means unlimited.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buffer_size: usize,
    pub q2_upper: usize,
    pub q2_lower: usize,
    pub q3_upper_units: usize,
    pub max_message_size: u64,
    pub disable_q2_holdoff: bool,
    pub strip_annotations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            q2_upper: DEFAULT_Q2_UPPER,
            q2_lower: DEFAULT_Q2_LOWER,
            q3_upper_units: DEFAULT_Q3_UPPER_UNITS,
            max_message_size: 0,
            disable_q2_holdoff: false,
            strip_annotations: true,
        }
    }
}

impl EngineConfig {
    /// Session outgoing-byte threshold at or above which the send loop stalls.
    pub fn q3_upper_bytes(&self) -> usize {
        self.buffer_size * self.q3_upper_units
    }

    /// Panics if the threshold ordering required by the flow-control design
    /// (`q2_lower < q2_upper`) does not hold. Hosts that build a config from
    /// untrusted input should call this once before using it.
    pub fn validate(&self) {
        assert!(
            self.q2_lower < self.q2_upper,
            "EngineConfig: q2_lower ({}) must be < q2_upper ({})",
            self.q2_lower,
            self.q2_upper
        );
    }
}

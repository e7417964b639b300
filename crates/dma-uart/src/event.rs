//! Hardware receive-event kinds and line-error flags

/// Why the receive path was notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxEvent {
    /// The line went quiet after at least one character: a message boundary.
    Idle,
    /// The DMA write cursor reached the midpoint of the receive buffer.
    HalfTransfer,
    /// The DMA write cursor reached the end of the receive buffer and wrapped.
    TransferComplete,
    /// A discriminator the driver does not know. Diagnostic only.
    Other(u8),
}

impl RxEvent {
    /// `true` for events that mark a logical message boundary and should wake
    /// the consumer.
    pub const fn wakes_consumer(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Set of USART status flags cleared by the error-recovery path.
///
/// Stored as a bit mask so a port can report exactly which flags were pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineErrors(u8);

impl LineErrors {
    /// Receiver overrun
    pub const OVERRUN: Self = Self(1 << 0);
    /// Framing error
    pub const FRAMING: Self = Self(1 << 1);
    /// Parity error
    pub const PARITY: Self = Self(1 << 2);
    /// Noise detected
    pub const NOISE: Self = Self(1 << 3);
    /// Idle line detected
    pub const IDLE: Self = Self(1 << 4);
    /// Character match
    pub const CHAR_MATCH: Self = Self(1 << 5);

    /// No flag set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every flag the recovery path clears.
    pub const fn all() -> Self {
        Self(
            Self::OVERRUN.0
                | Self::FRAMING.0
                | Self::PARITY.0
                | Self::NOISE.0
                | Self::IDLE.0
                | Self::CHAR_MATCH.0,
        )
    }

    /// Raw bit mask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from a raw mask, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::all().0)
    }

    /// `true` when no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` when every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` when a real line error (not just a status flag) is pending.
    pub const fn has_line_error(self) -> bool {
        self.0 & (Self::OVERRUN.0 | Self::FRAMING.0 | Self::PARITY.0 | Self::NOISE.0) != 0
    }
}

impl core::ops::BitOr for LineErrors {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for LineErrors {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

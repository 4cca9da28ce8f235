//! Machine descriptions.

use thiserror::Error;

use crate::arith::ranges_overlap;

/// Machines the compiler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    /// Commodore 64.
    C64,
    /// Commodore 128.
    C128,
    /// Commander X16.
    X16,
}

/// Errors raised when selecting or validating a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The architecture exists but has no backend yet.
    #[error("target `{0}` is not implemented")]
    NotImplemented(Architecture),
    /// The description failed its own consistency checks.
    #[error("invalid target description: {0}")]
    InvalidDescription(String),
}

/// One reserved zero-page range, with the reason it is off-limits.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZeroPageRange {
    /// First reserved byte.
    pub start: u16,
    /// Last reserved byte, inclusive.
    pub end: u16,
    /// Who owns the range.
    pub reason: String,
}

/// The target's zero-page map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZeroPageMap {
    /// Ranges the compiler must not allocate.
    pub reserved_ranges: Vec<ZeroPageRange>,
    /// Inclusive range free for compiler use.
    pub safe_range: (u16, u16),
    /// Number of bytes in the safe range.
    pub usable_bytes: u16,
}

impl ZeroPageMap {
    /// True when `address` lies in a reserved range.
    pub fn is_reserved(&self, address: u16) -> bool {
        self.reserved_ranges
            .iter()
            .any(|r| address >= r.start && address <= r.end)
    }

    /// True when `address` lies in the safe range.
    pub fn is_safe(&self, address: u16) -> bool {
        address >= self.safe_range.0 && address <= self.safe_range.1
    }

    /// Reserved range containing `address`, for diagnostics.
    pub fn reserved_reason(&self, address: u16) -> Option<&str> {
        self.reserved_ranges
            .iter()
            .find(|r| address >= r.start && address <= r.end)
            .map(|r| r.reason.as_str())
    }
}

/// Video chip timing, for raster-critical cycle budgets.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphicsChip {
    /// Chip name.
    pub name: String,
    /// First register address.
    pub base_address: u16,
    /// CPU cycles per raster line.
    pub cycles_per_line: u32,
    /// Raster lines per frame.
    pub lines_per_frame: u32,
    /// Cycles stolen on a bad line.
    pub badline_penalty: u32,
}

/// Sound chip description.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoundChip {
    /// Chip name.
    pub name: String,
    /// First register address.
    pub base_address: u16,
    /// Number of voices.
    pub voices: u8,
}

/// One region of the memory map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryRegion {
    /// Region name (`basic-rom`, `io`, …).
    pub name: String,
    /// First byte.
    pub start: u16,
    /// Last byte, inclusive.
    pub end: u16,
}

/// Full description of one target machine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetConfig {
    /// Which machine.
    pub architecture: Architecture,
    /// CPU name.
    pub cpu: String,
    /// Clock speed in MHz.
    pub clock_speed_mhz: f64,
    /// Total addressable memory in bytes.
    pub total_memory: u32,
    /// Zero-page map.
    pub zero_page: ZeroPageMap,
    /// Video chip.
    pub graphics_chip: GraphicsChip,
    /// Sound chip.
    pub sound_chip: SoundChip,
    /// Coarse memory map.
    pub memory_regions: Vec<MemoryRegion>,
    /// True when codegen exists for this target.
    pub implemented: bool,
}

impl TargetConfig {
    /// Description for `architecture`, or `NotImplemented` for targets the
    /// backend cannot emit yet.
    pub fn for_architecture(architecture: Architecture) -> Result<Self, TargetError> {
        match architecture {
            Architecture::C64 => Ok(Self::c64()),
            Architecture::C128 | Architecture::X16 => {
                Err(TargetError::NotImplemented(architecture))
            }
        }
    }

    /// The PAL Commodore 64.
    pub fn c64() -> Self {
        Self {
            architecture: Architecture::C64,
            cpu: "MOS 6510".into(),
            clock_speed_mhz: 0.985,
            total_memory: 65536,
            zero_page: ZeroPageMap {
                reserved_ranges: vec![
                    ZeroPageRange {
                        start: 0x0000,
                        end: 0x0001,
                        reason: "6510 processor port".into(),
                    },
                    ZeroPageRange {
                        start: 0x0090,
                        end: 0x00FF,
                        reason: "KERNAL and BASIC workspace".into(),
                    },
                ],
                safe_range: (0x0002, 0x008F),
                usable_bytes: 142,
            },
            graphics_chip: GraphicsChip {
                name: "VIC-II".into(),
                base_address: 0xD000,
                cycles_per_line: 63,
                lines_per_frame: 312,
                badline_penalty: 40,
            },
            sound_chip: SoundChip {
                name: "SID".into(),
                base_address: 0xD400,
                voices: 3,
            },
            memory_regions: vec![
                MemoryRegion {
                    name: "ram".into(),
                    start: 0x0000,
                    end: 0x9FFF,
                },
                MemoryRegion {
                    name: "basic-rom".into(),
                    start: 0xA000,
                    end: 0xBFFF,
                },
                MemoryRegion {
                    name: "io".into(),
                    start: 0xD000,
                    end: 0xDFFF,
                },
                MemoryRegion {
                    name: "kernal-rom".into(),
                    start: 0xE000,
                    end: 0xFFFF,
                },
            ],
            implemented: true,
        }
    }

    /// Consistency checks: reserved ranges must not overlap each other or
    /// the safe range, and `usable_bytes` must equal the safe-range size.
    pub fn validate(&self) -> Result<(), TargetError> {
        let (safe_start, safe_end) = self.zero_page.safe_range;
        if safe_end < safe_start {
            return Err(TargetError::InvalidDescription(
                "safe range is inverted".into(),
            ));
        }
        for (i, a) in self.zero_page.reserved_ranges.iter().enumerate() {
            if a.end < a.start {
                return Err(TargetError::InvalidDescription(format!(
                    "reserved range `{}` is inverted",
                    a.reason
                )));
            }
            if ranges_overlap(a.start, a.end, safe_start, safe_end) {
                return Err(TargetError::InvalidDescription(format!(
                    "reserved range `{}` intersects the safe range",
                    a.reason
                )));
            }
            for b in &self.zero_page.reserved_ranges[i + 1..] {
                if ranges_overlap(a.start, a.end, b.start, b.end) {
                    return Err(TargetError::InvalidDescription(format!(
                        "reserved ranges `{}` and `{}` overlap",
                        a.reason, b.reason
                    )));
                }
            }
        }
        let safe_size = safe_end - safe_start + 1;
        if self.zero_page.usable_bytes != safe_size {
            return Err(TargetError::InvalidDescription(format!(
                "usable_bytes is {} but the safe range holds {safe_size}",
                self.zero_page.usable_bytes
            )));
        }
        Ok(())
    }
}

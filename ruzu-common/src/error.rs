// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// nvdrv ioctl result code, as returned to the guest by `/dev/nvhost-*`
/// devices. Value 0 = success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NvResult(pub u32);

impl NvResult {
    pub const SUCCESS: Self = Self(0x0);
    pub const NOT_IMPLEMENTED: Self = Self(0x1);
    pub const NOT_SUPPORTED: Self = Self(0x2);
    pub const NOT_INITIALIZED: Self = Self(0x3);
    pub const BAD_PARAMETER: Self = Self(0x4);
    pub const TIMEOUT: Self = Self(0x5);
    pub const INSUFFICIENT_MEMORY: Self = Self(0x6);
    pub const READ_ONLY_ATTRIBUTE: Self = Self(0x7);
    pub const INVALID_STATE: Self = Self(0x8);
    pub const INVALID_ADDRESS: Self = Self(0x9);
    pub const INVALID_SIZE: Self = Self(0xA);
    pub const BAD_VALUE: Self = Self(0xB);
    pub const ALREADY_ALLOCATED: Self = Self(0xD);
    pub const BUSY: Self = Self(0xE);
    pub const RESOURCE_ERROR: Self = Self(0xF);
    pub const COUNT_MISMATCH: Self = Self(0x10);
    pub const SHARED_MEMORY_TOO_SMALL: Self = Self(0x1000);
    pub const FILE_OPERATION_FAILED: Self = Self(0x30003);
    pub const IOCTL_FAILED: Self = Self(0x3000F);

    /// Check if this is a success result.
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Check if this is an error result.
    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 != 0
    }

    /// Raw u32 value written back to the guest.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "Success",
            Self::NOT_IMPLEMENTED => "NotImplemented",
            Self::NOT_SUPPORTED => "NotSupported",
            Self::NOT_INITIALIZED => "NotInitialized",
            Self::BAD_PARAMETER => "BadParameter",
            Self::TIMEOUT => "Timeout",
            Self::INSUFFICIENT_MEMORY => "InsufficientMemory",
            Self::READ_ONLY_ATTRIBUTE => "ReadOnlyAttribute",
            Self::INVALID_STATE => "InvalidState",
            Self::INVALID_ADDRESS => "InvalidAddress",
            Self::INVALID_SIZE => "InvalidSize",
            Self::BAD_VALUE => "BadValue",
            Self::ALREADY_ALLOCATED => "AlreadyAllocated",
            Self::BUSY => "Busy",
            Self::RESOURCE_ERROR => "ResourceError",
            Self::COUNT_MISMATCH => "CountMismatch",
            Self::SHARED_MEMORY_TOO_SMALL => "SharedMemoryTooSmall",
            Self::FILE_OPERATION_FAILED => "FileOperationFailed",
            Self::IOCTL_FAILED => "IoctlFailed",
            _ => return None,
        })
    }
}

impl std::fmt::Debug for NvResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "NvResult::{}", name),
            None => write!(f, "NvResult(0x{:X})", self.0),
        }
    }
}

impl std::fmt::Display for NvResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown(0x{:X})", self.0),
        }
    }
}

impl std::error::Error for NvResult {}

//! Minos API - Core types and interfaces for the Minos teaching kernel
//!
//! This crate provides the foundation shared by the Minos kernel crates:
//! address types and page arithmetic, the common error type, and the traits
//! through which subsystems consume their external collaborators (physical
//! allocator, hardware page tables, block devices, files).

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// Core modules
pub mod addr;
pub mod error;
pub mod platform;

// Re-export commonly used types
pub use addr::{
    PAGE_SHIFT, PAGE_SIZE, PhysAddr, SECTOR_SIZE, SECTORS_PER_PAGE, STACK_LOW_BOUND,
    USER_STACK_TOP, VirtAddr, page_round_down, page_round_up,
};
pub use error::{Error, Result};
pub use platform::{
    AllocFlags, BlockDevice, FileHandle, PageBuf, PageDirectory, PhysMemory, Pid, Sector,
};

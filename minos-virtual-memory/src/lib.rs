//! Minos Virtual Memory
//!
//! Demand-paged virtual memory for the Minos teaching kernel: user processes
//! may use more virtual memory than there is physical memory, with page
//! contents moved transparently between physical frames, a disk-backed swap
//! area, and memory-mapped files.
//!
//! The subsystem is built from four components:
//!
//! - [`frame::FrameTable`] - the registry of resident physical frames and
//!   the eviction policy
//! - [`page::ProcessPages`] - the per-process supplemental page table
//! - [`swap::SwapStore`] - page-sized slots on the swap device
//! - [`mmap::MemoryMap`] - file-backed virtual ranges
//!
//! [`vm::VmManager`] ties them together and exposes the operations the
//! page-fault handler and the process-exit path call.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod frame;
pub mod mmap;
pub mod page;
pub mod swap;
pub mod vm;

// Re-export commonly used types
pub use frame::{Frame, FrameTable, PageKey};
pub use mmap::{MapId, MemoryMap};
pub use page::{Backing, PageRecord, ProcessPages, Residency};
pub use swap::{SlotId, SwapStore};
pub use vm::VmManager;

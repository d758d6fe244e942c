//! Cycle-stepped emulator: CPU core, data bus, and memory-mapped devices.

pub mod bus;
pub mod cpu;
pub mod devices;

pub use bus::Bus;
pub use cpu::{Cpu, Flags};
pub use devices::{DeviceInfo, MmioDevice, SegmentState, SevenSegmentDevice};

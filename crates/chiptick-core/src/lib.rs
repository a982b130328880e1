//! GBS (Game Boy Sound) playback core.
//!
//! A GBS file carries a music driver and its data as a ROM image. This crate
//! runs the driver on an instruction-level CPU interpreter and synthesizes the
//! four sound channels it programs. Frontends (the command-line player) drive
//! it through the [`machine`] facade.

/// Sound channels and stereo mixer.
pub mod apu;

/// Lock-free ring buffer between the renderer and the audio device.
pub mod audio_queue;

/// SM83 instruction decoder and interpreter.
pub mod cpu;

/// GBS header parsing and ROM bank splitting.
pub mod gbs;

/// High-level facade that wires the CPU, memory and sound unit together.
pub mod machine;

/// Memory map, bank switching and I/O redirection.
pub mod mmu;

/// CPU register file.
pub mod registers;

/// Driver tick rate derived from the timer registers.
pub mod timer;

pub use gbs::{GbsError, GbsFile, GbsHeader};
pub use machine::{FrameOutcome, Machine, MachineConfig, SharedMachine};

//! Target initialization sequencer (C3): the fixed-order command
//! sequence that must run before SRAM access, register access, or
//! flash programming will succeed.

mod sequencer;

pub use sequencer::{
    initialize, run_sequence, ChipFamily, DetectedPart, InitStep, StepKind, SRAM_PRE_INIT,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Proto(#[from] bdm_proto::Error),
}

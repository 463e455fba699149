//! Gap-free sequences
//!
//! Used wherever several threads complete numbered work in nondeterministic
//! order while observers need a monotonic "everything up to here is done"
//! watermark, e.g. the applied log index published by the applier.

mod out_of_order;

pub use out_of_order::{GapFreeSnapshot, OutOfOrderSequence, SequenceError};

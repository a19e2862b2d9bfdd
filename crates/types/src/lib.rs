//! Normalized block/receipt/trace data model and storage key schema (spec
//! §3). This is the vocabulary every other crate in the workspace shares.

pub mod block;
pub mod hex_quantity;
pub mod keys;
pub mod normalized;
pub mod receipt;
pub mod trace;

pub use block::{Block, BlockHeader, Transaction};
pub use hex_quantity::HexU64;
pub use keys::DEFAULT_BATCH_SIZE;
pub use normalized::{AlignmentError, NormalizedBlock};
pub use receipt::{Log, Receipt};
pub use trace::{is_precompile_class_error, CallFrame, CallType, TraceResult};

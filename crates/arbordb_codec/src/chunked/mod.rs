//! Byte buffers that never allocate beyond a fixed chunk size.
//!
//! Large payloads (serialized tree candidates, snapshots) can reach sizes
//! where a single contiguous allocation is undesirable. The types here bound
//! every allocation by the configured maximum chunk size.
//!
//! ## Layout
//!
//! ```text
//! | chunk 0 (max) | chunk 1 (max) | ... | chunk N (<= max) |
//! ```
//!
//! ## Invariants
//!
//! - Every chunk except possibly the last is exactly `max_chunk_size` long
//! - The sum of chunk lengths equals the logical size
//! - A written buffer is sealed once, after which writes fail
//! - Readers are single-pass; open a new one from the array to read again

mod array;
mod reader;
mod writer;

pub use array::ChunkedByteArray;
pub use reader::ChunkedInputStream;
pub use writer::ChunkedOutputStream;

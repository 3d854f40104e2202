//! The precomputed chunked volume format.
//!
//! A volume is a directory holding an `info` JSON document and one
//! sub-directory of chunk files per scale:
//!
//! ```text
//! <path>/info
//! <path>/4_4_40/0-64_0-64_0-8
//! <path>/4_4_40/64-128_0-64_0-8.gz
//! <path>/8_8_40/...
//! ```
//!
//! - [`PrecomputedInfo`] / [`ScaleEntry`]: the metadata document
//! - [`InfoSpec`] / [`InfoExistsMode`]: declarative creation and
//!   reconciliation of documents
//! - [`ScaleVolume`]: region reads and writes over one scale's chunk grid

mod chunk;
mod error;
mod info;
mod info_spec;
mod volume;

pub use chunk::{chunk_name, decode_chunk, encode_chunk, read_chunk_file, write_chunk_file};
pub use error::{PrecomputedError, PrecomputedResult};
pub use info::{DataType, PrecomputedInfo, ScaleEntry, INFO_FILE_NAME, RAW_ENCODING};
pub use info_spec::{AddScalesMode, InfoExistsMode, InfoSpec};
pub use volume::ScaleVolume;

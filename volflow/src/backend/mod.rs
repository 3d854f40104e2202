//! Storage backends.
//!
//! A [`Backend`] reads and writes volumetric regions over its native chunk
//! grid. Three variants are provided:
//!
//! | Backend | Addressing | Notes |
//! |---|---|---|
//! | [`PrecomputedBackend`] | chunk grid from the info document | re-reads the document on every query; rejects partial-chunk writes by default |
//! | [`ArrayStoreBackend`] | one cached handle per `(path, resolution)` | handles live in a shared [`BackendCache`] |
//! | [`LayerSetBackend`] | named sub-layers | reads return a name-to-tensor map |

mod array_store;
mod cache;
mod error;
mod layer_set;
mod precomputed;
mod traits;

pub use array_store::ArrayStoreBackend;
pub use cache::{
    BackendCache, ScaleHandle, DEFAULT_BACKEND_CACHE_BYTES, DEFAULT_HANDLE_CACHE_BYTES,
};
pub use error::{is_transient_io, BackendError, BackendResult};
pub use layer_set::LayerSetBackend;
pub use precomputed::{BackendChanges, PrecomputedBackend};
pub use traits::Backend;

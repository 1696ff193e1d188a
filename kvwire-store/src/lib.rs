//! # kvwire Byte Stores
//!
//! Purpose: Thin typed wrappers that persist and fetch small byte blobs
//! through a shared `kvwire_client::Client`.
//!
//! - `ByteCache`: values with an optional expiry (`SET key value PX ms`).
//! - `ByteStore`: values without expiry.
//!
//! Both map an absent bulk reply to `Ok(None)` and propagate every other
//! client error unchanged.

mod cache;
mod store;

pub use cache::ByteCache;
pub use store::ByteStore;

use bytes::Bytes;
use kvwire_client::{ClientError, ClientResult, Reply};

// GET replies are either a bulk string or the nil bulk.
fn bulk_value(reply: Reply) -> ClientResult<Option<Bytes>> {
    match reply {
        Reply::Bulk(value) => Ok(value),
        other => Err(ClientError::Protocol(format!(
            "expected bulk reply to GET, got {:?}",
            other
        ))),
    }
}

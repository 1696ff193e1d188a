use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kvwire_client::{Arg, Client, ClientResult};

use crate::bulk_value;

/// Client-backed cache whose entries may carry an expiry.
#[derive(Debug, Clone)]
pub struct ByteCache {
    client: Arc<Client>,
}

impl ByteCache {
    pub fn new(client: Arc<Client>) -> Self {
        ByteCache { client }
    }

    /// Stores `value` for `ttl`. A zero `ttl` stores without expiry.
    ///
    /// The expiry is sent in whole milliseconds; sub-millisecond remainders
    /// are truncated, and a ttl below one millisecond is rounded up to one so
    /// it is not mistaken for "no expiry".
    pub fn store(&self, key: &str, value: &[u8], ttl: Duration) -> ClientResult<()> {
        let mut args: Vec<Arg<'_>> = vec!["SET".into(), key.into(), value.into()];
        if !ttl.is_zero() {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            args.push("PX".into());
            args.push(millis.into());
        }
        self.client.call(&args)?;
        Ok(())
    }

    /// Fetches a cached value. A missing or expired key is `Ok(None)`.
    pub fn get(&self, key: &str) -> ClientResult<Option<Bytes>> {
        bulk_value(self.client.call(&["GET".into(), key.into()])?)
    }
}

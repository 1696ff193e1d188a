use std::sync::Arc;

use bytes::Bytes;
use kvwire_client::{Client, ClientResult};

use crate::bulk_value;

/// Client-backed store for values that never expire.
#[derive(Debug, Clone)]
pub struct ByteStore {
    client: Arc<Client>,
}

impl ByteStore {
    pub fn new(client: Arc<Client>) -> Self {
        ByteStore { client }
    }

    /// Stores `value` under `key`.
    pub fn store(&self, key: &str, value: &[u8]) -> ClientResult<()> {
        self.client.call(&["SET".into(), key.into(), value.into()])?;
        Ok(())
    }

    /// Fetches a stored value. A missing key is `Ok(None)`.
    pub fn get(&self, key: &str) -> ClientResult<Option<Bytes>> {
        bulk_value(self.client.call(&["GET".into(), key.into()])?)
    }
}

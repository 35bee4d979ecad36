//! Bounded free-lists for the write path.
//!
//! Under sustained log traffic every `fire` call needs a scratch buffer and
//! a field map. Both are recycled through bounded free-lists so the hot
//! path does not allocate without bound; anything beyond the bound falls
//! back to the allocator.

use parking_lot::Mutex;

use crate::error::Result;
use crate::model::FieldMap;

/// Default number of pooled buffers and maps.
const DEFAULT_POOL_CAPACITY: usize = 64;

/// Free-lists shared by producers and the writer task.
///
/// Producers take a map and a buffer per record; the writer returns the
/// map once the record is committed (or dropped). Reuse order is
/// unspecified.
pub(crate) struct Pools {
    bufs: Mutex<Vec<Vec<u8>>>,
    maps: Mutex<Vec<FieldMap>>,
    capacity: usize,
}

impl Pools {
    pub(crate) fn new() -> Self {
        Self {
            bufs: Mutex::new(Vec::new()),
            maps: Mutex::new(Vec::new()),
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }

    fn take_buf(&self) -> Vec<u8> {
        self.bufs.lock().pop().unwrap_or_default()
    }

    fn put_buf(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut bufs = self.bufs.lock();
        if bufs.len() < self.capacity {
            bufs.push(buf);
        }
    }

    fn take_map(&self) -> FieldMap {
        self.maps.lock().pop().unwrap_or_default()
    }

    /// Returns a field map to the pool once its record has been committed
    /// or dropped.
    pub(crate) fn put_map(&self, mut map: FieldMap) {
        map.clear();
        let mut maps = self.maps.lock();
        if maps.len() < self.capacity {
            maps.push(map);
        }
    }

    /// Deep-copies a field map through a pooled scratch buffer.
    ///
    /// The copy goes through an encode/decode round trip, so the returned
    /// map shares nothing with the caller's map and can outlive it on the
    /// write queue.
    pub(crate) fn copy_fields(&self, fields: &FieldMap) -> Result<FieldMap> {
        let mut buf = self.take_buf();
        let result = self.copy_through(fields, &mut buf);
        self.put_buf(buf);
        result
    }

    fn copy_through(&self, fields: &FieldMap, buf: &mut Vec<u8>) -> Result<FieldMap> {
        serde_json::to_writer(&mut *buf, fields)?;
        let decoded: FieldMap = serde_json::from_slice(buf)?;
        let mut map = self.take_map();
        map.extend(decoded);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deep_copy_field_map() {
        // given
        let pools = Pools::new();
        let mut fields = FieldMap::new();
        fields.insert("org".to_string(), serde_json::json!(7));
        fields.insert("charge".to_string(), serde_json::json!(11.5));
        fields.insert("ok".to_string(), serde_json::json!(true));

        // when
        let copy = pools.copy_fields(&fields).unwrap();

        // then
        assert_eq!(copy, fields);
    }

    #[test]
    fn should_copy_empty_field_map() {
        // given
        let pools = Pools::new();

        // when
        let copy = pools.copy_fields(&FieldMap::new()).unwrap();

        // then
        assert!(copy.is_empty());
    }

    #[test]
    fn should_recycle_returned_maps() {
        // given
        let pools = Pools::new();
        let mut map = FieldMap::new();
        map.insert("k".to_string(), serde_json::json!(1));

        // when
        pools.put_map(map);
        let reused = pools.take_map();

        // then - recycled maps come back empty
        assert!(reused.is_empty());
        assert_eq!(pools.maps.lock().len(), 0);
    }

    #[test]
    fn should_bound_the_free_lists() {
        // given
        let pools = Pools::new();

        // when - return more maps than the pool capacity
        for _ in 0..DEFAULT_POOL_CAPACITY + 10 {
            pools.put_map(FieldMap::new());
        }

        // then
        assert_eq!(pools.maps.lock().len(), DEFAULT_POOL_CAPACITY);
    }
}

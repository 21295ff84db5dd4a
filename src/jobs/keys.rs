//! Key layout for the job keyspace.
//!
//! Partition structure:
//! - `jobs`: `job:{queue}:{id:020}` -> Job (JSON)
//! - `pending`: `pend:{queue}:{id:020}` -> empty (FIFO pickup index)
//! - `meta`: `last_id` -> u64 (big-endian, global across queues)
//!
//! Ids are zero-padded so lexicographic key order equals numeric id order,
//! which makes prefix iteration FIFO within a queue.

/// Encode a job key: `job:{queue}:{id:020}`.
pub fn job_key(queue: &str, id: u64) -> Vec<u8> {
    format!("job:{queue}:{id:020}").into_bytes()
}

/// Encode the job prefix for a queue: `job:{queue}:`.
pub fn job_prefix(queue: &str) -> Vec<u8> {
    format!("job:{queue}:").into_bytes()
}

/// Encode a pending-index key: `pend:{queue}:{id:020}`.
pub fn pending_key(queue: &str, id: u64) -> Vec<u8> {
    format!("pend:{queue}:{id:020}").into_bytes()
}

/// Encode the pending prefix for a queue: `pend:{queue}:`.
pub fn pending_prefix(queue: &str) -> Vec<u8> {
    format!("pend:{queue}:").into_bytes()
}

/// Decode the id from any key ending in `:{id:020}`.
pub fn decode_id(key: &[u8]) -> Option<u64> {
    let key = std::str::from_utf8(key).ok()?;
    key.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_encoding() {
        let key = job_key("ingest", 42);
        assert_eq!(key, b"job:ingest:00000000000000000042");
        assert_eq!(decode_id(&key), Some(42));
    }

    #[test]
    fn pending_key_encoding() {
        let key = pending_key("prune", 7);
        assert_eq!(key, b"pend:prune:00000000000000000007");
        assert_eq!(decode_id(&key), Some(7));
    }

    #[test]
    fn key_order_matches_id_order() {
        let low = job_key("ingest", 9);
        let high = job_key("ingest", 10);
        assert!(low < high);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_id(b"job:ingest:not-a-number"), None);
        assert_eq!(decode_id(&[0xff, 0xfe]), None);
    }
}

//! Third-party script storage shared between concurrently validating
//! scripts.
//!
//! The pool is a lossy cache: a miss falls back to the registered fetcher,
//! and the background service trims arbitrary entries when the map grows
//! past its limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

/// Default pool capacity; the serve loop shears back down to this.
pub const SIZE: usize = 1 << 14;

const CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// External byte-fetcher consulted on a cache miss.
pub type Fetcher = Box<dyn Fn(u32, u32, u16) -> Option<Vec<u8>> + Send + Sync>;

static POOL: Lazy<RwLock<HashMap<[u8; 10], Vec<u8>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static FETCHER: Lazy<RwLock<Option<Fetcher>>> = Lazy::new(|| RwLock::new(None));
static SERVING: AtomicBool = AtomicBool::new(false);

/// Builds the 10-byte script id from block height, transaction index and
/// script index.
pub fn key_id(h: u32, n: u32, i: u16) -> [u8; 10] {
    let mut id = [0u8; 10];
    id[..4].copy_from_slice(&h.to_be_bytes());
    id[4..8].copy_from_slice(&n.to_be_bytes());
    id[8..].copy_from_slice(&i.to_be_bytes());
    id
}

/// Returns the script at `(h, n, i)`, consulting the fetcher and caching
/// its result on a miss.
pub fn get(h: u32, n: u32, i: u16) -> Option<Vec<u8>> {
    let k = key_id(h, n, i);
    if let Some(code) = POOL.read().get(&k) {
        return Some(code.clone());
    }
    let code = FETCHER.read().as_ref().and_then(|f| f(h, n, i))?;
    POOL.write().insert(k, code.clone());
    Some(code)
}

/// Stores a script directly, bypassing the fetcher.
pub fn insert(h: u32, n: u32, i: u16, code: Vec<u8>) {
    POOL.write().insert(key_id(h, n, i), code);
}

/// Installs the external fetcher used on cache misses.
pub fn set_fetcher(f: Fetcher) {
    *FETCHER.write() = Some(f);
}

/// Starts the once-per-process background service that keeps the pool at
/// or below `limit` entries. A zero limit means the default capacity.
pub fn serve(limit: usize) {
    if SERVING.swap(true, Ordering::SeqCst) {
        debug!("script pool service is already running");
        return;
    }
    let limit = if limit == 0 { SIZE } else { limit };
    thread::spawn(move || loop {
        thread::sleep(CHECK_INTERVAL);
        shear(limit);
    });
}

// Removes whatever exceeds `max`, in map iteration order. Correctness does
// not depend on which entries survive: a future miss refetches.
fn shear(max: usize) {
    let mut pool = POOL.write();
    let len = pool.len();
    if len <= max {
        return;
    }
    debug!(len, max, "shearing script pool");
    let mut kept = 0usize;
    pool.retain(|_, _| {
        kept += 1;
        kept <= max
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        insert(900_001, 2, 3, vec![1, 2, 3]);
        assert_eq!(get(900_001, 2, 3), Some(vec![1, 2, 3]));
    }

    #[test]
    fn miss_without_fetcher_is_none() {
        assert_eq!(get(u32::MAX, u32::MAX, u16::MAX), None);
    }

    #[test]
    fn key_layout_is_big_endian_4_4_2() {
        let k = key_id(1, 2, 3);
        assert_eq!(k, [0, 0, 0, 1, 0, 0, 0, 2, 0, 3]);
    }

    #[test]
    fn shear_trims_to_limit() {
        for i in 0..64u16 {
            insert(777_000, 77, i, vec![i as u8]);
        }
        shear(8);
        assert!(POOL.read().len() <= 8);
    }
}

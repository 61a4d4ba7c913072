//! Pool Arena (per-channel bump allocator) and Pool Table (fixed-width
//! open-hash directory keyed by `channel % POOL_TABLE_SIZE`), grounded
//! on `amqp_connection.c`'s `init_amqp_pool`/`amqp_pool_alloc_bytes`/
//! `amqp_pool_recycle` page-chain allocator.
//!
//! An arena never frees individual allocations; it only grows (new
//! page appended when the current one is exhausted) or resets wholesale
//! via [`Pool::recycle`], which drops every page but the first.

use amqp_wire_util::{WireError, WireResult};

/// Default page size for a channel's decode arena. Chosen to comfortably
/// hold the properties block plus header bytes of most frames without
/// forcing a second page allocation.
pub const CHANNEL_ARENA_PAGE_SIZE: usize = 131_072;
/// Number of buckets in the Pool Table's open-hash directory.
pub const POOL_TABLE_SIZE: usize = 64;

struct Page {
    buf: Vec<u8>,
    used: usize,
}

impl Page {
    /// Fallibly allocates a zeroed page. Uses `try_reserve_exact` rather
    /// than `vec![0u8; capacity]` so an allocation failure surfaces as
    /// `WireError::NoMemory` instead of aborting the process — per
    /// spec.md §4.1, `get_or_create` "may fail with NO_MEMORY".
    fn try_new(capacity: usize) -> WireResult<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|_| WireError::NoMemory)?;
        buf.resize(capacity, 0);
        Ok(Self { buf, used: 0 })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }
}

/// A single channel's bump-allocated arena: a chain of pages, each
/// handed out to callers as contiguous byte ranges that stay valid
/// until the next [`Pool::recycle`] or [`Pool::empty`].
pub struct Pool {
    page_size: usize,
    pages: Vec<Page>,
}

impl Pool {
    /// Grounded on `init_amqp_pool`: allocates nothing up front, just
    /// records the page size new pages should use. The first page is
    /// allocated lazily by the first call to [`Pool::alloc_bytes`], so
    /// every allocation failure in this arena's lifetime — including
    /// the very first one — surfaces through the same fallible path
    /// rather than a separate infallible constructor.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self { page_size, pages: Vec::new() }
    }

    /// Bump-allocates `size` contiguous bytes, returning the
    /// `(page_index, offset)` pair needed to recover the slice later
    /// via [`Pool::slice`]/[`Pool::slice_mut`] without holding a
    /// borrow across calls. Growing the arena with a fresh page can
    /// fail with `NoMemory`, per spec.md §4.1.
    pub fn alloc_bytes(&mut self, size: usize) -> WireResult<(usize, usize)> {
        if size == 0 {
            return Err(WireError::InvalidParameter);
        }
        let needs_new_page = self.pages.last().is_none_or(|p| p.remaining() < size);
        if needs_new_page {
            let capacity = size.max(self.page_size);
            self.pages.push(Page::try_new(capacity)?);
        }
        let index = self.pages.len() - 1;
        let page = &mut self.pages[index];
        let offset = page.used;
        page.used += size;
        Ok((index, offset))
    }

    #[must_use]
    pub fn slice(&self, page_index: usize, offset: usize, len: usize) -> &[u8] {
        &self.pages[page_index].buf[offset..offset + len]
    }

    pub fn slice_mut(&mut self, page_index: usize, offset: usize, len: usize) -> &mut [u8] {
        &mut self.pages[page_index].buf[offset..offset + len]
    }

    /// Drops every page but the first and resets its bump offset,
    /// keeping one page's worth of storage warm for the next frame.
    pub fn recycle(&mut self) {
        self.pages.truncate(1);
        if let Some(first) = self.pages.first_mut() {
            first.used = 0;
        }
    }

    /// Drops every page, including the first. Used when a channel is
    /// closed and its arena will not be reused.
    pub fn empty(&mut self) {
        self.pages.clear();
    }
}

struct PoolEntry {
    channel: u16,
    arena: Pool,
    next: Option<Box<PoolEntry>>,
}

/// Fixed-width open-hash directory mapping `channel_id` to its [`Pool`].
/// Collisions chain within a bucket; the table itself never grows.
pub struct PoolTable {
    buckets: [Option<Box<PoolEntry>>; POOL_TABLE_SIZE],
}

impl PoolTable {
    #[must_use]
    pub fn new() -> Self {
        Self { buckets: std::array::from_fn(|_| None) }
    }

    const fn bucket_index(channel: u16) -> usize {
        channel as usize % POOL_TABLE_SIZE
    }

    #[must_use]
    pub fn get_pool(&self, channel: u16) -> Option<&Pool> {
        let mut cur = self.buckets[Self::bucket_index(channel)].as_deref();
        while let Some(entry) = cur {
            if entry.channel == channel {
                return Some(&entry.arena);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    pub fn get_pool_mut(&mut self, channel: u16) -> Option<&mut Pool> {
        let mut cur = self.buckets[Self::bucket_index(channel)].as_deref_mut();
        while let Some(entry) = cur {
            if entry.channel == channel {
                return Some(&mut entry.arena);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    /// Returns the channel's arena, creating a fresh one on first use.
    /// The bucket entry itself (a small, fixed-size struct) is assumed
    /// to allocate; the arena's actual page storage is lazy (see
    /// [`Pool::new`]) and fails through [`Pool::alloc_bytes`] instead,
    /// which is the NO_MEMORY path spec.md §4.1 is describing.
    pub fn get_or_create(&mut self, channel: u16) -> &mut Pool {
        let idx = Self::bucket_index(channel);
        let mut cur = &mut self.buckets[idx];
        loop {
            match cur {
                Some(entry) if entry.channel == channel => return &mut entry.arena,
                Some(entry) => cur = &mut entry.next,
                None => break,
            }
        }
        *cur = Some(Box::new(PoolEntry {
            channel,
            arena: Pool::new(CHANNEL_ARENA_PAGE_SIZE),
            next: None,
        }));
        &mut cur.as_mut().unwrap().arena
    }

    /// Recycles every channel's arena except those named in `keep`,
    /// used by `release_buffers`/`maybe_release_buffers` to avoid
    /// reclaiming storage still referenced by queued-but-unsent frames.
    pub fn recycle_all_except(&mut self, keep: &[u16]) {
        for bucket in &mut self.buckets {
            let mut cur = bucket.as_deref_mut();
            while let Some(entry) = cur {
                if !keep.contains(&entry.channel) {
                    entry.arena.recycle();
                }
                cur = entry.next.as_deref_mut();
            }
        }
    }

    /// Drops a channel's arena entirely (the channel has closed).
    pub fn remove(&mut self, channel: u16) {
        let idx = Self::bucket_index(channel);
        let mut cur = &mut self.buckets[idx];
        loop {
            match cur {
                Some(entry) if entry.channel == channel => {
                    *cur = entry.next.take();
                    return;
                }
                Some(entry) => cur = &mut entry.next,
                None => return,
            }
        }
    }
}

impl Default for PoolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_allocates_no_page_until_first_alloc() {
        let pool = Pool::new(64);
        assert!(pool.pages.is_empty());
    }

    #[test]
    fn zero_size_alloc_is_rejected() {
        let mut pool = Pool::new(64);
        assert_eq!(pool.alloc_bytes(0).unwrap_err(), WireError::InvalidParameter);
    }

    #[test]
    fn alloc_bumps_within_a_page() {
        let mut pool = Pool::new(64);
        let (p0, o0) = pool.alloc_bytes(16).unwrap();
        let (p1, o1) = pool.alloc_bytes(16).unwrap();
        assert_eq!((p0, p1), (0, 0));
        assert_eq!((o0, o1), (0, 16));
    }

    #[test]
    fn alloc_larger_than_page_gets_its_own_page() {
        let mut pool = Pool::new(16);
        let (p0, _) = pool.alloc_bytes(8).unwrap();
        let (p1, o1) = pool.alloc_bytes(64).unwrap();
        assert_eq!(p0, 0);
        assert_eq!(p1, 1);
        assert_eq!(o1, 0);
        assert_eq!(pool.slice(p1, o1, 64).len(), 64);
    }

    #[test]
    fn recycle_keeps_first_page_drops_rest() {
        let mut pool = Pool::new(16);
        pool.alloc_bytes(8).unwrap();
        pool.alloc_bytes(64).unwrap();
        assert_eq!(pool.pages.len(), 2);
        pool.recycle();
        assert_eq!(pool.pages.len(), 1);
        assert_eq!(pool.pages[0].used, 0);
    }

    #[test]
    fn table_get_or_create_is_idempotent() {
        let mut table = PoolTable::new();
        table.get_or_create(5).alloc_bytes(4).unwrap();
        assert!(table.get_pool(5).is_some());
        assert!(table.get_pool(69).is_none()); // 69 % 64 == 5, different channel
        table.get_or_create(5).alloc_bytes(4).unwrap();
        assert_eq!(table.get_pool(5).unwrap().pages[0].used, 8);
    }

    #[test]
    fn recycle_all_except_preserves_named_channels() {
        let mut table = PoolTable::new();
        table.get_or_create(1).alloc_bytes(64).unwrap();
        table.get_or_create(2).alloc_bytes(64).unwrap();
        table.recycle_all_except(&[2]);
        assert_eq!(table.get_pool(1).unwrap().pages[0].used, 0);
        assert_eq!(table.get_pool(2).unwrap().pages[0].used, 64);
    }
}

//! Memory-mapped slot table shared between processes
//!
//! Layout: a 64-byte header followed by `capacity` fixed-size slots.
//!
//! ```text
//! header: magic u64 | version u32 | capacity u32 | slot_size u32 | pad
//! slot:   state u32 | key_len u16 | blob_len u16 | value u64 | key ++ blob
//! ```
//!
//! A slot moves `EMPTY -> WRITING -> READY`, and `READY -> TOMBSTONE` on
//! flush. The `EMPTY -> WRITING` CAS is the add-if-absent primitive: only the
//! winner writes the key bytes, then publishes them with a release store of
//! `READY`. Key and blob bytes never change while a slot is `READY`.
//! Writers reclaim tombstones with a `TOMBSTONE -> WRITING` CAS, so flushed
//! slots return to service; lookups probe past tombstones.

use memmap2::MmapMut;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::storage::error::StorageError;

pub(crate) const HEADER_SIZE: usize = 64;
pub(crate) const SLOT_SIZE: usize = 1024;
const SLOT_HEADER_SIZE: usize = 16;
/// Bytes available for key plus blob in one slot
pub const MAX_PAYLOAD: usize = SLOT_SIZE - SLOT_HEADER_SIZE;

const SEGMENT_MAGIC: u64 = 0x4D41_5355_5345_4731; // "MASUSEG1"
const SEGMENT_VERSION: u32 = 1;

const EMPTY: u32 = 0;
const WRITING: u32 = 1;
const READY: u32 = 2;
const TOMBSTONE: u32 = 3;

/// Spins allowed while waiting for another writer to publish a slot
const PUBLISH_SPIN_LIMIT: u32 = 1_000_000;

/// Result of an add-if-absent lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim {
    pub slot: usize,
    pub inserted: bool,
}

/// Owned copy of a published slot, taken during collection
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub key: String,
    pub blob: Vec<u8>,
    pub value: u64,
}

/// A fixed-capacity hash table inside a memory-mapped file
pub struct Segment {
    _mmap: MmapMut,
    base: *mut u8,
    capacity: usize,
    path: PathBuf,
}

// SAFETY: all shared mutation goes through atomics or through slots owned
// exclusively after winning the EMPTY -> WRITING CAS.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

struct Slot<'a> {
    ptr: *mut u8,
    _segment: PhantomData<&'a Segment>,
}

impl<'a> Slot<'a> {
    fn state(&self) -> &'a AtomicU32 {
        // SAFETY: slots are 8-byte aligned inside a page-aligned mapping.
        unsafe { &*(self.ptr as *const AtomicU32) }
    }

    fn value(&self) -> &'a AtomicU64 {
        unsafe { &*(self.ptr.add(8) as *const AtomicU64) }
    }

    fn lengths(&self) -> (usize, usize) {
        let (key_len, blob_len) = unsafe {
            (
                (self.ptr.add(4) as *const u16).read_unaligned() as usize,
                (self.ptr.add(6) as *const u16).read_unaligned() as usize,
            )
        };
        // Clamp so a corrupt header can never read past the slot.
        let key_len = key_len.min(MAX_PAYLOAD);
        (key_len, blob_len.min(MAX_PAYLOAD - key_len))
    }

    /// Only valid once the slot is READY or TOMBSTONE
    fn key(&self) -> &'a [u8] {
        let (key_len, _) = self.lengths();
        unsafe { std::slice::from_raw_parts(self.ptr.add(SLOT_HEADER_SIZE), key_len) }
    }

    fn blob(&self) -> &'a [u8] {
        let (key_len, blob_len) = self.lengths();
        unsafe {
            std::slice::from_raw_parts(self.ptr.add(SLOT_HEADER_SIZE + key_len), blob_len)
        }
    }

    /// Caller must hold the slot in WRITING state
    unsafe fn write_payload(&self, key: &[u8], blob: &[u8], initial: u64) {
        (self.ptr.add(4) as *mut u16).write_unaligned(key.len() as u16);
        (self.ptr.add(6) as *mut u16).write_unaligned(blob.len() as u16);
        let data = self.ptr.add(SLOT_HEADER_SIZE);
        std::ptr::copy_nonoverlapping(key.as_ptr(), data, key.len());
        std::ptr::copy_nonoverlapping(blob.as_ptr(), data.add(key.len()), blob.len());
        self.value().store(initial, Ordering::Relaxed);
    }
}

fn slot_hash(key: &[u8]) -> u64 {
    let digest = Sha256::digest(key);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

impl Segment {
    /// Opens the segment file at `path`, creating it with `capacity` slots
    /// when it does not exist yet. An existing segment keeps its own capacity.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(StorageError::Configuration(format!(
                "segment capacity must be between 1 and {}, got {}",
                u32::MAX,
                capacity
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let wanted_len = (HEADER_SIZE + capacity * SLOT_SIZE) as u64;
        let current_len = file.metadata()?.len();
        if current_len == 0 {
            file.set_len(wanted_len)?;
        }

        // SAFETY: the file stays open for the mapping's lifetime; other
        // processes only touch it through the same slot protocol.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < HEADER_SIZE + SLOT_SIZE {
            return Err(StorageError::Configuration(format!(
                "segment file {} is too small ({} bytes)",
                path.display(),
                mmap.len()
            )));
        }
        let base = mmap.as_mut_ptr();

        let magic = unsafe { &*(base as *const AtomicU64) };
        let capacity = if magic.load(Ordering::Acquire) == SEGMENT_MAGIC {
            let version = unsafe { (base.add(8) as *const u32).read() };
            let stored_capacity = unsafe { (base.add(12) as *const u32).read() } as usize;
            let slot_size = unsafe { (base.add(16) as *const u32).read() } as usize;
            if version != SEGMENT_VERSION || slot_size != SLOT_SIZE {
                return Err(StorageError::Configuration(format!(
                    "segment {} has version {} / slot size {}, expected {} / {}",
                    path.display(),
                    version,
                    slot_size,
                    SEGMENT_VERSION,
                    SLOT_SIZE
                )));
            }
            if HEADER_SIZE + stored_capacity * SLOT_SIZE > mmap.len() {
                return Err(StorageError::Configuration(format!(
                    "segment {} declares {} slots but is only {} bytes",
                    path.display(),
                    stored_capacity,
                    mmap.len()
                )));
            }
            if stored_capacity != capacity {
                tracing::warn!(
                    path = %path.display(),
                    requested = capacity,
                    actual = stored_capacity,
                    "Existing segment has a different capacity, keeping it"
                );
            }
            stored_capacity
        } else {
            if mmap.len() as u64 != wanted_len {
                return Err(StorageError::Configuration(format!(
                    "segment {} is {} bytes without a valid header",
                    path.display(),
                    mmap.len()
                )));
            }
            // Concurrent initializers write identical values.
            unsafe {
                (base.add(8) as *mut u32).write(SEGMENT_VERSION);
                (base.add(12) as *mut u32).write(capacity as u32);
                (base.add(16) as *mut u32).write(SLOT_SIZE as u32);
            }
            magic.store(SEGMENT_MAGIC, Ordering::Release);
            tracing::info!(path = %path.display(), capacity, "Initialized shared metrics segment");
            capacity
        };

        Ok(Self {
            _mmap: mmap,
            base,
            capacity,
            path: path.to_path_buf(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot(&self, index: usize) -> Slot<'_> {
        debug_assert!(index < self.capacity);
        Slot {
            ptr: unsafe { self.base.add(HEADER_SIZE + index * SLOT_SIZE) },
            _segment: PhantomData,
        }
    }

    fn wait_published(&self, index: usize) -> Result<u32, StorageError> {
        let state = self.slot(index).state();
        let mut spins = 0u32;
        loop {
            let current = state.load(Ordering::Acquire);
            if current != WRITING {
                return Ok(current);
            }
            spins += 1;
            if spins >= PUBLISH_SPIN_LIMIT {
                return Err(StorageError::Backend(format!(
                    "slot {} in {} never finished publishing",
                    index,
                    self.path.display()
                )));
            }
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Finds `key` or atomically inserts it with `blob` and `initial` value.
    /// The first tombstone on the probe path is reused before a fresh slot.
    pub fn get_or_insert(
        &self,
        key: &str,
        blob: &[u8],
        initial: u64,
    ) -> Result<SlotClaim, StorageError> {
        let key = key.as_bytes();
        let len = key.len() + blob.len();
        if len > MAX_PAYLOAD {
            return Err(StorageError::EntryTooLarge {
                len,
                max: MAX_PAYLOAD,
            });
        }

        let start = (slot_hash(key) % self.capacity as u64) as usize;
        'probe: loop {
            let mut reusable: Option<(usize, usize)> = None;
            for probe in 0..self.capacity {
                let index = (start + probe) % self.capacity;
                let slot = self.slot(index);
                let mut state = slot.state().load(Ordering::Acquire);

                if state == EMPTY {
                    if reusable.is_some() {
                        break;
                    }
                    match slot.state().compare_exchange(
                        EMPTY,
                        WRITING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            // SAFETY: we own the slot until READY is published.
                            unsafe { slot.write_payload(key, blob, initial) };
                            slot.state().store(READY, Ordering::Release);
                            return Ok(SlotClaim {
                                slot: index,
                                inserted: true,
                            });
                        }
                        Err(observed) => state = observed,
                    }
                }

                if state == WRITING {
                    state = self.wait_published(index)?;
                }

                if state == TOMBSTONE {
                    if reusable.is_none() {
                        reusable = Some((probe, index));
                    }
                } else if state == READY && slot.key() == key {
                    return Ok(SlotClaim {
                        slot: index,
                        inserted: false,
                    });
                }
            }

            let Some((probe, index)) = reusable else {
                return Err(StorageError::SegmentFull {
                    capacity: self.capacity,
                });
            };
            let slot = self.slot(index);
            if slot
                .state()
                .compare_exchange(TOMBSTONE, WRITING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another writer took the tombstone first.
                continue 'probe;
            }
            // SAFETY: we own the slot until it is published or released.
            unsafe { slot.write_payload(key, blob, initial) };

            // A concurrent writer may have placed the same key further along.
            if let Some(existing) = self.find_after(key, start, probe)? {
                slot.state().store(TOMBSTONE, Ordering::Release);
                return Ok(SlotClaim {
                    slot: existing,
                    inserted: false,
                });
            }
            slot.state().store(READY, Ordering::Release);
            return Ok(SlotClaim {
                slot: index,
                inserted: true,
            });
        }
    }

    /// Continues a probe for `key` past position `after` until an empty slot
    fn find_after(
        &self,
        key: &[u8],
        start: usize,
        after: usize,
    ) -> Result<Option<usize>, StorageError> {
        for probe in after + 1..self.capacity {
            let index = (start + probe) % self.capacity;
            let slot = self.slot(index);
            let mut state = slot.state().load(Ordering::Acquire);
            if state == EMPTY {
                return Ok(None);
            }
            if state == WRITING {
                state = self.wait_published(index)?;
            }
            if state == READY && slot.key() == key {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Looks up a published slot by key without inserting
    pub fn find(&self, key: &str) -> Result<Option<usize>, StorageError> {
        let key = key.as_bytes();
        let start = (slot_hash(key) % self.capacity as u64) as usize;
        for probe in 0..self.capacity {
            let index = (start + probe) % self.capacity;
            let slot = self.slot(index);
            let mut state = slot.state().load(Ordering::Acquire);
            if state == EMPTY {
                return Ok(None);
            }
            if state == WRITING {
                state = self.wait_published(index)?;
            }
            if state == READY && slot.key() == key {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    pub fn value(&self, index: usize) -> &AtomicU64 {
        self.slot(index).value()
    }

    pub fn blob(&self, index: usize) -> &[u8] {
        self.slot(index).blob()
    }

    /// Copies every published slot whose key starts with `prefix`
    pub fn snapshot(&self, prefix: &str) -> Vec<SlotSnapshot> {
        let mut entries = Vec::new();
        for index in 0..self.capacity {
            let slot = self.slot(index);
            if slot.state().load(Ordering::Acquire) != READY {
                continue;
            }
            let key = slot.key();
            if !key.starts_with(prefix.as_bytes()) {
                continue;
            }
            match std::str::from_utf8(key) {
                Ok(key) => entries.push(SlotSnapshot {
                    key: key.to_string(),
                    blob: slot.blob().to_vec(),
                    value: slot.value().load(Ordering::Acquire),
                }),
                Err(_) => tracing::warn!(slot = index, "Skipping slot with non UTF-8 key"),
            }
        }
        entries
    }

    /// Tombstones every published slot whose key starts with `prefix`
    pub fn tombstone_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for index in 0..self.capacity {
            let slot = self.slot(index);
            if slot.state().load(Ordering::Acquire) != READY {
                continue;
            }
            if !slot.key().starts_with(prefix.as_bytes()) {
                continue;
            }
            if slot
                .state()
                .compare_exchange(READY, TOMBSTONE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Number of slots that are published or tombstoned
    pub fn used_slots(&self) -> usize {
        (0..self.capacity)
            .filter(|index| self.slot(*index).state().load(Ordering::Acquire) != EMPTY)
            .count()
    }
}

/// Adds `delta` to an `f64` stored as raw bits, retrying on CAS failure.
/// Returns the number of failed attempts.
pub fn fetch_add_f64(atomic: &AtomicU64, delta: f64) -> u64 {
    let mut retries = 0;
    let mut current = atomic.load(Ordering::Acquire);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match atomic.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return retries,
            Err(observed) => {
                retries += 1;
                tracing::trace!(retries, "CAS contention on float update");
                current = observed;
            }
        }
    }
}

//! Fixed-capacity Robin Hood hash table over byte keys and values.

use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::bucket_store::BucketLayout;
use crate::bucket_store::BucketStore;
use crate::bucket_store::SlotState;
use crate::capacity::CapacityPlan;
use crate::error::Error;
use crate::error::Result;
#[cfg(any(feature = "std", feature = "foldhash"))]
use crate::hasher::DefaultKeyHasher;
use crate::hasher::KeyHasher;
use crate::stats::ProbeStats;

/// A displacement made by an in-flight put, replayed backwards if the put
/// runs out of probe budget.
#[derive(Clone, Copy, Debug)]
struct Swap {
    index: usize,
    resident: u32,
    distance: u32,
}

/// A fixed-capacity hash table using Robin Hood open addressing with
/// quadratic probing.
///
/// Keys and values are fixed-size byte strings chosen at construction. The
/// table never grows: it is planned once from an expected element count and a
/// load factor, and refuses new keys once its live count reaches the
/// high-water mark.
///
/// Quadratic probing only reaches part of the slots from a given hash, so a
/// small table may refuse a new key with [`Error::ProbeSequenceExhausted`]
/// before its live count reaches the high-water mark.
///
/// ## Memory Layout
///
/// Entries are packed into large buckets of 8 slots, each bucket led by a
/// 2-byte bitmap holding a 2-bit state per slot. Probe distances are not
/// stored; they are recovered by re-hashing the resident key when needed.
///
/// ## Example
///
/// ```rust
/// # use rhh_funnel::RobinHoodTable;
/// #
/// let mut table = RobinHoodTable::new(100, 0.8, 4, 8).unwrap();
/// table.put(b"key1", &42u64.to_le_bytes()).unwrap();
///
/// assert_eq!(table.get(b"key1"), Some(&42u64.to_le_bytes()[..]));
/// assert_eq!(table.get(b"key2"), None);
/// ```
pub struct RobinHoodTable<H> {
    store: BucketStore,
    plan: CapacityPlan,
    hasher: H,

    len: u64,
    tombstones: u64,
    longest_probes: u32,
    stats: ProbeStats,

    scratch: Vec<u8>,
    swaps: Vec<Swap>,
}

impl<H> Debug for RobinHoodTable<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RobinHoodTable")
            .field("len", &self.len)
            .field("tombstones", &self.tombstones)
            .field("capacity", &self.plan.slots())
            .field("high_water_mark", &self.plan.high_water_mark())
            .field("key_size", &self.store.layout().key_size())
            .field("value_size", &self.store.layout().value_size())
            .field("longest_probes", &self.longest_probes)
            .finish()
    }
}

#[cfg(any(feature = "std", feature = "foldhash"))]
impl RobinHoodTable<DefaultKeyHasher> {
    /// Creates a table for `expected` entries at `load_factor`, hashing keys
    /// with the [`DefaultKeyHasher`].
    ///
    /// See [`with_hasher`](RobinHoodTable::with_hasher) for the failure modes.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not inside `(0.0, 1.0)`.
    pub fn new(
        expected: u64,
        load_factor: f64,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self> {
        Self::with_hasher(
            expected,
            load_factor,
            key_size,
            value_size,
            DefaultKeyHasher::default(),
        )
    }
}

impl<H: KeyHasher> RobinHoodTable<H> {
    /// Creates a table for `expected` entries at `load_factor` using the given
    /// key hasher.
    ///
    /// The capacity is `expected / load_factor` rounded up to 16 steps per
    /// octave (at least 8 slots), and the high-water mark is
    /// `floor(capacity * load_factor)`.
    ///
    /// # Errors
    ///
    /// - [`Error::ZeroKeySize`] if `key_size` is 0.
    /// - [`Error::LayoutOverflow`] if the buffer size does not fit in memory.
    /// - [`Error::Alloc`] if the allocator cannot supply the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not inside `(0.0, 1.0)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rhh_funnel::RobinHoodTable;
    /// #
    /// let hasher = |key: &[u8]| u64::from_le_bytes(key.try_into().unwrap());
    /// let table = RobinHoodTable::with_hasher(1000, 0.8, 8, 8, hasher).unwrap();
    /// assert_eq!(table.capacity(), 1280);
    /// assert_eq!(table.high_water_mark(), 1024);
    /// ```
    pub fn with_hasher(
        expected: u64,
        load_factor: f64,
        key_size: usize,
        value_size: usize,
        hasher: H,
    ) -> Result<Self> {
        let plan = CapacityPlan::new(expected, load_factor);
        if key_size == 0 {
            return Err(Error::ZeroKeySize);
        }

        let layout = BucketLayout::new(plan.slots(), key_size, value_size)?;
        let store = BucketStore::allocate(layout)?;
        log::info!(
            "alloc size {} ({} slots in {} buckets, high-water mark {})",
            layout.bytes(),
            layout.slots(),
            layout.buckets(),
            plan.high_water_mark(),
        );

        Ok(Self {
            store,
            plan,
            hasher,
            len: 0,
            tombstones: 0,
            longest_probes: 0,
            stats: ProbeStats::default(),
            scratch: Vec::with_capacity(layout.entry_size()),
            swaps: Vec::new(),
        })
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.store.layout().slots()
    }

    /// Returns the live count at which new keys are refused.
    pub fn high_water_mark(&self) -> usize {
        self.plan.high_water_mark() as usize
    }

    /// Returns the fixed key size in bytes.
    pub fn key_size(&self) -> usize {
        self.store.layout().key_size()
    }

    /// Returns the fixed value size in bytes.
    pub fn value_size(&self) -> usize {
        self.store.layout().value_size()
    }

    /// Longest probe distance ever used. Lookups never probe further.
    pub fn longest_probes(&self) -> u32 {
        self.longest_probes
    }

    /// Size of the bucket buffer in bytes.
    pub fn allocated_bytes(&self) -> usize {
        self.store.layout().bytes()
    }

    /// Returns the capacity plan the table was built from.
    pub fn plan(&self) -> CapacityPlan {
        self.plan
    }

    /// Returns the key hasher.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Returns the probe distance histogram.
    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Logs the probe distance histogram at `info` level, one line per
    /// populated distance, in the format of its `Display` output.
    pub fn print_stats(&self) {
        for line in self.stats.to_string().lines() {
            log::info!("{line}");
        }
    }

    /// Inserts `value` under `key`, or overwrites the value if `key` is
    /// already live.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKeySize`] / [`Error::InvalidValueSize`] if a span
    ///   does not match the table's sizes.
    /// - [`Error::CapacityExhausted`] if `key` is new and the live count is at
    ///   the high-water mark.
    /// - [`Error::ProbeSequenceExhausted`] if no reachable slot could be
    ///   freed for the key.
    ///
    /// The table is left unmodified on every error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rhh_funnel::Error;
    /// # use rhh_funnel::RobinHoodTable;
    /// #
    /// let hasher = |key: &[u8]| u64::from(key[0]) * 2;
    /// let mut table = RobinHoodTable::with_hasher(6, 0.8, 1, 1, hasher).unwrap();
    /// for (i, key) in (b'a'..=b'f').enumerate() {
    ///     table.put(&[key], &[i as u8]).unwrap();
    /// }
    /// table.put(b"a", b"x").unwrap();
    /// assert_eq!(table.get(b"a"), Some(&b"x"[..]));
    /// assert_eq!(table.put(b"g", b"0"), Err(Error::CapacityExhausted));
    /// ```
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        let hash = self.hasher.hash_key(key);
        self.put_hashed(hash, key, value)
    }

    /// Looks up the value stored under `key`.
    ///
    /// A key of the wrong size is never present and yields `None`.
    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        if key.len() != self.key_size() {
            return None;
        }
        let hash = self.hasher.hash_key(key);
        self.get_hashed(hash, key)
    }

    /// Looks up the value stored under `key` for in-place modification.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut [u8]> {
        if key.len() != self.key_size() {
            return None;
        }
        let hash = self.hasher.hash_key(key);
        let (index, _) = self.locate(hash, key)?;
        Some(self.store.value_mut(index))
    }

    /// Returns `true` if `key` is live in the table.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Returns the probe step at which a lookup finds `key`, or `None` if the
    /// key is absent. Never exceeds [`longest_probes`](Self::longest_probes).
    pub fn probe_count(&self, key: &[u8]) -> Option<u32> {
        if key.len() != self.key_size() {
            return None;
        }
        let hash = self.hasher.hash_key(key);
        self.locate(hash, key).map(|(_, probe)| probe)
    }

    /// Removes `key`, leaving a tombstone in its slot. Returns `true` if the
    /// key was live.
    ///
    /// The slot is reclaimed by a later put; searches continue past it.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        if key.len() != self.key_size() {
            return false;
        }
        let hash = self.hasher.hash_key(key);
        let Some((index, _)) = self.locate(hash, key) else {
            return false;
        };

        let distance = self.first_probe_to(hash, index, self.longest_probes);
        self.stats.forget(distance.unwrap_or(0));
        self.store.set_state(index, SlotState::Tombstone);
        self.len -= 1;
        self.tombstones += 1;
        true
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() == self.key_size() {
            Ok(())
        } else {
            Err(Error::InvalidKeySize {
                expected: self.key_size(),
                actual: key.len(),
            })
        }
    }

    pub(crate) fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() == self.value_size() {
            Ok(())
        } else {
            Err(Error::InvalidValueSize {
                expected: self.value_size(),
                actual: value.len(),
            })
        }
    }

    #[inline(always)]
    pub(crate) fn hash_key(&self, key: &[u8]) -> u64 {
        self.hasher.hash_key(key)
    }

    /// Slot tried first for `hash`.
    #[inline(always)]
    pub(crate) fn home_index(&self, hash: u64) -> usize {
        self.probe_index(hash, 0)
    }

    #[inline(always)]
    pub(crate) fn prefetch_home(&self, hash: u64) {
        self.store.prefetch(self.home_index(hash));
    }

    /// Quadratic probe in hash space, then fast reduction onto the slots.
    #[inline(always)]
    fn probe_index(&self, hash: u64, probe: u32) -> usize {
        let step = u64::from(probe);
        let probed = hash.wrapping_add(step.wrapping_mul(step).wrapping_mul(2));
        self.plan.reduce(probed) as usize
    }

    /// Smallest probe step in `0..=bound` at which `hash` lands on `index`.
    #[inline]
    fn first_probe_to(&self, hash: u64, index: usize, bound: u32) -> Option<u32> {
        (0..=bound).find(|&probe| self.probe_index(hash, probe) == index)
    }

    /// Recovers the probe distance of the live entry at `index` by re-hashing
    /// its key and replaying the probe sequence. Distances are never stored
    /// per slot, so this is the only way to learn them.
    ///
    /// Every live entry was placed within `longest_probes` steps, so a `None`
    /// means the table or the hasher is inconsistent.
    fn find_probe(&self, index: usize) -> Option<u32> {
        let hash = self.hasher.hash_key(self.store.key(index));
        self.first_probe_to(hash, index, self.longest_probes)
    }

    /// Returns the slot and probe step holding `key`.
    ///
    /// An empty slot ends the search: entries are only ever placed after every
    /// earlier step of their sequence was taken, and slots never return to
    /// empty.
    #[inline]
    fn locate(&self, hash: u64, key: &[u8]) -> Option<(usize, u32)> {
        if self.len == 0 {
            return None;
        }

        for probe in 0..=self.longest_probes {
            let index = self.probe_index(hash, probe);
            match self.store.state(index) {
                SlotState::Empty => return None,
                SlotState::Tombstone => continue,
                SlotState::Live => {
                    if self.store.key(index) == key {
                        return Some((index, probe));
                    }
                }
            }
        }

        None
    }

    #[inline]
    pub(crate) fn get_hashed(&self, hash: u64, key: &[u8]) -> Option<&[u8]> {
        self.locate(hash, key)
            .map(|(index, _)| self.store.value(index))
    }

    /// Upsert with a precomputed hash. `key` and `value` must already match
    /// the table's sizes.
    pub(crate) fn put_hashed(&mut self, hash: u64, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some((index, _)) = self.locate(hash, key) {
            self.store.value_mut(index).copy_from_slice(value);
            return Ok(());
        }

        // Checked before the probe loop touches anything.
        if self.len >= self.plan.high_water_mark() {
            return Err(Error::CapacityExhausted);
        }

        let mut candidate = core::mem::take(&mut self.scratch);
        candidate.clear();
        candidate.extend_from_slice(key);
        candidate.extend_from_slice(value);

        let result = self.insert_new(hash, &mut candidate);
        self.scratch = candidate;
        result
    }

    /// Robin Hood insertion of an entry known not to be live in the table.
    fn insert_new(&mut self, hash: u64, candidate: &mut [u8]) -> Result<()> {
        let key_size = self.key_size();
        let mut hash = hash;
        let mut probe: u32 = 0;
        let longest_probes = self.longest_probes;
        self.swaps.clear();

        for _ in 0..self.plan.probe_budget() {
            let index = self.probe_index(hash, probe);
            let state = self.store.state(index);

            if state != SlotState::Live {
                if state == SlotState::Tombstone {
                    self.tombstones -= 1;
                }
                self.store.entry_mut(index).copy_from_slice(candidate);
                self.store.set_state(index, SlotState::Live);
                self.longest_probes = self.longest_probes.max(probe);
                let distance = self.first_probe_to(hash, index, probe).unwrap_or(probe);
                self.stats.record(distance);
                self.len += 1;
                return Ok(());
            }

            debug_assert_ne!(self.store.key(index), &candidate[..key_size]);

            let resident = self.find_probe(index).unwrap_or_else(|| {
                log::error!("Didn't find any matching probe for slot {index}");
                0
            });

            // Sequences revisit slots, so both sides use their smallest step
            // onto this slot.
            let distance = if probe > resident {
                self.first_probe_to(hash, index, probe).unwrap_or(probe)
            } else {
                probe
            };

            if distance > resident {
                self.swaps.push(Swap {
                    index,
                    resident,
                    distance,
                });
                self.stats.forget(resident);
                self.stats.record(distance);
                self.longest_probes = self.longest_probes.max(probe);

                self.store.swap(index, candidate);
                hash = self.hasher.hash_key(&candidate[..key_size]);
                probe = resident;
            }
            probe += 1;
        }

        while let Some(swap) = self.swaps.pop() {
            self.store.swap(swap.index, candidate);
            self.stats.forget(swap.distance);
            self.stats.record(swap.resident);
        }
        self.longest_probes = longest_probes;

        log::warn!(
            "No free slot reachable after {} probe steps ({} of {} slots live)",
            self.plan.probe_budget(),
            self.len,
            self.capacity(),
        );
        Err(Error::ProbeSequenceExhausted)
    }
}

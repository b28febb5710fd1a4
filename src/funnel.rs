//! Batched access to a [`RobinHoodTable`].
//!
//! A [`Funnel`] buffers point inserts and lookups per partition, a run of
//! `partition_size` consecutive home slots, and applies them partition by
//! partition. Operations that land in the same region of the bucket store are
//! then applied back to back, which keeps the working set of a drain small
//! once the table no longer fits in cache.
//!
//! Buffered operations are not visible until drained. A partition whose
//! buffer would grow past `slot_size` bytes is drained on the spot; everything
//! else waits for [`Funnel::insert_flush`] or [`Funnel::get_flush`].

use alloc::vec::Vec;

use crate::error::Error;
use crate::error::Result;
use crate::hasher::KeyHasher;
use crate::robin_hood::RobinHoodTable;

/// Default byte budget of a partition buffer.
pub const DEFAULT_SLOT_SIZE: usize = 1 << 12;

/// Default number of home slots per partition.
pub const DEFAULT_PARTITION_SIZE: usize = 1 << 12;

const HASH_BYTES: usize = size_of::<u64>();

/// Buffer sizing for a [`Funnel`].
///
/// ```rust
/// # use rhh_funnel::FunnelConfig;
/// let config = FunnelConfig::default()
///     .with_slot_size(1 << 16)
///     .with_partition_size(0);
/// assert_eq!(config.slot_size(), 1 << 16);
/// assert_eq!(config.partition_size(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunnelConfig {
    slot_size: usize,
    partition_size: usize,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            slot_size: DEFAULT_SLOT_SIZE,
            partition_size: DEFAULT_PARTITION_SIZE,
        }
    }
}

impl FunnelConfig {
    /// Sets how many bytes of buffered operations a partition holds before it
    /// is drained early. Clamped to at least 1.
    pub fn with_slot_size(mut self, bytes: usize) -> Self {
        self.slot_size = bytes.max(1);
        self
    }

    /// Sets how many consecutive home slots share a partition. Clamped to at
    /// least 1.
    pub fn with_partition_size(mut self, slots: usize) -> Self {
        self.partition_size = slots.max(1);
        self
    }

    /// Byte budget of a partition buffer.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Home slots per partition.
    pub fn partition_size(&self) -> usize {
        self.partition_size
    }
}

/// Receives the outcome of each buffered lookup when it is drained.
///
/// Implemented for every `FnMut(&[u8], Option<&[u8]>, C)` closure. The key
/// is the one passed to [`Funnel::get`], the value is `None` on a miss, and
/// the context is handed back unchanged.
pub trait LookupCallback<C> {
    /// Called exactly once per drained lookup.
    fn on_lookup(&mut self, key: &[u8], value: Option<&[u8]>, context: C);
}

impl<C, F> LookupCallback<C> for F
where
    F: FnMut(&[u8], Option<&[u8]>, C),
{
    #[inline(always)]
    fn on_lookup(&mut self, key: &[u8], value: Option<&[u8]>, context: C) {
        self(key, value, context)
    }
}

/// Callback type of a funnel built without one.
pub type NoCallback = fn(&[u8], Option<&[u8]>, ());

/// Fixed-stride records plus their precomputed hashes.
#[derive(Default)]
struct Records {
    hashes: Vec<u64>,
    bytes: Vec<u8>,
}

impl Records {
    fn size(&self) -> usize {
        self.hashes.len() * HASH_BYTES + self.bytes.len()
    }

    fn push(&mut self, hash: u64, parts: &[&[u8]]) {
        self.hashes.push(hash);
        for part in parts {
            self.bytes.extend_from_slice(part);
        }
    }

    fn clear(&mut self) {
        self.hashes.clear();
        self.bytes.clear();
    }
}

struct Partition<C> {
    inserts: Records,
    lookups: Records,
    contexts: Vec<C>,
}

impl<C> Default for Partition<C> {
    fn default() -> Self {
        Self {
            inserts: Records::default(),
            lookups: Records::default(),
            contexts: Vec::new(),
        }
    }
}

/// Applies buffered inserts in order, returning how many the table refused.
fn drain_inserts<H: KeyHasher>(table: &mut RobinHoodTable<H>, records: &mut Records) -> usize {
    let key_size = table.key_size();
    let entry_size = key_size + table.value_size();
    let mut rejected = 0;

    for (i, (&hash, entry)) in records
        .hashes
        .iter()
        .zip(records.bytes.chunks_exact(entry_size))
        .enumerate()
    {
        if let Some(&next) = records.hashes.get(i + 1) {
            table.prefetch_home(next);
        }

        let (key, value) = entry.split_at(key_size);
        if let Err(err) = table.put_hashed(hash, key, value) {
            log::warn!("Funnel insert rejected: {err}");
            rejected += 1;
        }
    }

    records.clear();
    rejected
}

/// Resolves buffered lookups in order, handing each result to `callback`.
fn drain_lookups<H: KeyHasher, C, F: LookupCallback<C>>(
    table: &RobinHoodTable<H>,
    callback: Option<&mut F>,
    records: &mut Records,
    contexts: &mut Vec<C>,
) {
    let key_size = table.key_size();

    let Some(callback) = callback else {
        records.clear();
        contexts.clear();
        return;
    };

    for (i, ((&hash, key), context)) in records
        .hashes
        .iter()
        .zip(records.bytes.chunks_exact(key_size))
        .zip(contexts.drain(..))
        .enumerate()
    {
        if let Some(&next) = records.hashes.get(i + 1) {
            table.prefetch_home(next);
        }
        callback.on_lookup(key, table.get_hashed(hash, key), context);
    }

    records.clear();
}

/// Batching front end over a borrowed [`RobinHoodTable`].
///
/// Inserts and lookups are hashed once, routed to the partition of their home
/// slot, and buffered. They take effect when their partition is drained:
///
/// - [`insert_flush`](Funnel::insert_flush) applies every buffered insert.
///   Inserts of the same key resolve last-write-wins, since a key always
///   routes to the same partition and a partition drains in buffered order.
/// - [`get_flush`](Funnel::get_flush) resolves every buffered lookup and calls
///   the callback once per lookup.
///
/// A lookup only observes inserts that were drained before it.
///
/// ## Example
///
/// ```rust
/// # use rhh_funnel::Funnel;
/// # use rhh_funnel::FunnelConfig;
/// # use rhh_funnel::RobinHoodTable;
/// #
/// let mut table = RobinHoodTable::new(1000, 0.8, 8, 8).unwrap();
///
/// let mut funnel = Funnel::new(&mut table, FunnelConfig::default());
/// for k in 0..100u64 {
///     funnel.insert(&k.to_le_bytes(), &(k * 10).to_le_bytes()).unwrap();
/// }
/// funnel.insert_flush().unwrap();
/// drop(funnel);
///
/// let mut sum = 0;
/// let mut funnel = Funnel::with_callback(
///     &mut table,
///     |_key: &[u8], value: Option<&[u8]>, _context: ()| {
///         if let Some(value) = value {
///             sum += u64::from_le_bytes(value.try_into().unwrap());
///         }
///     },
///     FunnelConfig::default(),
/// );
/// for k in 0..100u64 {
///     funnel.get(&k.to_le_bytes(), ()).unwrap();
/// }
/// funnel.get_flush();
/// drop(funnel);
///
/// assert_eq!(sum, 49_500);
/// ```
pub struct Funnel<'t, H, C = (), F = NoCallback> {
    table: &'t mut RobinHoodTable<H>,
    callback: Option<F>,
    config: FunnelConfig,
    partitions: Vec<Partition<C>>,

    pending_inserts: usize,
    pending_lookups: usize,
    rejected: usize,
}

impl<'t, H: KeyHasher> Funnel<'t, H> {
    /// Creates a funnel without a lookup callback. Lookups through it are
    /// buffered and then discarded unresolved.
    pub fn new(table: &'t mut RobinHoodTable<H>, config: FunnelConfig) -> Self {
        Self::build(table, None, config)
    }
}

impl<'t, H: KeyHasher, C, F: LookupCallback<C>> Funnel<'t, H, C, F> {
    /// Creates a funnel that reports every drained lookup to `callback`.
    pub fn with_callback(table: &'t mut RobinHoodTable<H>, callback: F, config: FunnelConfig) -> Self {
        Self::build(table, Some(callback), config)
    }

    fn build(table: &'t mut RobinHoodTable<H>, callback: Option<F>, config: FunnelConfig) -> Self {
        let count = table.capacity().div_ceil(config.partition_size).max(1);
        let mut partitions = Vec::with_capacity(count);
        partitions.resize_with(count, Partition::default);
        log::debug!(
            "Funnel over {} slots: {count} partitions of {} slots, {} byte buffers",
            table.capacity(),
            config.partition_size,
            config.slot_size,
        );

        Self {
            table,
            callback,
            config,
            partitions,
            pending_inserts: 0,
            pending_lookups: 0,
            rejected: 0,
        }
    }

    /// Returns the table the funnel feeds.
    pub fn table(&self) -> &RobinHoodTable<H> {
        self.table
    }

    /// Returns the funnel's buffer sizing.
    pub fn config(&self) -> FunnelConfig {
        self.config
    }

    /// Number of buffered inserts not yet applied.
    pub fn pending_inserts(&self) -> usize {
        self.pending_inserts
    }

    /// Number of buffered lookups not yet resolved.
    pub fn pending_lookups(&self) -> usize {
        self.pending_lookups
    }

    #[inline]
    fn partition_of(&self, hash: u64) -> usize {
        self.table.home_index(hash) / self.config.partition_size
    }

    /// Buffers an upsert of `value` under `key`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKeySize`] / [`Error::InvalidValueSize`] if a span does
    /// not match the table's sizes. Nothing is buffered in that case.
    ///
    /// Refusals by the table are not reported here; they are counted and
    /// returned by the next [`insert_flush`](Funnel::insert_flush).
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.check_key(key)?;
        self.table.check_value(value)?;

        let hash = self.table.hash_key(key);
        let index = self.partition_of(hash);
        let record_size = HASH_BYTES + key.len() + value.len();
        let partition = &mut self.partitions[index];

        partition.inserts.push(hash, &[key, value]);
        self.pending_inserts += 1;

        if partition.inserts.size() + record_size > self.config.slot_size {
            self.pending_inserts -= partition.inserts.hashes.len();
            log::debug!(
                "Draining {} inserts of full partition {index}",
                partition.inserts.hashes.len()
            );
            self.rejected += drain_inserts(self.table, &mut partition.inserts);
        }
        Ok(())
    }

    /// Buffers a lookup of `key`. `context` is handed back to the callback
    /// together with the result.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKeySize`] if `key` does not match the table's key size.
    /// Nothing is buffered and the callback is not called in that case.
    pub fn get(&mut self, key: &[u8], context: C) -> Result<()> {
        self.table.check_key(key)?;

        let hash = self.table.hash_key(key);
        let index = self.partition_of(hash);
        let record_size = HASH_BYTES + key.len();
        let partition = &mut self.partitions[index];

        partition.lookups.push(hash, &[key]);
        partition.contexts.push(context);
        self.pending_lookups += 1;

        if partition.lookups.size() + record_size > self.config.slot_size {
            self.pending_lookups -= partition.lookups.hashes.len();
            log::debug!(
                "Draining {} lookups of full partition {index}",
                partition.lookups.hashes.len()
            );
            drain_lookups(
                self.table,
                self.callback.as_mut(),
                &mut partition.lookups,
                &mut partition.contexts,
            );
        }
        Ok(())
    }

    /// Applies every buffered insert, partition by partition in ascending
    /// slot order.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] with the number of inserts the table refused since
    /// the previous flush, including those refused by early drains. All other
    /// inserts were applied.
    pub fn insert_flush(&mut self) -> Result<()> {
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            if partition.inserts.hashes.is_empty() {
                continue;
            }
            log::debug!(
                "Draining {} inserts of partition {index}",
                partition.inserts.hashes.len()
            );
            self.rejected += drain_inserts(self.table, &mut partition.inserts);
        }
        self.pending_inserts = 0;

        match core::mem::take(&mut self.rejected) {
            0 => Ok(()),
            count => Err(Error::Rejected { count }),
        }
    }

    /// Resolves every buffered lookup, partition by partition in ascending
    /// slot order, calling the callback once for each.
    pub fn get_flush(&mut self) {
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            if partition.lookups.hashes.is_empty() {
                continue;
            }
            log::debug!(
                "Draining {} lookups of partition {index}",
                partition.lookups.hashes.len()
            );
            drain_lookups(
                self.table,
                self.callback.as_mut(),
                &mut partition.lookups,
                &mut partition.contexts,
            );
        }
        self.pending_lookups = 0;
    }

    /// Releases the funnel's buffers. The table stays alive and usable.
    ///
    /// Buffered operations that were never flushed are discarded.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<H, C, F> Drop for Funnel<'_, H, C, F> {
    fn drop(&mut self) {
        if self.pending_inserts > 0 || self.pending_lookups > 0 {
            log::warn!(
                "Funnel dropped with {} inserts and {} lookups never flushed",
                self.pending_inserts,
                self.pending_lookups
            );
        }
    }
}

impl<H, C, F> core::fmt::Debug for Funnel<'_, H, C, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Funnel")
            .field("config", &self.config)
            .field("partitions", &self.partitions.len())
            .field("pending_inserts", &self.pending_inserts)
            .field("pending_lookups", &self.pending_lookups)
            .field("rejected", &self.rejected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use siphasher::sip::SipHasher;
    use test_log::test;

    use super::*;

    fn sip(key: &[u8]) -> u64 {
        let mut h = SipHasher::new_with_keys(0x0123_4567, 0x89ab_cdef);
        h.write(key);
        h.finish()
    }

    fn letter_hasher(key: &[u8]) -> u64 {
        u64::from(key[0]) * 2
    }

    fn key(k: u64) -> [u8; 8] {
        k.to_le_bytes()
    }

    fn table(expected: u64) -> RobinHoodTable<fn(&[u8]) -> u64> {
        RobinHoodTable::with_hasher(expected, 0.5, 8, 8, sip as fn(&[u8]) -> u64).unwrap()
    }

    #[test]
    fn config_defaults_and_clamping() {
        let config = FunnelConfig::default();
        assert_eq!(config.slot_size(), 4096);
        assert_eq!(config.partition_size(), 4096);

        let config = config.with_slot_size(0).with_partition_size(0);
        assert_eq!(config.slot_size(), 1);
        assert_eq!(config.partition_size(), 1);
    }

    #[test]
    fn flushed_inserts_are_seen_exactly_once() {
        let mut table = table(2000);
        // Large buffers, so nothing drains before the flush.
        let config = FunnelConfig::default().with_slot_size(1 << 20);
        let mut funnel = Funnel::new(&mut table, config);
        for k in 0..1000 {
            funnel.insert(&key(k), &key(k * 3)).unwrap();
        }
        assert_eq!(funnel.pending_inserts(), 1000);
        assert!(funnel.table().is_empty());
        funnel.insert_flush().unwrap();
        assert_eq!(funnel.pending_inserts(), 0);
        funnel.destroy();
        assert_eq!(table.len(), 1000);

        let mut seen = vec![0u32; 1100];
        let mut values = vec![None; 1100];
        let mut funnel = Funnel::with_callback(
            &mut table,
            |k: &[u8], value: Option<&[u8]>, context: usize| {
                assert_eq!(k, &key(context as u64));
                seen[context] += 1;
                values[context] = value.map(<[u8]>::to_vec);
            },
            config,
        );
        for k in 0..1100 {
            funnel.get(&key(k as u64), k).unwrap();
        }
        assert_eq!(funnel.pending_lookups(), 1100);
        funnel.get_flush();
        assert_eq!(funnel.pending_lookups(), 0);
        funnel.get_flush();
        drop(funnel);

        assert!(seen.iter().all(|&count| count == 1));
        for (k, value) in values.iter().enumerate() {
            let expected = (k < 1000).then(|| key(k as u64 * 3).to_vec());
            assert_eq!(value, &expected, "key {k}");
        }
    }

    #[test]
    fn last_write_wins_within_a_batch() {
        let mut table = table(64);
        let mut funnel = Funnel::new(&mut table, FunnelConfig::default());
        funnel.insert(&key(7), &key(1)).unwrap();
        funnel.insert(&key(8), &key(0)).unwrap();
        funnel.insert(&key(7), &key(2)).unwrap();
        funnel.insert(&key(7), &key(3)).unwrap();
        funnel.insert_flush().unwrap();
        drop(funnel);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key(7)), Some(&key(3)[..]));
    }

    #[test]
    fn full_partition_drains_early() {
        let mut table = table(64);
        let config = FunnelConfig::default().with_slot_size(1);
        let mut funnel = Funnel::new(&mut table, config);
        funnel.insert(&key(5), &key(50)).unwrap();
        assert_eq!(funnel.pending_inserts(), 0);
        assert_eq!(funnel.table().get(&key(5)), Some(&key(50)[..]));
        funnel.insert_flush().unwrap();
        drop(funnel);

        let mut delivered = Vec::new();
        let mut funnel = Funnel::with_callback(
            &mut table,
            |_: &[u8], value: Option<&[u8]>, context: u8| {
                delivered.push((context, value.map(<[u8]>::to_vec)));
            },
            config,
        );
        funnel.get(&key(5), 1).unwrap();
        funnel.get(&key(6), 2).unwrap();
        assert_eq!(funnel.pending_lookups(), 0);
        funnel.get_flush();
        drop(funnel);

        assert_eq!(delivered, vec![(1, Some(key(50).to_vec())), (2, None)]);
    }

    #[test]
    fn lookups_drain_in_partition_order() {
        let mut table = table(1000);
        let partition_size = 64;
        let homes: Vec<usize> = (0..500u64)
            .map(|k| table.home_index(sip(&key(k))) / partition_size)
            .collect();

        let mut order = Vec::new();
        let mut funnel = Funnel::with_callback(
            &mut table,
            |_: &[u8], _: Option<&[u8]>, context: usize| order.push(context),
            FunnelConfig::default().with_partition_size(partition_size),
        );
        for k in 0..500u64 {
            funnel.get(&key(k), k as usize).unwrap();
        }
        funnel.get_flush();
        drop(funnel);

        assert_eq!(order.len(), 500);
        for pair in order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(
                (homes[a], a) < (homes[b], b),
                "{a} (partition {}) before {b} (partition {})",
                homes[a],
                homes[b]
            );
        }
    }

    #[test]
    fn refused_inserts_are_counted() {
        let mut table = RobinHoodTable::with_hasher(6, 0.8, 1, 1, letter_hasher).unwrap();
        let mut funnel = Funnel::new(&mut table, FunnelConfig::default());
        for (order, letter) in (b'a'..=b'h').enumerate() {
            funnel.insert(&[letter], &[order as u8]).unwrap();
        }
        assert_eq!(funnel.insert_flush(), Err(Error::Rejected { count: 2 }));
        // The count is reset once reported.
        assert_eq!(funnel.insert_flush(), Ok(()));
        drop(funnel);

        assert_eq!(table.len(), 6);
        for (order, letter) in (b'a'..=b'f').enumerate() {
            assert_eq!(table.get(&[letter]), Some(&[order as u8][..]));
        }
        assert_eq!(table.get(b"g"), None);
    }

    #[test]
    fn wrong_sizes_are_not_buffered() {
        let mut table = table(64);
        let mut calls = 0;
        let mut funnel = Funnel::with_callback(
            &mut table,
            |_: &[u8], _: Option<&[u8]>, _: ()| calls += 1,
            FunnelConfig::default(),
        );
        assert_eq!(
            funnel.insert(b"short", &key(0)),
            Err(Error::InvalidKeySize {
                expected: 8,
                actual: 5
            })
        );
        assert_eq!(
            funnel.insert(&key(0), b"short"),
            Err(Error::InvalidValueSize {
                expected: 8,
                actual: 5
            })
        );
        assert!(funnel.get(b"short", ()).is_err());
        assert_eq!(funnel.pending_inserts(), 0);
        assert_eq!(funnel.pending_lookups(), 0);
        funnel.get_flush();
        drop(funnel);
        assert_eq!(calls, 0);
    }

    #[test]
    fn lookups_without_callback_are_discarded() {
        let mut table = table(64);
        table.put(&key(1), &key(2)).unwrap();
        let mut funnel = Funnel::new(&mut table, FunnelConfig::default());
        funnel.get(&key(1), ()).unwrap();
        funnel.get_flush();
        assert_eq!(funnel.pending_lookups(), 0);
    }

    #[test]
    fn unflushed_funnel_leaves_table_untouched() {
        let mut table = table(64);
        let mut funnel = Funnel::new(&mut table, FunnelConfig::default());
        funnel.insert(&key(1), &key(2)).unwrap();
        let debug = alloc::format!("{funnel:?}");
        assert!(debug.contains("pending_inserts: 1"), "{debug}");
        funnel.destroy();

        assert!(table.is_empty());
        table.put(&key(3), &key(4)).unwrap();
        assert_eq!(table.len(), 1);
    }
}

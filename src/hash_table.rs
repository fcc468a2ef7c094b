//! The raw open-addressing table behind [`HashMap`](crate::HashMap).

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::Error;
use crate::metadata;
use crate::metadata::Category;
use crate::metadata::DELETED;
use crate::metadata::EMPTY;
use crate::metadata::Mode;
use crate::metadata::Rider;

/// log2 of the slot count of a freshly allocated table.
const MIN_LOG_CAPACITY: u32 = 1;

/// Smallest log capacity whose table holds `entries` live values while
/// keeping at least half of its slots empty.
fn log_capacity_for(entries: usize) -> Result<u32, Error> {
    let slots = entries
        .checked_mul(2)
        .and_then(usize::checked_next_power_of_two)
        .ok_or(Error::CapacityOverflow)?;
    Ok(slots.trailing_zeros().max(MIN_LOG_CAPACITY))
}

#[cold]
#[inline(never)]
fn allocation_failed(error: Error) -> ! {
    match error {
        Error::AllocationFailure { layout } => handle_alloc_error(layout),
        _ => panic!("capacity overflow"),
    }
}

/// Placement of the metadata array and the slot array inside one allocation.
#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    slots_offset: usize,
}

impl DataLayout {
    fn new<V>(capacity: usize) -> Result<Self, Error> {
        let metadata_layout = Layout::array::<u8>(capacity).map_err(|_| Error::CapacityOverflow)?;
        let slots_layout =
            Layout::array::<MaybeUninit<V>>(capacity).map_err(|_| Error::CapacityOverflow)?;

        let (layout, slots_offset) = metadata_layout
            .extend(slots_layout)
            .map_err(|_| Error::CapacityOverflow)?;

        Ok(DataLayout {
            layout,
            slots_offset,
        })
    }

    fn unallocated() -> Self {
        DataLayout {
            layout: Layout::new::<()>(),
            slots_offset: 0,
        }
    }
}

/// Allocates the arrays for `2^log_capacity` slots with every metadata byte
/// set to [`EMPTY`].
fn allocate<V>(log_capacity: u32) -> Result<(DataLayout, NonNull<u8>), Error> {
    let capacity = 1usize
        .checked_shl(log_capacity)
        .ok_or(Error::CapacityOverflow)?;
    let layout = DataLayout::new::<V>(capacity)?;

    // SAFETY: The layout holds at least one metadata byte, so its size is
    // non-zero.
    let raw_alloc = unsafe { alloc::alloc::alloc(layout.layout) };
    let Some(ptr) = NonNull::new(raw_alloc) else {
        return Err(Error::AllocationFailure {
            layout: layout.layout,
        });
    };

    // SAFETY: The first `capacity` bytes of the fresh allocation are the
    // metadata array.
    unsafe { core::ptr::write_bytes(ptr.as_ptr(), EMPTY, capacity) };

    Ok((layout, ptr))
}

/// An open-addressing hash table using linear probing over per-slot
/// fingerprint metadata.
///
/// `HashTable<V>` stores values of type `V`. Like the raw table of most map
/// crates it does not hash anything itself: every operation takes the value's
/// precomputed hash and an equality predicate, and operations that may
/// rehash also take a `hasher` closure that recomputes the hash of a stored
/// value.
///
/// ## Layout
///
/// One allocation holds `2^L` metadata bytes followed by `2^L` slots. A
/// metadata byte is [`EMPTY`], [`DELETED`], or a 7-bit fingerprint of the
/// stored value's hash (see [`metadata`](crate::metadata)). Removal writes a
/// tombstone; tombstones are only reclaimed by insertion into the same slot
/// or by a rehash.
///
/// ## Load factor
///
/// - After an insertion at most half of the slots are non-empty. Probes for a
///   key stop at the first empty slot, so this bound is what makes lookups
///   terminate.
/// - After a removal at least one eighth of the slots are live, unless the
///   table is at its minimum size of two slots.
///
/// ## Example
///
/// ```rust
/// # use core::hash::BuildHasher;
/// # use rider_hash::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # struct Sip;
/// # impl BuildHasher for Sip {
/// #     type Hasher = SipHasher;
/// #     fn build_hasher(&self) -> SipHasher {
/// #         SipHasher::new()
/// #     }
/// # }
/// #
/// let state = Sip;
/// let hasher = |v: &(u64, &str)| state.hash_one(v.0);
///
/// let mut table: HashTable<(u64, &str)> = HashTable::new();
/// table
///     .entry(state.hash_one(7u64), |v| v.0 == 7, hasher)
///     .or_insert((7, "seven"));
///
/// assert_eq!(table.find(state.hash_one(7u64), |v| v.0 == 7), Some(&(7, "seven")));
/// assert_eq!(table.remove(state.hash_one(7u64), |v| v.0 == 7, hasher), Some((7, "seven")));
/// assert!(table.is_empty());
/// ```
pub struct HashTable<V> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    /// log2 of the slot count, or 0 when the table holds no allocation.
    log_capacity: u32,
    populated: usize,
    /// Non-empty metadata bytes: live entries plus tombstones.
    fill: usize,

    _phantom: PhantomData<V>,
}

// SAFETY: The table owns its values exactly like a `Vec<V>` does.
unsafe impl<V: Send> Send for HashTable<V> {}
// SAFETY: Shared access only ever hands out `&V`.
unsafe impl<V: Sync> Sync for HashTable<V> {}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;
        use alloc::vec::Vec;

        // SAFETY: The metadata slice is valid for the table's capacity.
        let metadata = unsafe { self.metadata_ptr().as_ref() };
        let rows = metadata
            .chunks(16)
            .map(|row| {
                row.iter()
                    .map(|&byte| match byte {
                        EMPTY => String::from(".."),
                        DELETED => String::from("xx"),
                        tag => format!("{tag:02x}"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>();

        f.debug_struct("HashTable")
            .field("metadata", &rows)
            .field("populated", &self.populated)
            .field("fill", &self.fill)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<V> Clone for HashTable<V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        if self.log_capacity == 0 {
            return Self::unallocated();
        }

        let mut table = Self::with_log_capacity(self.log_capacity);
        // SAFETY: The new table has the same capacity as `self` and is empty.
        unsafe { table.clone_entries_from(self) };
        table
    }

    fn clone_from(&mut self, source: &Self) {
        if self.log_capacity != source.log_capacity || source.log_capacity == 0 {
            *self = source.clone();
            return;
        }

        self.drop_entries();
        // SAFETY: Capacities match and `drop_entries` left `self` empty.
        unsafe { self.clone_entries_from(source) };
    }
}

impl<V> Drop for HashTable<V> {
    fn drop(&mut self) {
        // SAFETY: Only slots whose metadata holds a fingerprint are dropped, and
        // those are initialized.
        unsafe {
            if core::mem::needs_drop::<V>() && self.populated > 0 {
                let slots = self.slots_ptr().as_mut();
                for (index, &byte) in self.metadata_ptr().as_ref().iter().enumerate() {
                    if metadata::is_full(byte) {
                        slots.get_unchecked_mut(index).assume_init_drop();
                    }
                }
            }

            self.deallocate();
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    /// Creates an empty table with the minimum capacity of two slots.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<u32> = HashTable::new();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 2);
    /// ```
    pub fn new() -> Self {
        Self::with_log_capacity(MIN_LOG_CAPACITY)
    }

    /// Creates an empty table with `2^log_capacity` slots.
    ///
    /// Values below the minimum of one are raised to it.
    ///
    /// # Panics
    ///
    /// Panics if the slot count overflows the address space.
    pub fn with_log_capacity(log_capacity: u32) -> Self {
        let log_capacity = log_capacity.max(MIN_LOG_CAPACITY);
        let (layout, alloc) = allocate::<V>(log_capacity).unwrap_or_else(|e| allocation_failed(e));

        Self {
            layout,
            alloc,
            log_capacity,
            populated: 0,
            fill: 0,
            _phantom: PhantomData,
        }
    }

    /// Creates an empty table that holds at least `capacity` values without
    /// growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<u32> = HashTable::with_capacity(100);
    /// assert_eq!(table.capacity(), 256);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_log_capacity(log_capacity_for(capacity).unwrap_or_else(|e| allocation_failed(e)))
    }

    /// A table without an allocation. Lookups miss, iteration is empty, and
    /// the next insertion allocates the minimum capacity.
    fn unallocated() -> Self {
        Self {
            layout: DataLayout::unallocated(),
            alloc: NonNull::dangling(),
            log_capacity: 0,
            populated: 0,
            fill: 0,
            _phantom: PhantomData,
        }
    }

    /// Frees the allocation without dropping any value.
    ///
    /// # Safety
    ///
    /// The table must not be used afterwards except to be forgotten or
    /// overwritten.
    unsafe fn deallocate(&self) {
        if self.layout.layout.size() != 0 {
            // SAFETY: `alloc` was returned by the global allocator for this layout.
            unsafe { alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout) };
        }
    }

    fn metadata_ptr(&self) -> NonNull<[u8]> {
        NonNull::slice_from_raw_parts(self.alloc, self.capacity())
    }

    fn slots_ptr(&self) -> NonNull<[MaybeUninit<V>]> {
        if self.log_capacity == 0 {
            return NonNull::slice_from_raw_parts(NonNull::dangling(), 0);
        }

        // SAFETY: `slots_offset` lies within the allocation, which is properly
        // sized for `capacity` slots.
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.slots_offset).cast(),
                self.capacity(),
            )
        }
    }

    /// Returns the number of values in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no values.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of slots. Always a power of two, and zero only
    /// after [`destroy`](HashTable::destroy) or [`take`](HashTable::take).
    pub fn capacity(&self) -> usize {
        if self.log_capacity == 0 {
            0
        } else {
            1 << self.log_capacity
        }
    }

    /// Returns log2 of the slot count.
    pub fn log_capacity(&self) -> u32 {
        self.log_capacity
    }

    /// Returns the number of non-empty slots: live values plus tombstones.
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Finds a value by hash and equality predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// table.entry(42, |&v: &u64| v == 42, |&v| v).or_insert(42);
    ///
    /// assert_eq!(table.find(42, |&v| v == 42), Some(&42));
    /// assert_eq!(table.find(99, |&v| v == 99), None);
    /// ```
    #[inline]
    pub fn find(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns slots holding a fingerprint.
        Some(unsafe { self.slots_ptr().as_ref().get_unchecked(index).assume_init_ref() })
    }

    /// Finds a value by hash and equality predicate, returning a mutable
    /// reference.
    ///
    /// The caller must not change the value in a way that changes its hash.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&mut V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns slots holding a fingerprint.
        Some(unsafe {
            self.slots_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .assume_init_mut()
        })
    }

    /// Returns an iterator positioned at the matching value, or [`end`] if no
    /// value matches.
    ///
    /// The iterator continues from the matching slot towards the end of the
    /// slot array.
    ///
    /// [`end`]: HashTable::end
    pub fn find_iter(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Iter<'_, V> {
        match self.find_index(hash, eq) {
            Some(index) => Iter::new(self, index, false),
            None => self.end(),
        }
    }

    #[inline]
    fn find_index(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<usize> {
        if self.populated == 0 {
            return None;
        }

        // SAFETY: The table is allocated since it holds values.
        let (metadata, slots) = unsafe { (self.metadata_ptr().as_ref(), self.slots_ptr().as_ref()) };
        let mut rider = Rider::new(metadata, hash, Mode::FIND);
        loop {
            let (index, category) = rider.advance();
            if category == Category::Empty {
                return None;
            }

            // SAFETY: The rider only stops at `Match` for slots holding a
            // fingerprint, and its indices are masked to the slot count.
            if eq(unsafe { slots.get_unchecked(index).assume_init_ref() }) {
                return Some(index);
            }
        }
    }

    /// Probes for `hash` and returns `Ok(index)` of the matching value, or
    /// `Err(index)` of the slot an insertion should use: the first tombstone
    /// on the probe path if there is one, otherwise the empty slot that ended
    /// the probe.
    fn find_for_insert(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Result<usize, usize> {
        debug_assert!(self.log_capacity >= MIN_LOG_CAPACITY);

        // SAFETY: The table is allocated.
        let (metadata, slots) = unsafe { (self.metadata_ptr().as_ref(), self.slots_ptr().as_ref()) };
        let mut rider = Rider::new(metadata, hash, Mode::FIND_FOR_INSERT);
        let mut first_tombstone = None;
        loop {
            match rider.advance() {
                (index, Category::Empty) => return Err(first_tombstone.unwrap_or(index)),
                (index, Category::Deleted) => {
                    first_tombstone.get_or_insert(index);
                }
                (index, _) => {
                    // SAFETY: Matching slots hold a fingerprint and are initialized.
                    if eq(unsafe { slots.get_unchecked(index).assume_init_ref() }) {
                        return Ok(index);
                    }
                }
            }
        }
    }

    /// Returns the first empty or deleted slot on the probe path of `hash`.
    fn find_vacant(&self, hash: u64) -> usize {
        // SAFETY: The table is allocated.
        let metadata = unsafe { self.metadata_ptr().as_ref() };
        Rider::new(metadata, hash, Mode::VACANT).advance().0
    }

    /// Stores `value` in a vacant slot.
    ///
    /// # Safety
    ///
    /// `index` must be within bounds and must not hold a live value.
    unsafe fn write_slot(&mut self, index: usize, hash: u64, value: V) -> &mut V {
        // SAFETY: Caller ensures `index` is in bounds and vacant.
        unsafe {
            let byte = self.metadata_ptr().as_mut().get_unchecked_mut(index);
            debug_assert!(!metadata::is_full(*byte));
            if *byte == EMPTY {
                self.fill += 1;
            }
            *byte = metadata::fingerprint(hash);
            self.populated += 1;

            self.slots_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .write(value)
        }
    }

    /// Moves the value out of a live slot and leaves a tombstone behind.
    ///
    /// # Safety
    ///
    /// `index` must be within bounds and hold a live value.
    unsafe fn take_slot(&mut self, index: usize) -> V {
        // SAFETY: Caller ensures `index` is in bounds and live.
        unsafe {
            let byte = self.metadata_ptr().as_mut().get_unchecked_mut(index);
            debug_assert!(metadata::is_full(*byte));
            *byte = DELETED;
            self.populated -= 1;

            self.slots_ptr()
                .as_ref()
                .get_unchecked(index)
                .assume_init_read()
        }
    }

    /// Moves the next live value at or after `*cursor` out of the table.
    fn take_next(&mut self, cursor: &mut usize) -> Option<V> {
        if self.populated == 0 {
            return None;
        }

        while *cursor < self.capacity() {
            let index = *cursor;
            *cursor += 1;

            // SAFETY: `index` is below the slot count.
            let byte = unsafe { *self.metadata_ptr().as_ref().get_unchecked(index) };
            if metadata::is_full(byte) {
                // SAFETY: The slot holds a fingerprint.
                return Some(unsafe { self.take_slot(index) });
            }
        }

        None
    }

    /// Gets the entry for the given hash and equality predicate.
    ///
    /// `hasher` must return the hash of any value stored in the table; it is
    /// used when the table has to grow before a vacant entry can be handed
    /// out.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::Entry;
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// match table.entry(5, |&v: &u64| v == 5, |&v| v) {
    ///     Entry::Vacant(entry) => {
    ///         entry.insert(5);
    ///     }
    ///     Entry::Occupied(_) => unreachable!(),
    /// }
    /// assert!(matches!(table.entry(5, |&v| v == 5, |&v| v), Entry::Occupied(_)));
    /// ```
    pub fn entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
    ) -> Entry<'_, V> {
        if self.log_capacity == 0 {
            self.resize(MIN_LOG_CAPACITY, &hasher);
        }

        match self.find_for_insert(hash, &eq) {
            Ok(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            Err(mut index) => {
                // SAFETY: The rider returned an in-bounds index.
                let reuses_tombstone =
                    unsafe { *self.metadata_ptr().as_ref().get_unchecked(index) == DELETED };

                // Growing before the write leaves the table in the same state as
                // writing first and growing after, and keeps `index` valid.
                if !reuses_tombstone && self.fill + 1 > self.capacity() / 2 {
                    self.resize(self.log_capacity + 1, &hasher);
                    index = self.find_vacant(hash);
                }

                Entry::Vacant(VacantEntry {
                    table: self,
                    index,
                    hash,
                })
            }
        }
    }

    /// Removes and returns the value matching the hash and equality predicate.
    ///
    /// The slot becomes a tombstone. If fewer than one eighth of the slots
    /// remain live, the table shrinks (never below two slots).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// table.entry(42, |&v: &u64| v == 42, |&v| v).or_insert(42);
    ///
    /// assert_eq!(table.remove(42, |&v| v == 42, |&v| v), Some(42));
    /// assert_eq!(table.remove(42, |&v| v == 42, |&v| v), None);
    /// assert!(table.is_empty());
    /// ```
    pub fn remove(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        hasher: impl Fn(&V) -> u64,
    ) -> Option<V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns live slots.
        let value = unsafe { self.take_slot(index) };
        self.maybe_shrink(hasher);
        Some(value)
    }

    fn maybe_shrink(&mut self, hasher: impl Fn(&V) -> u64) {
        let mut log_capacity = self.log_capacity;
        while log_capacity > MIN_LOG_CAPACITY && self.populated < (1usize << log_capacity) / 8 {
            log_capacity -= 1;
        }

        if log_capacity != self.log_capacity {
            self.resize(log_capacity, hasher);
        }
    }

    /// Reserves room for at least `additional` more values without growing.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows, and aborts if allocation fails.
    pub fn reserve(&mut self, additional: usize, hasher: impl Fn(&V) -> u64) {
        if let Err(error) = self.try_reserve(additional, hasher) {
            allocation_failed(error);
        }
    }

    /// Tries to reserve room for at least `additional` more values.
    ///
    /// On error the table is left unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::Error;
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<u64> = HashTable::new();
    /// table.try_reserve(100, |&v| v).unwrap();
    /// assert!(table.capacity() >= 200);
    ///
    /// assert_eq!(table.try_reserve(usize::MAX, |&v| v), Err(Error::CapacityOverflow));
    /// ```
    pub fn try_reserve(
        &mut self,
        additional: usize,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), Error> {
        let required = self
            .fill
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        if self.log_capacity != 0 && required <= self.capacity() / 2 {
            return Ok(());
        }

        let entries = self
            .populated
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        self.try_resize(log_capacity_for(entries)?, hasher)
    }

    #[cold]
    fn resize(&mut self, new_log_capacity: u32, hasher: impl Fn(&V) -> u64) {
        if let Err(error) = self.try_resize(new_log_capacity, hasher) {
            allocation_failed(error);
        }
    }

    /// Rehashes every live value into a fresh allocation of
    /// `2^new_log_capacity` slots, dropping all tombstones.
    ///
    /// The new arrays are allocated before the current ones are touched.
    fn try_resize(
        &mut self,
        new_log_capacity: u32,
        hasher: impl Fn(&V) -> u64,
    ) -> Result<(), Error> {
        debug_assert!(new_log_capacity >= MIN_LOG_CAPACITY);

        let (layout, alloc) = allocate::<V>(new_log_capacity)?;
        // A panicking hasher leaks the old allocation instead of dropping values
        // that were already moved out of it.
        let old = ManuallyDrop::new(core::mem::replace(
            self,
            Self {
                layout,
                alloc,
                log_capacity: new_log_capacity,
                populated: 0,
                fill: 0,
                _phantom: PhantomData,
            },
        ));

        log::trace!(
            "rehashing {} values ({} tombstones dropped) from {} to {} slots",
            old.populated,
            old.fill - old.populated,
            old.capacity(),
            self.capacity()
        );

        // SAFETY: Every slot of `old` holding a fingerprint is initialized and
        // read exactly once. The fresh table has room for all of them since
        // its capacity is at least twice the live count.
        unsafe {
            let metadata = old.metadata_ptr().as_ref();
            let slots = old.slots_ptr().as_ref();
            for (index, &byte) in metadata.iter().enumerate() {
                if !metadata::is_full(byte) {
                    continue;
                }

                let value = slots.get_unchecked(index).assume_init_read();
                let hash = hasher(&value);
                let target = self.find_vacant(hash);
                self.write_slot(target, hash, value);
            }

            old.deallocate();
        }

        debug_assert_eq!(self.fill, self.populated);
        Ok(())
    }

    /// Removes all values and shrinks the table back to two slots.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::with_capacity(100);
    /// table.entry(1, |&v: &u64| v == 1, |&v| v).or_insert(1);
    ///
    /// table.clear();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 2);
    /// ```
    pub fn clear(&mut self) {
        log::trace!("clearing table with {} values", self.populated);
        *self = Self::new();
    }

    /// Drops every value and releases the allocation.
    ///
    /// The table stays usable: lookups miss, and the next insertion allocates
    /// the minimum capacity again.
    pub fn destroy(&mut self) {
        log::trace!("destroying table with {} values", self.populated);
        *self = Self::unallocated();
    }

    /// Moves the contents out of the table, leaving it without an allocation
    /// as if [`destroy`](HashTable::destroy) had been called.
    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::unallocated())
    }

    /// Drops every value and resets all metadata to [`EMPTY`], keeping the
    /// allocation.
    fn drop_entries(&mut self) {
        // SAFETY: Metadata is reset before the matching value is dropped, so a
        // panicking destructor never leads to a double drop.
        unsafe {
            let slots = self.slots_ptr().as_mut();
            for (index, byte) in self.metadata_ptr().as_mut().iter_mut().enumerate() {
                let full = metadata::is_full(*byte);
                *byte = EMPTY;
                if full && core::mem::needs_drop::<V>() {
                    slots.get_unchecked_mut(index).assume_init_drop();
                }
            }
        }

        self.populated = 0;
        self.fill = 0;
    }

    /// Copies the metadata of `source` and clones its live values.
    ///
    /// # Safety
    ///
    /// `self` must have the same capacity as `source` and must be empty with
    /// all metadata [`EMPTY`].
    unsafe fn clone_entries_from(&mut self, source: &Self)
    where
        V: Clone,
    {
        debug_assert_eq!(self.log_capacity, source.log_capacity);
        debug_assert_eq!(self.fill, 0);

        // SAFETY: Both tables have the same capacity. A metadata byte is copied
        // only after its value has been cloned, so a panicking `clone` leaves
        // `self` consistent.
        unsafe {
            let src_metadata = source.metadata_ptr().as_ref();
            let src_slots = source.slots_ptr().as_ref();
            let dst_metadata = self.metadata_ptr().as_mut();
            let dst_slots = self.slots_ptr().as_mut();

            for (index, &byte) in src_metadata.iter().enumerate() {
                if metadata::is_full(byte) {
                    let value = src_slots.get_unchecked(index).assume_init_ref().clone();
                    dst_slots.get_unchecked_mut(index).write(value);
                    self.populated += 1;
                }
                if byte != EMPTY {
                    self.fill += 1;
                }
                *dst_metadata.get_unchecked_mut(index) = byte;
            }
        }
    }

    /// Returns an iterator over all values in the table, in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<u64> = HashTable::new();
    /// for v in 0..4u64 {
    ///     table.entry(v, |&x| x == v, |&x| x).or_insert(v);
    /// }
    ///
    /// let mut values: Vec<u64> = table.iter().copied().collect();
    /// values.sort();
    /// assert_eq!(values, [0, 1, 2, 3]);
    /// ```
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self, 0, false)
    }

    /// Returns the past-the-end iterator. Every exhausted iterator compares
    /// equal to it.
    pub fn end(&self) -> Iter<'_, V> {
        Iter::new(self, 0, true)
    }

    /// Returns an iterator yielding mutable references to all values.
    ///
    /// The caller must not change values in a way that changes their hash.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut::new(self)
    }

    /// Returns an iterator that removes and yields all values. Once the
    /// iterator is dropped the table is back at its minimum capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rider_hash::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::new();
    /// table.entry(1, |&v: &u64| v == 1, |&v| v).or_insert(1);
    ///
    /// let values: Vec<u64> = table.drain().collect();
    /// assert_eq!(values, [1]);
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, V> {
        Drain {
            table: self,
            cursor: 0,
        }
    }
}

impl<V> IntoIterator for HashTable<V> {
    type Item = V;
    type IntoIter = IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            table: self,
            cursor: 0,
        }
    }
}

impl<'a, V> IntoIterator for &'a HashTable<V> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A view into a single entry in the hash table, which may be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
///
/// [`entry`]: HashTable::entry
pub enum Entry<'a, V> {
    /// A vacant entry - no value matched.
    Vacant(VacantEntry<'a, V>),
    /// An occupied entry - a matching value is in the table.
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the entry's value.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if the entry is vacant and returns a
    /// mutable reference to the entry's value. The closure is not called for
    /// occupied entries.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Applies `f` to an occupied entry's value. Returns `None` without
    /// inserting anything if the entry is vacant.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts `V::default()` if the entry is vacant and returns a mutable
    /// reference to the entry's value.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry in the hash table.
///
/// The table has already grown if the insertion needs it, so inserting never
/// moves other values.
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    index: usize,
    hash: u64,
}

impl<'a, V> VacantEntry<'a, V> {
    /// Inserts the value and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        let VacantEntry { table, index, hash } = self;
        // SAFETY: `index` was produced by the vacant probe for `hash` on this
        // table and nothing has been written since.
        unsafe { table.write_slot(index, hash, value) }
    }
}

/// A view into an occupied entry in the hash table.
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    index: usize,
}

impl<'a, V> OccupiedEntry<'a, V> {
    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        // SAFETY: The entry points at a live slot.
        unsafe {
            self.table
                .slots_ptr()
                .as_ref()
                .get_unchecked(self.index)
                .assume_init_ref()
        }
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: The entry points at a live slot.
        unsafe {
            self.table
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(self.index)
                .assume_init_mut()
        }
    }

    /// Converts the entry into a mutable reference to the value with the
    /// lifetime of the table borrow.
    pub fn into_mut(self) -> &'a mut V {
        // SAFETY: The entry points at a live slot.
        unsafe {
            self.table
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(self.index)
                .assume_init_mut()
        }
    }

    /// Removes the value from the table and returns it. The table may shrink,
    /// so `hasher` must return the hash of any stored value.
    pub fn remove(self, hasher: impl Fn(&V) -> u64) -> V {
        let OccupiedEntry { table, index } = self;
        // SAFETY: The entry points at a live slot.
        let value = unsafe { table.take_slot(index) };
        table.maybe_shrink(hasher);
        value
    }
}

/// An iterator over the values of a [`HashTable`].
///
/// The iterator walks the slot array with a [`Rider`] that stops at live
/// slots only. It ends once the rider wraps around to a slot at or before
/// the one it last yielded.
pub struct Iter<'a, V> {
    rider: Rider<'a>,
    slots: &'a [MaybeUninit<V>],
    is_end: bool,
}

impl<'a, V> Iter<'a, V> {
    /// Creates an iterator resting on the first live slot at or after
    /// `start`. Tables without values always produce the end iterator.
    fn new(table: &'a HashTable<V>, start: usize, is_end: bool) -> Self {
        // SAFETY: Both slices are valid for the table's capacity and borrowed
        // for as long as the table is.
        let (metadata, slots) =
            unsafe { (table.metadata_ptr().as_ref(), table.slots_ptr().as_ref()) };

        let mut rider = Rider::new(metadata, start as u64, Mode::WALK);
        let is_end = is_end || table.populated == 0;
        if !is_end {
            rider.advance();
        }

        Self {
            rider,
            slots,
            is_end,
        }
    }

    /// Returns the value the iterator rests on without advancing, or `None`
    /// at the end.
    pub fn peek(&self) -> Option<&'a V> {
        if self.is_end {
            return None;
        }

        // SAFETY: A non-end iterator rests on a live slot.
        Some(unsafe {
            self.slots
                .get_unchecked(self.rider.cursor())
                .assume_init_ref()
        })
    }

    /// Returns `true` once the iterator has passed the last live slot.
    pub fn is_end(&self) -> bool {
        self.is_end
    }
}

impl<V> Clone for Iter<'_, V> {
    fn clone(&self) -> Self {
        Self {
            rider: self.rider,
            slots: self.slots,
            is_end: self.is_end,
        }
    }
}

impl<V> PartialEq for Iter<'_, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.is_end || other.is_end {
            return self.is_end && other.is_end;
        }

        self.rider == other.rider && core::ptr::eq(self.slots.as_ptr(), other.slots.as_ptr())
    }
}

impl<V> Eq for Iter<'_, V> {}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.peek()?;

        let last_index = self.rider.cursor();
        self.rider.advance();
        if self.rider.cursor() <= last_index {
            self.is_end = true;
        }

        Some(item)
    }
}

impl<V> FusedIterator for Iter<'_, V> {}

/// A mutable iterator over the values of a [`HashTable`].
///
/// Uses the same wrap-around end detection as [`Iter`].
pub struct IterMut<'a, V> {
    rider: Rider<'a>,
    slots: NonNull<MaybeUninit<V>>,
    is_end: bool,
    _marker: PhantomData<&'a mut V>,
}

impl<'a, V> IterMut<'a, V> {
    fn new(table: &'a mut HashTable<V>) -> Self {
        // SAFETY: The metadata array is never written while the table is
        // mutably borrowed by this iterator, and it does not overlap the slot
        // array handed out through `slots`.
        let metadata = unsafe { table.metadata_ptr().as_ref() };
        let slots = table.slots_ptr().cast::<MaybeUninit<V>>();

        let mut rider = Rider::new(metadata, 0, Mode::WALK);
        let is_end = table.populated == 0;
        if !is_end {
            rider.advance();
        }

        Self {
            rider,
            slots,
            is_end,
            _marker: PhantomData,
        }
    }
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end {
            return None;
        }

        let index = self.rider.cursor();
        self.rider.advance();
        if self.rider.cursor() <= index {
            self.is_end = true;
        }

        // SAFETY: `index` is a live slot, and every slot is yielded at most once
        // before the iterator ends, so the returned references never alias.
        Some(unsafe { (*self.slots.as_ptr().add(index)).assume_init_mut() })
    }
}

impl<V> FusedIterator for IterMut<'_, V> {}

/// A draining iterator over the values of a [`HashTable`].
///
/// Every yielded value leaves a tombstone, so the table stays consistent if
/// the iterator is leaked. Dropping the iterator drops the remaining values
/// and resets the table to its minimum capacity.
pub struct Drain<'a, V> {
    table: &'a mut HashTable<V>,
    cursor: usize,
}

impl<V> Iterator for Drain<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.table.take_next(&mut self.cursor)
    }
}

impl<V> Drop for Drain<'_, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
        self.table.clear();
    }
}

/// An owning iterator over the values of a [`HashTable`].
pub struct IntoIter<V> {
    table: HashTable<V>,
    cursor: usize,
}

impl<V> Iterator for IntoIter<V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.table.take_next(&mut self.cursor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.table.len(), Some(self.table.len()))
    }
}

impl<V> ExactSizeIterator for IntoIter<V> {}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Item {
        key: u64,
        value: i32,
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    fn insert(state: &HashState, table: &mut HashTable<Item>, key: u64, value: i32) -> bool {
        let hash = hash_key(state, key);
        match table.entry(hash, |v| v.key == key, |v| hash_key(state, v.key)) {
            Entry::Vacant(entry) => {
                entry.insert(Item { key, value });
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn remove(state: &HashState, table: &mut HashTable<Item>, key: u64) -> Option<Item> {
        table.remove(
            hash_key(state, key),
            |v| v.key == key,
            |v| hash_key(state, v.key),
        )
    }

    fn find(state: &HashState, table: &HashTable<Item>, key: u64) -> Option<i32> {
        table
            .find(hash_key(state, key), |v| v.key == key)
            .map(|v| v.value)
    }

    fn assert_well_formed<V>(table: &HashTable<V>) {
        let capacity = table.capacity();
        assert!(capacity.is_power_of_two() && capacity >= 2, "{table:?}");
        assert!(table.len() <= table.fill() && table.fill() <= capacity);

        // SAFETY: The table is allocated.
        let metadata = unsafe { table.metadata_ptr().as_ref() };
        let full = metadata.iter().filter(|&&b| metadata::is_full(b)).count();
        let non_empty = metadata.iter().filter(|&&b| b != EMPTY).count();
        assert_eq!(full, table.len(), "{table:?}");
        assert_eq!(non_empty, table.fill(), "{table:?}");
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..32u64 {
            assert!(insert(&state, &mut table, k, (k as i32) * 2));
            assert_eq!(find(&state, &table, k), Some((k as i32) * 2), "{table:#?}");
        }
        assert_eq!(table.len(), 32);
        for k in 0..32u64 {
            assert_eq!(find(&state, &table, k), Some((k as i32) * 2), "{table:#?}");
        }

        assert!(find(&state, &table, 999).is_none());
        assert_well_formed(&table);
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        let k = 42u64;
        let hash = hash_key(&state, k);

        assert!(insert(&state, &mut table, k, 7));

        match table.entry(hash, |v| v.key == k, |v| hash_key(&state, v.key)) {
            Entry::Occupied(mut occ) => {
                assert_eq!(occ.get().value, 7);
                occ.get_mut().value = 11;
            }
            Entry::Vacant(_) => panic!("should be occupied: {k}#{hash:02X} in {table:#?}"),
        }
        assert_eq!(find(&state, &table, k), Some(11));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_mut_and_modify() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..5u64 {
            insert(&state, &mut table, k, 1);
        }

        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            if let Some(v) = table.find_mut(hash, |v| v.key == k) {
                v.value += 9;
            }
        }
        for k in 0..5u64 {
            assert_eq!(find(&state, &table, k), Some(10));
        }
    }

    #[test]
    fn remove_items() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..8u64 {
            insert(&state, &mut table, k, k as i32);
        }

        for k in (0..8u64).step_by(2) {
            assert_eq!(
                remove(&state, &mut table, k),
                Some(Item {
                    key: k,
                    value: k as i32
                })
            );
        }
        assert_eq!(table.len(), 4);
        assert_eq!(remove(&state, &mut table, 0), None);

        for k in 0..8u64 {
            let expected = (k % 2 == 1).then_some(k as i32);
            assert_eq!(find(&state, &table, k), expected, "{table:#?}");
        }
        assert_well_formed(&table);
    }

    #[test]
    fn load_factor_bounds_hold() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();

        for k in 0..1000u64 {
            insert(&state, &mut table, k, 0);
            assert!(table.fill() <= table.capacity() / 2, "{table:?}");
            assert!(table.capacity().is_power_of_two());
        }
        assert_well_formed(&table);

        for k in 0..1000u64 {
            assert!(remove(&state, &mut table, k).is_some());
            assert!(
                table.capacity() == 2 || table.len() >= table.capacity() / 8,
                "{} live in {} slots",
                table.len(),
                table.capacity()
            );
            assert_well_formed(&table);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn explicit_collision() {
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..64u64 {
            table
                .entry(0, |v| v.key == k, |_| 0)
                .or_insert(Item { key: k, value: k as i32 });
        }
        assert_eq!(table.len(), 64);

        for k in (0..64u64).step_by(2) {
            assert!(table.remove(0, |v| v.key == k, |_| 0).is_some());
        }

        for k in 0..64u64 {
            let found = table.find(0, |v| v.key == k).map(|v| v.value);
            assert_eq!(found, (k % 2 == 1).then_some(k as i32));
        }
        assert_well_formed(&table);
    }

    #[test]
    fn tombstone_is_reused() {
        let mut table: HashTable<Item> = HashTable::new();
        let a = Item { key: 1, value: 10 };
        let b = Item { key: 2, value: 20 };

        table.entry(0, |v| v.key == 1, |_| 0).or_insert(a.clone());
        table.entry(0, |v| v.key == 2, |_| 0).or_insert(b.clone());
        assert_eq!(table.capacity(), 4);
        let slot_a = table.find_index(0, |v| v.key == 1).unwrap();

        assert_eq!(table.remove(0, |v| v.key == 1, |_| 0), Some(a.clone()));
        assert_eq!(table.fill(), 2);
        assert_eq!(table.find(0, |v| v.key == 2), Some(&b));

        table.entry(0, |v| v.key == 1, |_| 0).or_insert(a.clone());
        assert_eq!(table.find_index(0, |v| v.key == 1), Some(slot_a));
        assert_eq!(table.fill(), 2);
        assert_eq!(table.len(), 2);
        assert_well_formed(&table);
    }

    #[test]
    fn duplicate_found_past_tombstone() {
        let mut table: HashTable<Item> = HashTable::with_log_capacity(4);
        for k in 0..3u64 {
            table
                .entry(0, |v| v.key == k, |_| 0)
                .or_insert(Item { key: k, value: 0 });
        }
        table.remove(0, |v| v.key == 0, |_| 0);

        // Key 2 sits behind the tombstone; the probe must find it rather than
        // reuse the tombstone for a second copy.
        assert!(matches!(
            table.entry(0, |v| v.key == 2, |_| 0),
            Entry::Occupied(_)
        ));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn rehash_of_only_tombstones() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        insert(&state, &mut table, 1, 1);
        insert(&state, &mut table, 2, 2);
        remove(&state, &mut table, 1);
        remove(&state, &mut table, 2);
        assert_eq!(table.len(), 0);
        assert_eq!(table.fill(), 2);

        table.resize(MIN_LOG_CAPACITY, |v| hash_key(&state, v.key));
        assert_eq!(table.capacity(), 2);
        assert_eq!(table.fill(), 0);
        assert_well_formed(&table);

        insert(&state, &mut table, 3, 3);
        assert_eq!(find(&state, &table, 3), Some(3));
    }

    #[test]
    fn iter_visits_every_value_once() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..100u64 {
            insert(&state, &mut table, k, 0);
        }
        for k in 0..50u64 {
            remove(&state, &mut table, k * 2);
        }

        let mut keys: Vec<u64> = table.iter().map(|v| v.key).collect();
        keys.sort();
        assert_eq!(keys, (0..50u64).map(|k| k * 2 + 1).collect::<Vec<_>>());

        // Unchanged tables iterate in the same order.
        let first: Vec<u64> = table.iter().map(|v| v.key).collect();
        let second: Vec<u64> = (&table).into_iter().map(|v| v.key).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn iter_end_detection() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        assert!(table.iter() == table.end());
        assert_eq!(table.iter().next(), None);

        for k in 0..10u64 {
            insert(&state, &mut table, k, k as i32);
        }

        let mut iter = table.iter();
        assert!(iter != table.end());
        let mut seen = 0;
        while iter.next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 10);
        assert!(iter == table.end());
        assert!(iter.is_end());
        assert_eq!(iter.next(), None);

        let hash = hash_key(&state, 3);
        let found = table.find_iter(hash, |v| v.key == 3);
        assert!(found != table.end());
        assert_eq!(found.peek().map(|v| v.key), Some(3));
        assert!(table.find_iter(hash_key(&state, 77), |v| v.key == 77) == table.end());

        // Two iterators at the same slot compare equal.
        assert!(found == table.find_iter(hash, |v| v.key == 3));
    }

    #[test]
    fn iter_with_single_value_terminates() {
        let mut table: HashTable<Item> = HashTable::with_log_capacity(3);
        table
            .entry(5, |v| v.key == 5, |_| 5)
            .or_insert(Item { key: 5, value: 1 });

        let all: Vec<&Item> = table.iter().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(table.iter_mut().count(), 1);
    }

    #[test]
    fn iter_mut_updates_values() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..20u64 {
            insert(&state, &mut table, k, 1);
        }

        for item in table.iter_mut() {
            item.value += item.key as i32;
        }
        for k in 0..20u64 {
            assert_eq!(find(&state, &table, k), Some(1 + k as i32));
        }
    }

    #[test]
    fn drain_resets_table() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..40u64 {
            insert(&state, &mut table, k, 0);
        }

        let mut keys: Vec<u64> = table.drain().map(|v| v.key).collect();
        keys.sort();
        assert_eq!(keys, (0..40).collect::<Vec<_>>());
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 2);

        for k in 0..10u64 {
            insert(&state, &mut table, k, 0);
        }
        let mut drain = table.drain();
        assert!(drain.next().is_some());
        drop(drain);
        assert!(table.is_empty());
        assert_well_formed(&table);
    }

    #[test]
    fn into_iter_yields_owned_values() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..12u64 {
            insert(&state, &mut table, k, k as i32);
        }

        let iter = table.into_iter();
        assert_eq!(iter.len(), 12);
        let mut items: Vec<Item> = iter.collect();
        items.sort_by_key(|v| v.key);
        assert_eq!(items[11], Item { key: 11, value: 11 });
    }

    #[test]
    fn values_are_dropped_exactly_once() {
        let marker = Rc::new(());
        let mut table: HashTable<(u64, Rc<()>)> = HashTable::new();
        for k in 0..32u64 {
            table
                .entry(k, |v| v.0 == k, |v| v.0)
                .or_insert((k, Rc::clone(&marker)));
        }
        assert_eq!(Rc::strong_count(&marker), 33);

        for k in 0..16u64 {
            drop(table.remove(k, |v| v.0 == k, |v| v.0));
        }
        assert_eq!(Rc::strong_count(&marker), 17);

        let copy = table.clone();
        assert_eq!(Rc::strong_count(&marker), 33);
        drop(copy);

        table.clear();
        assert_eq!(Rc::strong_count(&marker), 1);

        table.entry(1, |v| v.0 == 1, |v| v.0).or_insert((1, Rc::clone(&marker)));
        drop(table);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn clone_preserves_tombstones() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..20u64 {
            insert(&state, &mut table, k, k as i32);
        }
        remove(&state, &mut table, 3);

        let copy = table.clone();
        assert_eq!(copy.len(), table.len());
        assert_eq!(copy.fill(), table.fill());
        assert_eq!(copy.capacity(), table.capacity());
        for k in 0..20u64 {
            assert_eq!(find(&state, &copy, k), find(&state, &table, k));
        }
        assert_well_formed(&copy);
    }

    #[test]
    fn clone_from_reuses_or_replaces() {
        let state = HashState::default();
        let mut source: HashTable<Item> = HashTable::new();
        for k in 0..6u64 {
            insert(&state, &mut source, k, 1);
        }

        let mut same_size: HashTable<Item> = HashTable::with_log_capacity(source.log_capacity());
        insert(&state, &mut same_size, 100, 100);
        same_size.clone_from(&source);
        assert_eq!(same_size.len(), 6);
        assert_eq!(find(&state, &same_size, 100), None);
        assert_eq!(find(&state, &same_size, 5), Some(1));

        let mut smaller: HashTable<Item> = HashTable::new();
        smaller.clone_from(&source);
        assert_eq!(smaller.capacity(), source.capacity());
        assert_well_formed(&smaller);
    }

    #[test]
    fn destroy_and_reuse() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..10u64 {
            insert(&state, &mut table, k, 0);
        }

        table.destroy();
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.len(), 0);
        assert_eq!(find(&state, &table, 1), None);
        assert_eq!(table.iter().count(), 0);
        assert_eq!(table.iter_mut().count(), 0);
        assert!(table.iter() == table.end());
        assert_eq!(remove(&state, &mut table, 1), None);
        assert!(format!("{table:?}").contains("capacity: 0"));

        let copy = table.clone();
        assert_eq!(copy.capacity(), 0);

        insert(&state, &mut table, 7, 7);
        assert_eq!(table.capacity(), 2);
        assert_eq!(find(&state, &table, 7), Some(7));
    }

    #[test]
    fn take_moves_the_allocation() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..10u64 {
            insert(&state, &mut table, k, k as i32);
        }
        let capacity = table.capacity();

        let moved = table.take();
        assert_eq!(moved.len(), 10);
        assert_eq!(moved.capacity(), capacity);
        assert_eq!(find(&state, &moved, 9), Some(9));

        assert_eq!(table.capacity(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn reserve_grows_ahead_of_inserts() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        table.reserve(100, |v| hash_key(&state, v.key));
        let capacity = table.capacity();
        assert!(capacity >= 200);

        for k in 0..100u64 {
            insert(&state, &mut table, k, 0);
        }
        assert_eq!(table.capacity(), capacity);

        assert_eq!(
            table.try_reserve(usize::MAX, |v| hash_key(&state, v.key)),
            Err(Error::CapacityOverflow)
        );
        assert_eq!(table.len(), 100);
        assert_eq!(table.capacity(), capacity);
    }

    #[test]
    fn with_capacity_sizes_for_half_load() {
        assert_eq!(HashTable::<u8>::with_capacity(0).capacity(), 2);
        assert_eq!(HashTable::<u8>::with_capacity(1).capacity(), 2);
        assert_eq!(HashTable::<u8>::with_capacity(3).capacity(), 8);
        assert_eq!(HashTable::<u8>::with_capacity(8).capacity(), 16);
        assert_eq!(HashTable::<u8>::with_log_capacity(0).capacity(), 2);
    }

    #[test]
    fn entry_helpers() {
        let mut table: HashTable<u64> = HashTable::new();
        assert_eq!(table.entry(3, |&v| v == 3, |&v| v).and_modify(|v| *v += 1), None);
        assert_eq!(*table.entry(3, |&v| v == 3, |&v| v).or_insert_with(|| 3), 3);
        assert_eq!(
            *table
                .entry(3, |&v| v == 3, |&v| v)
                .or_insert_with(|| panic!("occupied")),
            3
        );

        match table.entry(3, |&v| v == 3, |&v| v) {
            Entry::Occupied(entry) => assert_eq!(entry.remove(|&v| v), 3),
            Entry::Vacant(_) => unreachable!(),
        }
        assert!(table.is_empty());
        assert_eq!(*table.entry(0, |&v| v == 0, |&v| v).or_default(), 0);
    }
}

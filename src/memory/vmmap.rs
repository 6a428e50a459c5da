//! Ordered page-region bookkeeping for the sandbox address space.
//!
//! [`VmMap`] records what every mapped page range of the sandbox is: its
//! protection and, for file-backed ranges, the backing object and offset. The
//! map mirrors mmap/munmap/mprotect semantics exactly: a new mapping clips or
//! splits whatever it overlaps. Entries are kept lazily sorted; mutation marks
//! the vector dirty and lookups re-sort on demand.

use super::ProtFlags;

/// Page size of the sandbox address space (4 KiB).
pub const PAGE_SHIFT: u32 = 12;

/// Allocation granularity for fresh mappings (64 KiB), expressed in pages.
pub const MAP_GRANULARITY_PAGES: u64 = 1 << 4;

/// Reference to the object backing a mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backing {
    /// Identifier of the backing object (descriptor-table style).
    pub id: u64,
    /// Offset into the backing object, in pages.
    pub offset_pages: u64,
}

/// One mapped page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmEntry {
    /// First page of the range (sandbox-relative address >> [`PAGE_SHIFT`]).
    pub page_num: u64,
    /// Length in pages; never zero for a live entry.
    pub npages: u64,
    /// Protection of the range.
    pub prot: ProtFlags,
    /// Backing object, `None` for anonymous memory.
    pub backing: Option<Backing>,
    removed: bool,
}

impl VmEntry {
    /// One past the last page of the range.
    #[must_use]
    pub fn end_page(&self) -> u64 {
        self.page_num + self.npages
    }

    /// Whether the range contains `page`.
    #[must_use]
    pub fn contains(&self, page: u64) -> bool {
        page >= self.page_num && page < self.end_page()
    }
}

/// The ordered map of mapped page ranges.
#[derive(Debug, Default)]
pub struct VmMap {
    entries: Vec<VmEntry>,
    sorted: bool,
}

impl VmMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> VmMap {
        VmMap {
            entries: Vec::new(),
            sorted: true,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    /// Whether the map has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry without overlap handling; callers that may overwrite
    /// existing ranges use [`VmMap::update`] instead.
    pub fn add(&mut self, page_num: u64, npages: u64, prot: ProtFlags, backing: Option<Backing>) {
        debug_assert!(npages > 0);
        log::trace!("vmmap add: pages {page_num:#x}+{npages:#x} prot {prot:?}");
        self.entries.push(VmEntry {
            page_num,
            npages,
            prot,
            backing,
            removed: false,
        });
        self.sorted = false;
    }

    /// Installs (or with `remove`, erases) the range, clipping and splitting
    /// every overlapped entry. Mirrors mmap/munmap semantics: the new range
    /// wins completely, surviving fragments keep their protection with the
    /// backing offset shifted by the clipped amount.
    pub fn update(
        &mut self,
        page_num: u64,
        npages: u64,
        prot: ProtFlags,
        backing: Option<Backing>,
        remove: bool,
    ) {
        debug_assert!(npages > 0);
        log::trace!(
            "vmmap update: pages {page_num:#x}+{npages:#x} prot {prot:?} remove {remove}"
        );
        self.sort();
        let new_end = page_num + npages;

        let mut splits: Vec<VmEntry> = Vec::new();
        for entry in &mut self.entries {
            let ent_end = entry.end_page();
            if new_end <= entry.page_num || ent_end <= page_num {
                continue;
            }
            if page_num <= entry.page_num && ent_end <= new_end {
                // Fully covered.
                entry.removed = true;
            } else if entry.page_num < page_num && new_end < ent_end {
                // New range is interior: keep the prefix here, emit the suffix.
                let mut suffix = entry.clone();
                suffix.page_num = new_end;
                suffix.npages = ent_end - new_end;
                if let Some(b) = &mut suffix.backing {
                    b.offset_pages += new_end - entry.page_num;
                }
                splits.push(suffix);
                entry.npages = page_num - entry.page_num;
            } else if page_num <= entry.page_num {
                // Head overlap: the entry survives as its suffix.
                if let Some(b) = &mut entry.backing {
                    b.offset_pages += new_end - entry.page_num;
                }
                entry.npages = ent_end - new_end;
                entry.page_num = new_end;
            } else {
                // Tail overlap: the entry survives as its prefix.
                entry.npages = page_num - entry.page_num;
            }
        }
        self.entries.extend(splits);
        self.sorted = false;

        if !remove {
            self.add(page_num, npages, prot, backing);
        }
    }

    /// Finds the entry containing `page_num`.
    pub fn find_page(&mut self, page_num: u64) -> Option<&VmEntry> {
        self.sort();
        let idx = self.entries.partition_point(|e| e.page_num <= page_num);
        if idx == 0 {
            return None;
        }
        let entry = &self.entries[idx - 1];
        entry.contains(page_num).then_some(entry)
    }

    /// Finds `npages` of unmapped space between existing entries, searching
    /// downward from high addresses. Returns the first page of the hole.
    pub fn find_space(&mut self, npages: u64) -> Option<u64> {
        self.sort();
        for i in (1..self.entries.len()).rev() {
            let hole_lo = self.entries[i - 1].end_page();
            let hole_hi = self.entries[i].page_num;
            if hole_hi.saturating_sub(hole_lo) >= npages {
                return Some(hole_hi - npages);
            }
        }
        None
    }

    /// [`VmMap::find_space`] rounded to the 64 KiB mapping granularity: the
    /// returned start and the requested length are granularity-aligned.
    pub fn find_map_space(&mut self, npages: u64) -> Option<u64> {
        let npages = round_up(npages, MAP_GRANULARITY_PAGES);
        self.sort();
        for i in (1..self.entries.len()).rev() {
            let hole_lo = self.entries[i - 1].end_page();
            let hole_hi = self.entries[i].page_num;
            if hole_hi.saturating_sub(hole_lo) < npages {
                continue;
            }
            let start = round_down(hole_hi - npages, MAP_GRANULARITY_PAGES);
            if start >= hole_lo {
                return Some(start);
            }
        }
        None
    }

    /// Upward variant of [`VmMap::find_map_space`]: the lowest
    /// granularity-aligned hole at or above `hint_page`.
    pub fn find_map_space_above_hint(&mut self, hint_page: u64, npages: u64) -> Option<u64> {
        let npages = round_up(npages, MAP_GRANULARITY_PAGES);
        self.sort();
        for i in 1..self.entries.len() {
            let hole_lo = self.entries[i - 1].end_page();
            let hole_hi = self.entries[i].page_num;
            let start = round_up(hole_lo.max(hint_page), MAP_GRANULARITY_PAGES);
            if start + npages <= hole_hi {
                return Some(start);
            }
        }
        None
    }

    /// Calls `f` on every live entry in ascending page order.
    pub fn visit(&mut self, mut f: impl FnMut(&VmEntry)) {
        self.sort();
        for entry in &self.entries {
            f(entry);
        }
    }

    /// Sweeps removed entries and restores the sort order.
    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.entries.retain(|e| !e.removed && e.npages > 0);
        self.entries.sort_by_key(|e| e.page_num);
        self.sorted = true;
    }
}

fn round_up(v: u64, granularity: u64) -> u64 {
    v.div_ceil(granularity) * granularity
}

fn round_down(v: u64, granularity: u64) -> u64 {
    v - v % granularity
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: ProtFlags = ProtFlags::READ.union(ProtFlags::WRITE);
    const R: ProtFlags = ProtFlags::READ;

    #[test]
    fn add_and_find() {
        let mut map = VmMap::new();
        map.add(0x10, 0x20, RW, None);
        map.add(0x100, 0x10, R, None);

        assert_eq!(map.len(), 2);
        assert!(map.find_page(0x10).is_some());
        assert!(map.find_page(0x2F).is_some());
        assert!(map.find_page(0x30).is_none());
        assert_eq!(map.find_page(0x105).unwrap().prot, R);
        assert!(map.find_page(0x0).is_none());
    }

    #[test]
    fn update_splits_interior_range() {
        let mut map = VmMap::new();
        map.add(
            0x10,
            0x30,
            RW,
            Some(Backing {
                id: 7,
                offset_pages: 0,
            }),
        );

        // Punch a hole in the middle with a different protection.
        map.update(0x20, 0x08, R, None, false);

        assert_eq!(map.len(), 3);
        let prefix = map.find_page(0x10).unwrap().clone();
        assert_eq!(prefix.npages, 0x10);
        assert_eq!(prefix.backing.unwrap().offset_pages, 0);

        let middle = map.find_page(0x24).unwrap();
        assert_eq!(middle.prot, R);

        let suffix = map.find_page(0x28).unwrap();
        assert_eq!(suffix.page_num, 0x28);
        assert_eq!(suffix.npages, 0x18);
        // The suffix keeps its backing with the offset advanced past the hole.
        assert_eq!(suffix.backing.unwrap().offset_pages, 0x18);
    }

    #[test]
    fn update_clips_head_and_tail() {
        let mut map = VmMap::new();
        map.add(
            0x10,
            0x10,
            RW,
            Some(Backing {
                id: 1,
                offset_pages: 4,
            }),
        );
        map.add(0x30, 0x10, RW, None);

        // Covers the tail of the first and the head of the second.
        map.update(0x18, 0x20, R, None, false);

        let first = map.find_page(0x10).unwrap();
        assert_eq!(first.npages, 0x08);
        assert_eq!(first.backing.unwrap().offset_pages, 4);

        let second = map.find_page(0x3C).unwrap();
        assert_eq!(second.page_num, 0x38);
        assert_eq!(second.npages, 0x08);

        assert_eq!(map.find_page(0x20).unwrap().prot, R);
    }

    #[test]
    fn update_remove_erases_and_is_idempotent() {
        let mut map = VmMap::new();
        map.add(0x10, 0x10, RW, None);

        map.update(0x10, 0x10, ProtFlags::empty(), None, true);
        assert!(map.find_page(0x10).is_none());
        assert!(map.is_empty());

        // Removing again is a no-op.
        map.update(0x10, 0x10, ProtFlags::empty(), None, true);
        assert!(map.is_empty());
    }

    #[test]
    fn full_overlap_replaces_entry() {
        let mut map = VmMap::new();
        map.add(0x10, 0x10, RW, None);
        map.update(0x00, 0x40, R, None, false);

        assert_eq!(map.len(), 1);
        assert_eq!(map.find_page(0x10).unwrap().prot, R);
    }

    #[test]
    fn find_space_searches_downward() {
        let mut map = VmMap::new();
        map.add(0x0, 0x10, RW, None);
        map.add(0x40, 0x10, RW, None); // hole 0x10..0x40
        map.add(0x100, 0x10, RW, None); // hole 0x50..0x100

        // The highest hole that fits wins.
        assert_eq!(map.find_space(0x20), Some(0x100 - 0x20));
        // Too big for the upper hole, fits the lower one... it does not exist.
        assert_eq!(map.find_space(0x200), None);
    }

    #[test]
    fn find_map_space_honors_granularity() {
        let mut map = VmMap::new();
        map.add(0x0, 0x10, RW, None);
        map.add(0x1000, 0x10, RW, None);

        let start = map.find_map_space(0x5).unwrap();
        assert_eq!(start % MAP_GRANULARITY_PAGES, 0);
        assert!(start >= 0x10 && start + 0x10 <= 0x1000);
    }

    #[test]
    fn find_map_space_above_hint() {
        let mut map = VmMap::new();
        map.add(0x0, 0x10, RW, None);
        map.add(0x100, 0x10, RW, None);
        map.add(0x1000, 0x10, RW, None);

        let start = map.find_map_space_above_hint(0x115, 0x10).unwrap();
        assert_eq!(start % MAP_GRANULARITY_PAGES, 0);
        assert!(start >= 0x115);
        assert!(start + 0x10 <= 0x1000);
    }

    #[test]
    fn visit_iterates_in_order() {
        let mut map = VmMap::new();
        map.add(0x100, 0x10, RW, None);
        map.add(0x0, 0x10, RW, None);
        map.add(0x50, 0x10, RW, None);

        let mut pages = Vec::new();
        map.visit(|e| pages.push(e.page_num));
        assert_eq!(pages, vec![0x0, 0x50, 0x100]);
    }
}

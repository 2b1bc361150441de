// SPDX-License-Identifier: GPL-3.0-only

//! Partition-table tracker
//!
//! Keeps an in-memory copy of a disk's layout as printed by
//! `parted --machine -- <dev> unit B print free`, so free regions can be
//! carved into new partitions before anything touches the disk.
//!
//! Row numbers follow parted except for free-space rows, which always carry
//! number 0 and the filesystem marker `free`. Two free rows are never left
//! next to each other.

use serde::Serialize;

use crate::device::{BlockDevice, DeviceType};
use crate::error::{ModelError, Result};
use crate::size::MIB;

/// Filesystem column value marking a free-space row.
pub const FREE_MARKER: &str = "free";

/// Highest partition number handed out in memory.
pub const MAX_PARTITION_NUMBER: u64 = 127;

/// Leftover free space smaller than this is dropped from the table.
pub const MIN_FREE_REMAINDER: u64 = 10 * MIB;

const BOOT_SIZE: u64 = 150 * 1000 * 1000;
const SWAP_SIZE: u64 = 256 * 1000 * 1000;

/// One row of a partition table dump.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PartedPartition {
    pub number: u64,
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub file_system: String,
    pub name: String,
    pub flags: String,
}

impl PartedPartition {
    pub fn free(start: u64, end: u64, size: u64) -> Self {
        Self {
            number: 0,
            start,
            end,
            size,
            file_system: FREE_MARKER.to_string(),
            ..Default::default()
        }
    }

    pub fn is_free(&self) -> bool {
        self.number == 0 && self.file_system == FREE_MARKER
    }
}

/// A contiguous byte region, both ends inclusive as parted prints them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    pub fn size(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end.saturating_sub(self.start) + 1
        }
    }
}

/// Ordered rows of one disk's table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionTable {
    rows: Vec<PartedPartition>,
}

fn parse_bytes(field: &str) -> Option<u64> {
    field.trim().trim_end_matches('B').parse().ok()
}

fn parse_row(fields: &[&str]) -> Option<PartedPartition> {
    match fields.len() {
        7 => Some(PartedPartition {
            number: fields[0].trim().parse().ok()?,
            start: parse_bytes(fields[1])?,
            end: parse_bytes(fields[2])?,
            size: parse_bytes(fields[3])?,
            file_system: fields[4].to_string(),
            name: fields[5].to_string(),
            flags: fields[6].to_string(),
        }),
        5 if fields[4] == FREE_MARKER => Some(PartedPartition::free(
            parse_bytes(fields[1])?,
            parse_bytes(fields[2])?,
            parse_bytes(fields[3])?,
        )),
        _ => None,
    }
}

impl PartitionTable {
    pub fn new(rows: Vec<PartedPartition>) -> Self {
        Self { rows }
    }

    /// Parse machine output (`print` or `print free`).
    ///
    /// Rows are `;`-terminated and `:`-separated: 7 fields describe a
    /// partition, 5 fields ending in `free` describe unallocated space. The
    /// `BYT` header and the disk line are skipped, as is anything
    /// unparsable.
    pub fn parse(output: &str) -> Self {
        let mut rows = Vec::new();

        for line in output.split(";\n") {
            let line = line.trim().trim_end_matches(';');
            let fields: Vec<&str> = line.split(':').collect();

            match parse_row(&fields) {
                Some(row) => rows.push(row),
                None if fields.len() == 7 || fields.len() == 5 => {
                    tracing::debug!("skipping unparsable partition row {:?}", line)
                }
                None => {}
            }
        }

        Self { rows }
    }

    pub fn rows(&self) -> &[PartedPartition] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that are real partitions.
    pub fn partitions(&self) -> impl Iterator<Item = &PartedPartition> {
        self.rows.iter().filter(|p| !p.is_free())
    }

    /// First free row at least `min_size` bytes long.
    pub fn find_free(&self, min_size: u64) -> Option<PartedPartition> {
        self.rows
            .iter()
            .find(|p| p.is_free() && p.size >= min_size)
            .cloned()
    }

    /// First free row at least `min_size` bytes long lying inside `region`,
    /// or anywhere when the region is empty.
    pub fn find_free_within(&self, region: ByteRange, min_size: u64) -> Option<PartedPartition> {
        if region.is_empty() {
            return self.find_free(min_size);
        }
        self.rows
            .iter()
            .find(|p| {
                p.is_free() && p.size >= min_size && p.start >= region.start && p.end <= region.end
            })
            .cloned()
    }

    /// Whether a real partition with this number is in the table.
    pub fn has_partition(&self, number: u64) -> bool {
        number > 0 && self.partitions().any(|p| p.number == number)
    }

    /// Start and end of the partition with the given number, or `(0, 0)`.
    pub fn start_end(&self, number: u64) -> (u64, u64) {
        self.rows
            .iter()
            .find(|p| !p.is_free() && p.number == number)
            .map(|p| (p.start, p.end))
            .unwrap_or((0, 0))
    }

    /// The biggest free region that is still at least `min_size` bytes, or
    /// an empty range.
    pub fn largest_free(&self, min_size: u64) -> ByteRange {
        let threshold = min_size.saturating_sub(1);

        self.rows
            .iter()
            .filter(|p| p.is_free() && p.size > threshold)
            .fold(None::<&PartedPartition>, |best, p| match best {
                Some(b) if b.size >= p.size => Some(b),
                _ => Some(p),
            })
            .map(|p| ByteRange {
                start: p.start,
                end: p.end,
            })
            .unwrap_or_default()
    }

    /// Lowest number in `1..=127` not used by any row.
    pub fn next_number(&self) -> Option<u64> {
        (1..=MAX_PARTITION_NUMBER).find(|n| self.rows.iter().all(|p| p.number != *n))
    }

    /// Merge runs of adjacent free rows into one.
    pub fn consolidate_free(&mut self) {
        let mut merged: Vec<PartedPartition> = Vec::with_capacity(self.rows.len());

        for row in self.rows.drain(..) {
            if row.is_free()
                && let Some(last) = merged.last_mut()
                && last.is_free()
            {
                last.end = row.end;
                last.size += row.size;
                continue;
            }
            merged.push(row);
        }

        self.rows = merged;
    }

    /// Turn the partition with `number` back into free space.
    pub fn release(&mut self, number: u64) -> bool {
        let Some(row) = self
            .rows
            .iter_mut()
            .find(|p| !p.is_free() && p.number == number)
        else {
            return false;
        };
        *row = PartedPartition::free(row.start, row.end, row.size);
        self.consolidate_free();
        true
    }
}

/// The partition number parted assigned between two `print` listings:
/// exactly one number must have appeared.
pub fn find_new_partition(
    before: &[PartedPartition],
    after: &[PartedPartition],
) -> Option<PartedPartition> {
    let mut added = after
        .iter()
        .filter(|a| !a.is_free() && !before.iter().any(|b| b.number == a.number));

    let first = added.next()?;
    if added.next().is_some() {
        tracing::warn!("more than one new partition appeared, cannot tell which is ours");
        return None;
    }
    Some(first.clone())
}

impl BlockDevice {
    /// Carve `child` out of the `free` row of this disk's table.
    ///
    /// The child gets the lowest unused partition number, a used row sized
    /// exactly to it, and is appended to the children. The remainder stays
    /// free only if it is larger than 10 MiB.
    pub fn add_from_free_partition(
        &mut self,
        free: &PartedPartition,
        mut child: BlockDevice,
    ) -> Result<u64> {
        if !self.device_type.has_partition_table() {
            return Err(ModelError::Precondition(format!(
                "{}: cannot add a partition to a {} device",
                self.name, self.device_type
            )));
        }

        let next = self.part_table.next_number().ok_or_else(|| {
            ModelError::Precondition(format!(
                "{}: no partition number left for {}",
                self.name, child.name
            ))
        })?;

        let Some(index) = self
            .part_table
            .rows
            .iter()
            .position(|p| p.number == free.number && p.start == free.start)
        else {
            return Err(ModelError::Precondition(format!(
                "{}: free region at {} is not in the partition table",
                self.name, free.start
            )));
        };

        let original = self.part_table.rows[index].clone();
        if child.size > original.size {
            return Err(ModelError::Precondition(format!(
                "{}: {} bytes do not fit in free region of {} bytes",
                self.name, child.size, original.size
            )));
        }

        let used = PartedPartition {
            number: next,
            start: original.start,
            end: original.start + child.size.saturating_sub(1),
            size: child.size,
            file_system: String::new(),
            name: original.name.clone(),
            flags: original.flags.clone(),
        };
        tracing::debug!("adding partition row {:?}", used);

        let remainder_start = used.end + 1;
        let remainder_size = original.size - used.size;

        let mut replacement = vec![used];
        if original.end > remainder_start && remainder_size > MIN_FREE_REMAINDER {
            replacement.push(PartedPartition::free(
                remainder_start,
                original.end,
                remainder_size,
            ));
        }
        self.part_table.rows.splice(index..=index, replacement);
        self.part_table.consolidate_free();

        child.set_partition_number(next);
        self.add_child(child);

        Ok(next)
    }

    /// Largest free region of at least `min_size` bytes on a disk or loop
    /// device; an empty range otherwise.
    pub fn largest_contiguous_free_space(&self, min_size: u64) -> ByteRange {
        if !matches!(self.device_type, DeviceType::Disk | DeviceType::Loop) {
            tracing::warn!(
                "largest_contiguous_free_space called on non-disk {}",
                self.device_file()
            );
            return ByteRange::default();
        }
        self.part_table.largest_free(min_size)
    }

    pub fn find_free(&self, min_size: u64) -> Option<PartedPartition> {
        self.part_table.find_free(min_size)
    }

    /// Decide which planned children are created and where, before the
    /// table is written.
    ///
    /// On a whole disk every planned child is created and formatted.
    /// Otherwise a child naming a partition that is already in the table is
    /// reused and only formatted when the layout asks for it, and every other
    /// planned child is carved out of the free space inside `region` (the
    /// whole disk when `region` is empty). Children reserved by an earlier
    /// call are left alone.
    pub fn reserve_partitions(&mut self, whole_disk: bool, region: ByteRange) -> Result<()> {
        if whole_disk {
            for child in self.children.iter_mut().filter(|c| c.make_partition) {
                child.format_partition = true;
            }
            return Ok(());
        }

        let mut pending = Vec::new();
        for mut child in std::mem::take(&mut self.children) {
            if !child.make_partition || child.has_assigned_partition() {
                self.children.push(child);
                continue;
            }

            let number = child.partition_number();
            if self.part_table.has_partition(number) {
                tracing::debug!("{}: partition {number} exists, reused", child.name);
                child.make_partition = false;
                self.children.push(child);
            } else {
                child.format_partition = true;
                pending.push(child);
            }
        }

        // The child taking the rest of a region goes last.
        pending.sort_by_key(|c| c.size == 0);

        let base = self.base_partition_name();
        for mut child in pending {
            let free = self
                .part_table
                .find_free_within(region, child.size.max(1))
                .ok_or_else(|| {
                    ModelError::Precondition(format!(
                        "{}: no free region left for {} ({} bytes)",
                        self.name, child.name, child.size
                    ))
                })?;
            if child.size == 0 {
                child.size = free.size;
            }

            let requested = std::mem::take(&mut child.name);
            let number = self.add_from_free_partition(&free, child)?;
            let name = format!("{base}{number}");
            if !requested.is_empty() && requested != name {
                tracing::info!("{}: {requested} becomes partition {name}", self.name);
            }
            if let Some(added) = self.children.last_mut() {
                added.name = name;
            }
        }

        Ok(())
    }
}

fn standard_child(mount_point: &str, fs_type: &str, label: &str, size: u64) -> BlockDevice {
    BlockDevice {
        fs_type: fs_type.to_string(),
        mount_point: mount_point.to_string(),
        label: label.to_string(),
        size,
        device_type: DeviceType::Part,
        user_defined: true,
        make_partition: true,
        format_partition: true,
        ..Default::default()
    }
}

/// Replace the disk's layout with the default guided one: a 150 MB EFI
/// `/boot`, 256 MB of swap and an ext4 root on the rest.
pub fn new_standard_partitions(disk: &mut BlockDevice) -> Result<()> {
    let size = disk.disk_size()?;
    if size < BOOT_SIZE + SWAP_SIZE {
        return Err(ModelError::Precondition(format!(
            "{}: {} bytes is too small for the standard layout",
            disk.name, size
        )));
    }

    disk.children.clear();
    disk.part_table = PartitionTable::new(vec![PartedPartition::free(0, size - 1, size)]);

    let layout = [
        standard_child("/boot", "vfat", "boot", BOOT_SIZE),
        standard_child("", "swap", "swap", SWAP_SIZE),
        standard_child("/", "ext4", "root", size - BOOT_SIZE - SWAP_SIZE),
    ];

    for child in layout {
        let free = disk.find_free(child.size).ok_or_else(|| {
            ModelError::Precondition(format!("{}: no free region for {}", disk.name, child.label))
        })?;
        disk.add_from_free_partition(&free, child)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::GIB;

    const DUMP: &str = "BYT;\n\
/dev/sda:4294967296B:scsi:512:512:gpt:ATA VBOX HARDDISK:;\n\
1:17408B:1048575B:1031168B:free;\n\
1:1048576B:157286399B:156237824B:fat32:EFI:boot, esp;\n\
2:157286400B:425721855B:268435456B:linux-swap(v1):linux-swap:;\n\
1:425721856B:4294967295B:3869245440B:free;\n";

    fn empty_disk(size: u64) -> BlockDevice {
        BlockDevice {
            name: "sda".to_string(),
            size,
            device_type: DeviceType::Disk,
            part_table: PartitionTable::new(vec![PartedPartition::free(0, size - 1, size)]),
            ..Default::default()
        }
    }

    fn child(size: u64) -> BlockDevice {
        BlockDevice {
            size,
            device_type: DeviceType::Part,
            ..Default::default()
        }
    }

    fn assert_no_adjacent_free(table: &PartitionTable) {
        for pair in table.rows().windows(2) {
            assert!(
                !(pair[0].is_free() && pair[1].is_free()),
                "adjacent free rows: {:?}",
                table.rows()
            );
        }
    }

    #[test]
    fn parses_machine_dump() {
        let table = PartitionTable::parse(DUMP);
        let rows = table.rows();
        assert_eq!(rows.len(), 4);

        assert!(rows[0].is_free());
        assert_eq!(rows[0].start, 17408);
        assert_eq!(rows[1].number, 1);
        assert_eq!(rows[1].file_system, "fat32");
        assert_eq!(rows[1].name, "EFI");
        assert_eq!(rows[1].flags, "boot, esp");
        assert_eq!(rows[2].file_system, "linux-swap(v1)");
        assert_eq!(rows[2].flags, "");
        assert!(rows[3].is_free());

        assert_eq!(table.start_end(2), (157286400, 425721855));
        assert_eq!(table.start_end(7), (0, 0));
    }

    #[test]
    fn parsed_rows_cover_the_dump_range() {
        let table = PartitionTable::parse(DUMP);
        let rows = table.rows();
        let total: u64 = rows.iter().map(|r| r.size).sum();
        let first = rows.first().unwrap();
        let last = rows.last().unwrap();
        assert_eq!(total, last.end - first.start + 1);
    }

    #[test]
    fn find_free_is_first_fit() {
        let table = PartitionTable::parse(DUMP);
        let small = table.find_free(1000).unwrap();
        assert_eq!(small.start, 17408);
        let big = table.find_free(100 * MIB).unwrap();
        assert_eq!(big.start, 425721856);
        assert!(table.find_free(8 * GIB).is_none());
    }

    #[test]
    fn largest_free_region() {
        let table = PartitionTable::parse(DUMP);
        assert_eq!(
            table.largest_free(MIB),
            ByteRange {
                start: 425721856,
                end: 4294967295
            }
        );
        assert_eq!(table.largest_free(1031168).start, 425721856);
        assert!(table.largest_free(8 * GIB).is_empty());
    }

    #[test]
    fn boot_from_empty_disk() {
        let mut disk = empty_disk(4 * GIB);
        let free = disk.find_free(100 * MIB).unwrap();

        let mut boot = child(150 * MIB);
        boot.fs_type = "vfat".to_string();
        boot.mount_point = "/boot".to_string();
        let number = disk.add_from_free_partition(&free, boot).unwrap();

        assert_eq!(number, 1);
        assert_eq!(disk.children.len(), 1);
        assert_eq!(disk.children[0].partition_number(), 1);
        assert_eq!(disk.children[0].name, "sda1");

        let free_rows: Vec<_> = disk.part_table.rows().iter().filter(|r| r.is_free()).collect();
        assert_eq!(free_rows.len(), 1);
        assert_eq!(free_rows[0].size, 4 * GIB - 150 * MIB);
        assert_eq!(free_rows[0].start, 150 * MIB);
    }

    #[test]
    fn numbering_has_no_gaps() {
        let mut disk = empty_disk(4 * GIB);
        let count = 12u64;
        for _ in 0..count {
            let free = disk.find_free(20 * MIB).unwrap();
            disk.add_from_free_partition(&free, child(20 * MIB)).unwrap();
            assert_no_adjacent_free(&disk.part_table);
        }

        let mut numbers: Vec<u64> = disk.children.iter().map(|c| c.partition_number()).collect();
        numbers.sort();
        assert_eq!(numbers, (1..=count).collect::<Vec<_>>());
    }

    #[test]
    fn release_then_reuse_lowest_number() {
        let mut disk = empty_disk(GIB);
        for _ in 0..3 {
            let free = disk.find_free(100 * MIB).unwrap();
            disk.add_from_free_partition(&free, child(100 * MIB)).unwrap();
        }

        assert!(disk.part_table.release(2));
        assert_no_adjacent_free(&disk.part_table);
        assert!(disk.part_table.release(3));
        assert_no_adjacent_free(&disk.part_table);
        assert_eq!(disk.part_table.next_number(), Some(2));

        let free = disk.find_free(150 * MIB).unwrap();
        assert_eq!(free.start, 100 * MIB);
        assert_eq!(
            disk.add_from_free_partition(&free, child(150 * MIB)).unwrap(),
            2
        );
    }

    #[test]
    fn small_remainder_is_dropped() {
        let mut disk = empty_disk(105 * MIB);
        let free = disk.find_free(100 * MIB).unwrap();
        disk.add_from_free_partition(&free, child(100 * MIB)).unwrap();
        assert!(disk.part_table.rows().iter().all(|r| !r.is_free()));
    }

    #[test]
    fn rejects_oversized_child_and_non_disk() {
        let mut disk = empty_disk(MIB * 50);
        let free = disk.find_free(0).unwrap();
        assert!(disk.add_from_free_partition(&free, child(MIB * 51)).is_err());

        let mut part = empty_disk(MIB * 50);
        part.device_type = DeviceType::Part;
        assert!(part.add_from_free_partition(&free, child(MIB)).is_err());
    }

    #[test]
    fn finds_single_new_partition() {
        let before = PartitionTable::parse(DUMP).partitions().cloned().collect::<Vec<_>>();
        let mut after = before.clone();
        after.push(PartedPartition {
            number: 3,
            start: 425721856,
            end: 525721855,
            size: 100000000,
            ..Default::default()
        });
        assert_eq!(find_new_partition(&before, &after).unwrap().number, 3);
        assert!(find_new_partition(&before, &before).is_none());

        after.push(PartedPartition {
            number: 4,
            ..Default::default()
        });
        assert!(find_new_partition(&before, &after).is_none());
    }

    fn planned(name: &str, mount_point: &str, size: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            fs_type: "ext4".to_string(),
            mount_point: mount_point.to_string(),
            size,
            device_type: DeviceType::Part,
            user_defined: true,
            make_partition: true,
            ..Default::default()
        }
    }

    fn dump_disk() -> BlockDevice {
        BlockDevice {
            name: "sda".to_string(),
            size: 4 * GIB,
            device_type: DeviceType::Disk,
            part_table: PartitionTable::parse(DUMP),
            ..Default::default()
        }
    }

    const TAIL: ByteRange = ByteRange {
        start: 425721856,
        end: 4294967295,
    };

    #[test]
    fn free_search_stays_inside_the_region() {
        let table = PartitionTable::parse(DUMP);
        assert_eq!(table.find_free(1000).unwrap().start, 17408);
        assert_eq!(table.find_free_within(TAIL, 1000).unwrap().start, 425721856);
        assert_eq!(
            table.find_free_within(ByteRange::default(), 1000).unwrap().start,
            17408
        );
        assert!(table.find_free_within(TAIL, 4 * GIB).is_none());
        assert!(table.has_partition(2) && !table.has_partition(3) && !table.has_partition(0));
    }

    #[test]
    fn partial_reservation_reuses_and_carves() {
        let mut disk = dump_disk();
        let mut boot = planned("sda1", "/boot", 0);
        boot.fs_type = "vfat".to_string();
        disk.children = vec![boot, planned("sda3", "/home", GIB), planned("sda4", "/", 0)];

        disk.reserve_partitions(false, TAIL).unwrap();

        let flags: Vec<(&str, u64, bool, bool)> = disk
            .children
            .iter()
            .map(|c| {
                (
                    c.name.as_str(),
                    c.partition_number(),
                    c.make_partition,
                    c.format_partition,
                )
            })
            .collect();
        assert_eq!(
            flags,
            vec![
                ("sda1", 1, false, false),
                ("sda3", 3, true, true),
                ("sda4", 4, true, true),
            ]
        );
        assert_eq!(
            disk.part_table.start_end(3),
            (425721856, 425721856 + GIB - 1)
        );
        assert_eq!(disk.part_table.start_end(4), (425721856 + GIB, 4294967295));
        assert_eq!(disk.children[2].size, 3869245440 - GIB);
        assert_no_adjacent_free(&disk.part_table);

        let again = disk.clone();
        disk.reserve_partitions(false, TAIL).unwrap();
        assert_eq!(disk, again);
    }

    #[test]
    fn reused_partition_keeps_requested_format() {
        let mut disk = dump_disk();
        let mut swap = planned("sda2", "", 0);
        swap.fs_type = "swap".to_string();
        swap.format_partition = true;
        disk.children = vec![swap];

        disk.reserve_partitions(false, TAIL).unwrap();
        assert!(!disk.children[0].make_partition && disk.children[0].format_partition);
        assert_eq!(disk.part_table, PartitionTable::parse(DUMP));
    }

    #[test]
    fn new_partition_is_renumbered_to_the_free_slot() {
        let mut disk = dump_disk();
        disk.children = vec![planned("sda9", "/srv", GIB)];

        disk.reserve_partitions(false, TAIL).unwrap();
        assert_eq!(disk.children[0].name, "sda3");
        assert_eq!(disk.children[0].partition_number(), 3);
    }

    #[test]
    fn reservation_fails_without_room() {
        let mut disk = dump_disk();
        disk.children = vec![planned("sda3", "/", 4 * GIB)];
        assert!(disk.reserve_partitions(false, TAIL).is_err());
    }

    #[test]
    fn whole_disk_reservation_formats_new_partitions() {
        let mut disk = empty_disk(4 * GIB);
        disk.children = vec![planned("sda1", "/", 0)];

        disk.reserve_partitions(true, ByteRange::default()).unwrap();
        assert!(disk.children[0].make_partition && disk.children[0].format_partition);
        assert!(!disk.children[0].has_assigned_partition());
    }

    #[test]
    fn standard_layout_fills_disk() {
        let mut disk = empty_disk(8 * GIB);
        new_standard_partitions(&mut disk).unwrap();

        assert_eq!(disk.children.len(), 3);
        assert_eq!(disk.children[0].mount_point, "/boot");
        assert_eq!(disk.children[1].fs_type, "swap");
        assert_eq!(disk.children[2].mount_point, "/");
        assert_eq!(disk.children[2].size, 8 * GIB - BOOT_SIZE - SWAP_SIZE);
        assert!(disk.children.iter().all(|c| c.make_partition && c.format_partition));
        assert_eq!(disk.disk_size().unwrap(), 8 * GIB);
        assert!(disk.part_table.rows().iter().all(|r| !r.is_free()));
    }
}

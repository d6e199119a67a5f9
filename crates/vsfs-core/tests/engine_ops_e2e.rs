#![forbid(unsafe_code)]
//! End-to-end coverage of the engine's dispatch-facing operations on
//! in-memory images: create/attr, data round-trips, unlink reuse,
//! directory growth, listing, timestamps, and error reporting.

use std::time::{Duration, UNIX_EPOCH};
use vsfs_alloc::BitmapRegion;
use vsfs_core::{
    ByteBlockDevice, FileKind, Filesystem, FormatOptions, FsOps, MemByteDevice, MtimeUpdate,
    S_IFREG, VSFS_BLOCK_SIZE, VsfsError, format,
};

const MODE: u32 = S_IFREG | 0o644;

/// Format a fresh in-memory image, keeping a handle on the backing store
/// so tests can inspect raw metadata behind the engine's back.
fn fresh_fs(blocks: u32, inodes: u32) -> (Filesystem, MemByteDevice) {
    let mem = MemByteDevice::new(blocks as usize * VSFS_BLOCK_SIZE as usize);
    let dev = ByteBlockDevice::new(mem.clone()).unwrap();
    format(&dev, &FormatOptions { num_inodes: inodes }).unwrap();
    let fs = Filesystem::open(Box::new(dev)).unwrap();
    (fs, mem)
}

#[test]
fn create_reports_empty_file_attributes() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/hello", MODE).unwrap();

    let attr = fs.get_attributes("/hello").unwrap();
    assert_eq!(attr.kind, FileKind::RegularFile);
    assert_eq!(attr.mode, MODE);
    assert_eq!(attr.nlink, 1);
    assert_eq!(attr.size, 0);
    assert_eq!(attr.blocks, 0);
}

#[test]
fn root_attributes_after_format() {
    let (fs, _mem) = fresh_fs(64, 64);
    let attr = fs.get_attributes("/").unwrap();
    assert_eq!(attr.kind, FileKind::Directory);
    assert_eq!(attr.nlink, 2);
    assert_eq!(attr.size, 0);
    assert_eq!(attr.blocks, 0);
}

#[test]
fn write_then_read_roundtrip() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/data", MODE).unwrap();

    let payload: Vec<u8> = (0_u32..1000).map(|i| (i % 251) as u8).collect();
    let written = fs.write("/data", 0, &payload).unwrap();
    assert_eq!(written, payload.len());

    let back = fs.read("/data", 0, payload.len()).unwrap();
    assert_eq!(back, payload);

    let attr = fs.get_attributes("/data").unwrap();
    assert_eq!(attr.size, 1000);
    assert_eq!(attr.blocks, 8);
}

#[test]
fn read_past_eof_is_empty_not_error() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/f", MODE).unwrap();

    // Empty file.
    assert!(fs.read("/f", 0, 16).unwrap().is_empty());

    fs.write("/f", 0, b"abc").unwrap();
    assert!(fs.read("/f", 3, 16).unwrap().is_empty());
    assert!(fs.read("/f", 100, 16).unwrap().is_empty());
}

#[test]
fn read_clamps_to_file_end_in_final_block() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/f", MODE).unwrap();
    fs.write("/f", 0, b"hello world").unwrap();

    // Asking for more than remains returns only the live bytes.
    assert_eq!(fs.read("/f", 6, 4096).unwrap(), b"world");
}

#[test]
fn read_clamps_to_block_boundary_in_interior_block() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/f", MODE).unwrap();

    let block = vec![0x41_u8; VSFS_BLOCK_SIZE as usize];
    fs.write("/f", 0, &block).unwrap();
    fs.write("/f", u64::from(VSFS_BLOCK_SIZE), b"tail").unwrap();

    // Request spans past block 0's end; the accessor does not loop across
    // blocks, so the result stops at the boundary.
    let got = fs.read("/f", 4000, 500).unwrap();
    assert_eq!(got.len(), 96);
    assert!(got.iter().all(|b| *b == 0x41));
}

#[test]
fn write_at_offset_beyond_eof_zero_fills_the_hole() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/f", MODE).unwrap();

    fs.write("/f", 100, b"xyz").unwrap();
    let attr = fs.get_attributes("/f").unwrap();
    assert_eq!(attr.size, 103);

    let head = fs.read("/f", 0, 100).unwrap();
    assert_eq!(head, vec![0_u8; 100]);
    assert_eq!(fs.read("/f", 100, 3).unwrap(), b"xyz");
}

#[test]
fn remove_releases_everything_it_allocated() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    // The anchor forces the root's first directory block into existence;
    // directory blocks stay allocated after unlink (holes, not compaction).
    fs.create("/anchor", MODE).unwrap();
    let before = fs.get_stats();

    fs.create("/doomed", MODE).unwrap();
    fs.write("/doomed", 0, &[7_u8; 4096]).unwrap();
    fs.write("/doomed", 4096, &[8_u8; 100]).unwrap();
    assert!(fs.get_stats().free_blocks < before.free_blocks);

    fs.remove("/doomed").unwrap();
    let after = fs.get_stats();
    assert_eq!(after.free_blocks, before.free_blocks);
    assert_eq!(after.free_inodes, before.free_inodes);
    assert!(matches!(
        fs.get_attributes("/doomed"),
        Err(VsfsError::NotFound(_))
    ));
}

#[test]
fn unlink_hole_and_inode_are_reused_before_new_directory_block() {
    let (mut fs, _mem) = fresh_fs(128, 64);

    // Fill the first directory block completely (16 slots).
    for i in 0..16 {
        fs.create(&format!("/file{i:02}"), MODE).unwrap();
    }
    let stats_full = fs.get_stats();
    let victim_attr = fs.get_attributes("/file07").unwrap();

    fs.remove("/file07").unwrap();
    fs.create("/replacement", MODE).unwrap();
    let stats_after = fs.get_stats();

    // The freed inode number and the freed slot were both reused: no new
    // directory block was allocated.
    let replacement = fs.get_attributes("/replacement").unwrap();
    assert_eq!(replacement.ino, victim_attr.ino);
    assert_eq!(stats_after.free_blocks, stats_full.free_blocks);

    // The listing shows the replacement in the vacated slot position.
    let names = fs.list_names("/").unwrap();
    assert_eq!(names.len(), 16);
    assert_eq!(names[7], "replacement");
}

#[test]
fn seventeenth_entry_allocates_a_second_directory_block() {
    let (mut fs, _mem) = fresh_fs(128, 64);
    for i in 0..16 {
        fs.create(&format!("/file{i:02}"), MODE).unwrap();
    }
    let before = fs.get_stats();

    fs.create("/overflow", MODE).unwrap();
    let after = fs.get_stats();
    assert_eq!(after.free_blocks, before.free_blocks - 1);

    let root = fs.get_attributes("/").unwrap();
    assert_eq!(root.size, u64::from(VSFS_BLOCK_SIZE) * 2);
    assert_eq!(root.blocks, 16);
    assert_eq!(fs.list_names("/").unwrap().len(), 17);
}

#[test]
fn listing_streams_names_and_honors_filler_abort() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    for name in ["/a", "/b", "/c"] {
        fs.create(name, MODE).unwrap();
    }

    let names = fs.list_names("/").unwrap();
    assert_eq!(names, vec!["a", "b", "c"]);

    let mut seen = 0;
    let err = fs
        .list_entries("/", &mut |_name| {
            seen += 1;
            seen < 2
        })
        .unwrap_err();
    assert!(matches!(err, VsfsError::OutOfMemory));
    assert_eq!(seen, 2);
}

#[test]
fn set_mtime_variants() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    fs.create("/t", MODE).unwrap();

    let stamp = UNIX_EPOCH + Duration::new(1_600_000_000, 500);
    fs.set_mtime("/t", MtimeUpdate::At(stamp)).unwrap();
    assert_eq!(fs.get_attributes("/t").unwrap().mtime, stamp);

    // Omit succeeds without touching the stored stamp, even for a path
    // that would not resolve.
    fs.set_mtime("/t", MtimeUpdate::Omit).unwrap();
    fs.set_mtime("/missing", MtimeUpdate::Omit).unwrap();
    assert_eq!(fs.get_attributes("/t").unwrap().mtime, stamp);

    fs.set_mtime("/t", MtimeUpdate::Now).unwrap();
    assert!(fs.get_attributes("/t").unwrap().mtime > stamp);
}

#[test]
fn create_and_remove_touch_root_mtime() {
    let (mut fs, _mem) = fresh_fs(64, 64);
    let epoch = UNIX_EPOCH + Duration::new(5, 0);
    fs.set_mtime("/", MtimeUpdate::At(epoch)).unwrap();

    fs.create("/x", MODE).unwrap();
    let after_create = fs.get_attributes("/").unwrap().mtime;
    assert!(after_create > epoch);

    fs.set_mtime("/", MtimeUpdate::At(epoch)).unwrap();
    fs.remove("/x").unwrap();
    assert!(fs.get_attributes("/").unwrap().mtime > epoch);
}

#[test]
fn path_errors_are_distinguished() {
    let (mut fs, _mem) = fresh_fs(64, 64);

    assert!(matches!(
        fs.get_attributes("relative"),
        Err(VsfsError::NotAbsolute(_))
    ));
    assert!(matches!(
        fs.get_attributes("/missing"),
        Err(VsfsError::NotFound(_))
    ));

    let long = format!("/{}", "n".repeat(300));
    assert!(matches!(
        fs.get_attributes(&long),
        Err(VsfsError::NameTooLong)
    ));
    assert!(matches!(
        fs.create(&long, MODE),
        Err(VsfsError::NameTooLong)
    ));
}

#[test]
fn create_fails_cleanly_when_inodes_run_out() {
    // Two inodes: root plus one file.
    let (mut fs, _mem) = fresh_fs(64, 2);
    fs.create("/only", MODE).unwrap();

    let stats = fs.get_stats();
    assert_eq!(stats.free_inodes, 0);
    assert!(matches!(fs.create("/more", MODE), Err(VsfsError::NoSpace)));

    // Nothing leaked by the failed attempt.
    let after = fs.get_stats();
    assert_eq!(after.free_blocks, stats.free_blocks);
    assert_eq!(fs.list_names("/").unwrap(), vec!["only"]);
}

#[test]
fn superblock_counters_match_bitmap_popcounts_after_workload() {
    let (mut fs, mem) = fresh_fs(128, 64);

    for i in 0..20 {
        fs.create(&format!("/w{i}"), MODE).unwrap();
        fs.write(&format!("/w{i}"), 0, &[i as u8; 512]).unwrap();
    }
    for i in (0..20).step_by(3) {
        fs.remove(&format!("/w{i}")).unwrap();
    }

    let stats = fs.get_stats();
    let geo = *fs.geometry();

    // Count the zero bits directly in the raw image.
    let view = ByteBlockDevice::new(mem).unwrap();
    let ibmap = BitmapRegion::new(geo.inode_bitmap_start, stats.num_inodes);
    let dbmap = BitmapRegion::new(geo.data_bitmap_start, stats.num_blocks);
    assert_eq!(ibmap.count_free(&view).unwrap(), stats.free_inodes);
    assert_eq!(dbmap.count_free(&view).unwrap(), stats.free_blocks);
}

#[test]
fn reopening_the_image_preserves_state() {
    let (mut fs, mem) = fresh_fs(64, 64);
    fs.create("/persist", MODE).unwrap();
    fs.write("/persist", 0, b"durable bytes").unwrap();
    let stats = fs.get_stats();
    drop(fs);

    let reopened = Filesystem::open(Box::new(ByteBlockDevice::new(mem).unwrap())).unwrap();
    assert_eq!(reopened.get_stats(), stats);
    assert_eq!(reopened.read("/persist", 0, 64).unwrap(), b"durable bytes");
}

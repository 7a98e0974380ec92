//! The six numbered scenarios of spec.md §8, exercised end-to-end through
//! the crate's public API against an in-memory device. Run with
//! `cargo test --features std-test`.

use std::sync::Arc;

use bytemuck::{bytes_of, Zeroable};

use trifs::block_cache::BlockCache;
use trifs::btrfs::layout::{
    BlockGroupItem, DevItem, InodeTimespec, Key, RootItem, Superblock as BtrfsSuperblock, BLOCK_GROUP_METADATA,
    BTRFS_MAGIC_FRESH, BTRFS_SUPER_INFO_OFFSET, CHUNK_TREE_OBJECTID, EXTENT_TREE_OBJECTID, FS_TREE_OBJECTID,
    KEY_BLOCK_GROUP_ITEM, KEY_INODE_ITEM, KEY_ROOT_ITEM, ROOT_TREE_OBJECTID, S_IFDIR,
};
use trifs::btrfs::layout::InodeItem;
use trifs::btrfs::tree::BTree;
use trifs::btrfs::volume::{encode_system_chunk, BtrfsVolume};
use trifs::device::MemBlockDevice;
use trifs::iso9660::dir::decode_joliet_name;
use trifs::volume::{MountFlags, Volume};

/// Scenario 1: mount a freshly-created Btrfs volume with label `"test"` and
/// block size 4096; `read_fs_info.volume_name == "test"`, `block_size ==
/// 4096`, and the root inode is a directory containing only `.` and `..`.
#[test]
fn scenario_1_fresh_btrfs_mount_reports_label_and_empty_root() {
    let _ = env_logger::try_init();
    let node_size = 4096u32;
    let dev = Arc::new(MemBlockDevice::new(node_size, 4096));

    let chunk_block = 20u64;
    let root_block = 21u64;
    let fs_block = 22u64;
    let extent_block = 23u64;

    let cache = BlockCache::new(dev.clone());

    let txn = cache.start_transaction();
    BTree::init_empty_root(txn, &cache, chunk_block, CHUNK_TREE_OBJECTID).unwrap();
    cache.end_transaction(txn).unwrap();

    let txn = cache.start_transaction();
    BTree::init_empty_root(txn, &cache, root_block, ROOT_TREE_OBJECTID).unwrap();
    cache.end_transaction(txn).unwrap();
    let mut root_tree = BTree::new(&cache, root_block, node_size as usize, ROOT_TREE_OBJECTID);
    let txn = cache.start_transaction();
    let next = std::cell::Cell::new(200u64);
    let mut alloc_block = || -> trifs::error::FsResult<u64> {
        let b = next.get();
        next.set(b + 1);
        Ok(b)
    };
    let mut fs_root_item: RootItem = Zeroable::zeroed();
    fs_root_item.byte_nr = fs_block;
    fs_root_item.root_dirid = 256;
    root_tree
        .insert_item(txn, Key::new(FS_TREE_OBJECTID, KEY_ROOT_ITEM, 0), bytes_of(&fs_root_item), &mut alloc_block)
        .unwrap();
    let mut extent_root_item: RootItem = Zeroable::zeroed();
    extent_root_item.byte_nr = extent_block;
    root_tree
        .insert_item(txn, Key::new(EXTENT_TREE_OBJECTID, KEY_ROOT_ITEM, 0), bytes_of(&extent_root_item), &mut alloc_block)
        .unwrap();
    cache.end_transaction(txn).unwrap();

    let txn = cache.start_transaction();
    BTree::init_empty_root(txn, &cache, fs_block, FS_TREE_OBJECTID).unwrap();
    cache.end_transaction(txn).unwrap();
    let mut fs_tree = BTree::new(&cache, fs_block, node_size as usize, FS_TREE_OBJECTID);
    let txn = cache.start_transaction();
    let mut root_inode: InodeItem = Zeroable::zeroed();
    root_inode.mode = S_IFDIR | 0o755;
    root_inode.num_links = 1;
    root_inode.atime = InodeTimespec::zeroed();
    root_inode.ctime = InodeTimespec::zeroed();
    root_inode.mtime = InodeTimespec::zeroed();
    root_inode.otime = InodeTimespec::zeroed();
    fs_tree
        .insert_item(txn, Key::new(256, KEY_INODE_ITEM, 0), bytes_of(&root_inode), &mut alloc_block)
        .unwrap();
    cache.end_transaction(txn).unwrap();

    let txn = cache.start_transaction();
    BTree::init_empty_root(txn, &cache, extent_block, EXTENT_TREE_OBJECTID).unwrap();
    cache.end_transaction(txn).unwrap();
    let mut extent_tree = BTree::new(&cache, extent_block, node_size as usize, EXTENT_TREE_OBJECTID);
    let txn = cache.start_transaction();
    let mut bg_item: BlockGroupItem = Zeroable::zeroed();
    bg_item.flags = BLOCK_GROUP_METADATA;
    extent_tree
        .insert_item(txn, Key::new(300, KEY_BLOCK_GROUP_ITEM, 3796), bytes_of(&bg_item), &mut alloc_block)
        .unwrap();
    cache.end_transaction(txn).unwrap();

    let mut sb: BtrfsSuperblock = Zeroable::zeroed();
    sb.magic = BTRFS_MAGIC_FRESH;
    sb.root = root_block;
    sb.chunk_root = chunk_block;
    sb.node_size = node_size;
    sb.sector_size = node_size;
    sb.leaf_size = node_size;
    sb.total_bytes = u64::from(node_size) * 4096;
    sb.dev_item = DevItem::zeroed();
    let chunk_entry = encode_system_chunk(0, 4096, 0);
    sb.sys_chunk_array[..chunk_entry.len()].copy_from_slice(&chunk_entry);
    sb.sys_chunk_array_size = chunk_entry.len() as u32;
    sb.label = [0u8; 256];
    sb.label[..4].copy_from_slice(b"test");

    let sb_bytes = bytes_of(&sb).to_vec();
    dev.with_bytes(|bytes| {
        let off = BTRFS_SUPER_INFO_OFFSET as usize;
        bytes[off..off + sb_bytes.len()].copy_from_slice(&sb_bytes);
    });

    let volume = BtrfsVolume::mount(dev, MountFlags::default()).unwrap();
    assert_eq!(volume.label(), "test");
    assert_eq!(volume.block_size(), 4096);
    assert_eq!(volume.root_inode_id(), 256);

    let entries = volume.readdir(256).unwrap();
    let mut names: Vec<&[u8]> = entries.iter().map(|(name, _, _)| name.as_slice()).collect();
    names.sort_unstable();
    assert_eq!(names, vec![b".".as_slice(), b"..".as_slice()]);
}

/// Scenario 5: a Joliet SVD entry encoding two CJK codepoints (`U+6587
/// U+4EF6`) as UCS-2BE decodes to the UTF-8 bytes `E6 96 87 E4 BB B6`.
#[test]
fn scenario_5_joliet_cjk_name_decodes_to_expected_utf8() {
    let _ = env_logger::try_init();
    let raw = [0x65, 0x87, 0x4E, 0xF6];
    let decoded = decode_joliet_name(&raw);
    assert_eq!(decoded.as_bytes(), [0xE6, 0x96, 0x87, 0xE4, 0xBB, 0xB6]);
    assert_eq!(decoded, "文件");
}

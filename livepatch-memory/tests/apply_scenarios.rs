//! End-to-end applier and synchronizer behaviour against real page
//! protections. Every target lives in an anonymous mapping owned by the test,
//! so nothing outside the test's own memory is rewritten.

use livepatch_core::{RawRemapping, Remapping, RemappingTable, FUNC_PATCH_LEN};
use livepatch_memory::{
    page_size, sync_global, ApplyError, PatchApplier, Quiesced,
};
use memmap2::MmapMut;

fn quiesced() -> Quiesced {
    // The test harness runs other threads, none of which touch these mappings.
    unsafe { Quiesced::assume() }
}

fn table(storage: &[RawRemapping]) -> RemappingTable<'_> {
    RemappingTable::new(storage, storage.len()).expect("table")
}

// ---------------------------------------------------------------------------
// Func entries
// ---------------------------------------------------------------------------

/// `mov eax, imm32; ret`, padded to 16 bytes with `nop`.
#[cfg(target_arch = "x86_64")]
fn return_const(value: u32) -> [u8; FUNC_PATCH_LEN] {
    let mut code = [0x90u8; FUNC_PATCH_LEN];
    code[0] = 0xB8;
    code[1..5].copy_from_slice(&value.to_le_bytes());
    code[5] = 0xC3;
    code
}

#[cfg(target_arch = "x86_64")]
#[test]
fn patched_function_entry_runs_the_stub() {
    let page = page_size();
    let mut map = MmapMut::map_anon(page).expect("map");
    map.fill(0xCC);
    map[..FUNC_PATCH_LEN].copy_from_slice(&return_const(1));
    let code = map.make_exec().expect("make exec");
    let entry = code.as_ptr() as usize;

    let target: extern "C" fn() -> u32 = unsafe { std::mem::transmute(entry) };
    assert_eq!(target(), 1);

    let storage = [RawRemapping::encode(&Remapping::func(entry, 0, return_const(42)))];
    let report = unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }
        .expect("apply");

    assert_eq!(report.applied, 1);
    assert_eq!(target(), 42);
    assert_eq!(&code[..FUNC_PATCH_LEN], &return_const(42));
    assert!(
        code[FUNC_PATCH_LEN..].iter().all(|b| *b == 0xCC),
        "bytes past the 16-byte entry must be untouched"
    );
}

#[test]
fn func_entry_straddling_a_page_boundary_is_written_whole() {
    let page = page_size();
    let mut map = MmapMut::map_anon(2 * page).expect("map");
    map.fill(0x11);
    let frozen = map.make_read_only().expect("read only");
    let entry = frozen.as_ptr() as usize + page - 8;
    let stub = [0xABu8; FUNC_PATCH_LEN];

    let storage = [RawRemapping::encode(&Remapping::func(entry, 0, stub))];
    unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }.expect("apply");

    let offset = page - 8;
    assert_eq!(&frozen[offset..offset + FUNC_PATCH_LEN], &stub);
    assert!(frozen[..offset].iter().all(|b| *b == 0x11));
    assert!(frozen[offset + FUNC_PATCH_LEN..].iter().all(|b| *b == 0x11));
}

#[test]
fn applier_never_rewrites_its_own_entry() {
    let entry = PatchApplier::entry_address();
    let before: [u8; FUNC_PATCH_LEN] =
        unsafe { std::ptr::read(entry as *const [u8; FUNC_PATCH_LEN]) };

    let scratch = [0u8; 4];
    let mut sink = [0u8; 4];
    let filler = RawRemapping::encode(&Remapping::mem(
        scratch.as_ptr() as usize,
        sink.as_mut_ptr() as usize,
        4,
    ));
    let hostile = RawRemapping::encode(&Remapping::func(entry, 0, [0xCC; FUNC_PATCH_LEN]));

    for position in 0..3 {
        let mut storage = [filler; 3];
        storage[position] = hostile;
        let report = unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }
            .expect("apply");
        assert_eq!(report.skipped, 1, "position {position}");
        assert_eq!(report.applied, 2, "position {position}");
    }

    let after: [u8; FUNC_PATCH_LEN] =
        unsafe { std::ptr::read(entry as *const [u8; FUNC_PATCH_LEN]) };
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// Mem entries
// ---------------------------------------------------------------------------

#[test]
fn global_value_migrates_into_read_only_storage() {
    let counter = Box::new(42u32);
    let map = MmapMut::map_anon(page_size()).expect("map");
    let storage_page = map.make_read_only().expect("read only");
    let new_addr = storage_page.as_ptr() as usize + 64;

    let storage = [RawRemapping::encode(&Remapping::mem(
        &*counter as *const u32 as usize,
        new_addr,
        4,
    ))];
    unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }.expect("apply");

    let migrated = u32::from_ne_bytes(storage_page[64..68].try_into().expect("4 bytes"));
    assert_eq!(migrated, 42);
    assert_eq!(*counter, 42, "source is left intact");
}

#[cfg(target_arch = "x86_64")]
#[test]
fn global_migrated_next_to_code_leaves_that_code_runnable() {
    let page = page_size();
    let mut map = MmapMut::map_anon(page).expect("map");
    map.fill(0xCC);
    map[..FUNC_PATCH_LEN].copy_from_slice(&return_const(1));
    let code = map.make_exec().expect("make exec");
    let entry = code.as_ptr() as usize;
    let target: extern "C" fn() -> u32 = unsafe { std::mem::transmute(entry) };
    assert_eq!(target(), 1);

    let counter = Box::new(0x5EED_u64);
    let storage = [RawRemapping::encode(&Remapping::mem(
        &*counter as *const u64 as usize,
        entry + 512,
        8,
    ))];
    let report = unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }
        .expect("apply");

    assert_eq!(report.applied, 1);
    let migrated = u64::from_ne_bytes(code[512..520].try_into().expect("8 bytes"));
    assert_eq!(migrated, 0x5EED);
    // Faults if the migration dropped EXEC from the shared page.
    assert_eq!(target(), 1);
}

#[test]
fn empty_table_is_a_successful_no_op() {
    let storage: [RawRemapping; 0] = [];
    let report =
        unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }.expect("apply");
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 0);
}

// ---------------------------------------------------------------------------
// Partial failure
// ---------------------------------------------------------------------------

#[cfg(target_pointer_width = "64")]
#[test]
fn protection_failure_leaves_later_entries_unapplied() {
    let page = page_size();
    // The last page of the address space is never user-mappable.
    let unmappable = usize::MAX & !(page - 1);
    let src = 7u64;
    let mut dest = 0u64;

    let storage = [
        RawRemapping::encode(&Remapping::func(unmappable, 0, [0x90; FUNC_PATCH_LEN])),
        RawRemapping::encode(&Remapping::mem(
            &src as *const u64 as usize,
            &mut dest as *mut u64 as usize,
            8,
        )),
    ];

    let err = unsafe { PatchApplier::new().apply(&table(&storage), &quiesced()) }.unwrap_err();

    match &err {
        ApplyError::Protection { index, page: failed, .. } => {
            assert_eq!(*index, 0);
            assert_eq!(*failed, unmappable);
        }
        other => panic!("expected protection failure, got {other:?}"),
    }
    assert_eq!(dest, 0, "the second entry must not be applied");
}

// ---------------------------------------------------------------------------
// Global synchronizer
// ---------------------------------------------------------------------------

#[test]
fn sync_into_read_only_page_stays_inside_that_page() {
    let page = page_size();
    let mut map = MmapMut::map_anon(3 * page).expect("map");
    map.fill(0x5A);
    let frozen = map.make_read_only().expect("read only");
    let dest_offset = page + 100;
    let dest = unsafe { frozen.as_ptr().add(dest_offset) as *mut u8 };
    let value = 0x0102_0304_0506_0708u64.to_ne_bytes();

    unsafe { sync_global(dest, value.as_ptr(), value.len(), true) }.expect("sync");

    assert_eq!(&frozen[dest_offset..dest_offset + 8], &value);
    assert!(frozen[..dest_offset].iter().all(|b| *b == 0x5A));
    assert!(frozen[dest_offset + 8..].iter().all(|b| *b == 0x5A));
}

#[test]
fn sync_without_to_me_copies_into_writable_memory() {
    let src = [1u8, 2, 3, 4, 5];
    let mut dest = [0u8; 5];
    unsafe { sync_global(dest.as_mut_ptr(), src.as_ptr(), 5, false) }.expect("sync");
    assert_eq!(dest, src);
}

use chipdrive::source::{DataSource, SourceOptions};

mod common;
use common::{MemStorage, patterned_bytes};

const PAGE: usize = 4_096;

fn opts() -> SourceOptions {
    SourceOptions {
        resident_ceiling: 1 << 20,
        page_size: PAGE,
    }
}

#[test]
fn small_files_load_resident() {
    let data = patterned_bytes(10_000);
    let src = DataSource::open(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();
    assert!(!src.is_streamed());
    assert_eq!(src.len(), 10_000);
}

#[test]
fn resident_and_streamed_reads_are_equivalent() {
    let data = patterned_bytes(PAGE * 5 + 123);
    let storage = MemStorage::new(data.clone());

    let mut resident = DataSource::open(Box::new(storage.clone()), &opts()).unwrap();
    let mut streamed = DataSource::open_streamed(Box::new(storage), &opts()).unwrap();
    assert!(streamed.is_streamed());

    for i in 0..data.len() {
        let a = resident.read_u8().unwrap();
        let b = streamed.read_u8().unwrap();
        assert_eq!(a, b, "byte {} differs between modes", i);
        assert_eq!(a, data[i]);
    }
}

#[test]
fn absolute_reads_match_in_both_modes() {
    let data = patterned_bytes(PAGE * 4);
    let storage = MemStorage::new(data.clone());

    let mut resident = DataSource::open(Box::new(storage.clone()), &opts()).unwrap();
    let mut streamed = DataSource::open_streamed(Box::new(storage), &opts()).unwrap();

    // Header cache, in-page and out-of-window offsets.
    for off in [0u64, 100, 255, 256, 4_000, (PAGE * 3 + 17) as u64] {
        assert_eq!(
            resident.read_u32_at(off).unwrap(),
            streamed.read_u32_at(off).unwrap()
        );
    }
}

#[test]
fn page_flip_happens_after_exactly_one_page_of_reads() {
    let data = patterned_bytes(PAGE * 4);
    let mut src = DataSource::open_streamed(Box::new(MemStorage::new(data)), &opts()).unwrap();

    for _ in 0..PAGE - 1 {
        src.read_u8().unwrap();
    }
    assert_eq!(src.stats().page_flips, 0);

    src.read_u8().unwrap();
    let stats = src.stats();
    assert_eq!(stats.page_flips, 1);
    assert_eq!(stats.refills_queued + stats.refills_dropped, 1);
}

#[test]
fn sequential_reads_survive_many_page_flips() {
    // Enough data that the background refill has to keep up for several
    // rounds; every byte must still come back in order.
    let data = patterned_bytes(PAGE * 16);
    let mut src =
        DataSource::open_streamed(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();

    for (i, expected) in data.iter().enumerate() {
        assert_eq!(src.read_u8().unwrap(), *expected, "byte {}", i);
    }
    // One flip per consumed page, including the final one.
    assert_eq!(src.stats().page_flips, 16);
}

#[test]
fn refill_pads_from_the_loop_restart_offset() {
    let data = patterned_bytes(PAGE * 4);
    let data_end = (PAGE * 2 + 100) as u64;
    let loop_start = 500u64;

    let mut src =
        DataSource::open_streamed(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();
    src.set_stream_window(data_end, Some(loop_start));

    // Re-prime the window from a position near the end of the data so the
    // second page crosses the boundary.
    src.set_pos(PAGE as u64 * 2);
    let mut got = Vec::new();
    for _ in 0..200 {
        got.push(src.read_u8().unwrap());
    }

    // First 100 bytes are the tail of the data, the rest wraps to the
    // loop restart offset.
    assert_eq!(&got[..100], &data[PAGE * 2..PAGE * 2 + 100]);
    assert_eq!(&got[100..200], &data[500..600]);
}

#[test]
fn without_a_loop_the_source_ends_at_the_data_end() {
    let data = patterned_bytes(PAGE * 3);
    let data_end = (PAGE * 2 + 10) as u64;

    let mut src =
        DataSource::open_streamed(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();
    src.set_stream_window(data_end, None);
    src.set_pos(PAGE as u64 * 2);

    for _ in 0..10 {
        src.read_u8().unwrap();
    }
    assert!(src.read_u8().is_err());
}

#[test]
fn set_pos_within_the_active_page_is_a_plain_seek() {
    let data = patterned_bytes(PAGE * 4);
    let mut src =
        DataSource::open_streamed(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();

    src.set_pos(100);
    assert_eq!(src.pos(), 100);
    assert_eq!(src.read_u8().unwrap(), data[100]);
}

#[test]
fn loop_seek_outside_the_window_represents_the_target() {
    let data = patterned_bytes(PAGE * 8);
    let mut src =
        DataSource::open_streamed(Box::new(MemStorage::new(data.clone())), &opts()).unwrap();

    // Walk deep into the stream, then loop back near the start.
    for _ in 0..PAGE * 3 {
        src.read_u8().unwrap();
    }
    src.set_pos(64);
    for i in 0..PAGE {
        assert_eq!(src.read_u8().unwrap(), data[64 + i], "byte {}", i);
    }
}

#[test]
fn streamed_mode_works_over_a_real_file() {
    use std::io::Write;

    let data = patterned_bytes(PAGE * 6 + 37);
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&data).unwrap();
    tmp.flush().unwrap();

    let storage = chipdrive::FsStorage::open(tmp.path()).unwrap();
    let mut src = DataSource::open_streamed(Box::new(storage), &opts()).unwrap();
    assert_eq!(src.len(), data.len() as u64);

    for (i, expected) in data.iter().enumerate() {
        assert_eq!(src.read_u8().unwrap(), *expected, "byte {}", i);
    }
    assert!(src.read_u8().is_err());
}

#[test]
fn cursor_composes_little_endian_values() {
    let mut src = DataSource::from_bytes(vec![0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB, 0xCC]);
    assert_eq!(src.read_u32().unwrap(), 0x0403_0201);
    assert_eq!(src.read_u24().unwrap(), 0x00CC_BBAA);
    assert!(src.read_u8().is_err());
}

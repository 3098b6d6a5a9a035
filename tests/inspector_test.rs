#![allow(missing_docs)]

mod common;

use common::{Bytes, LE32, LE64, TestApp, schema};
use driftfile::chunk::ChunkStatus;
use driftfile::inspector::{SchemaComparison, hex_dump};
use driftfile::schema::SchemaGraph;
use driftfile::{AtomicType, Drift, DriftInspector, LoadOptions, SaveOptions};

const ITEM: &[(&str, &str)] = &[("int", "id"), ("float", "weight"), ("char", "label[4]")];

fn item_app() -> TestApp {
    TestApp::new(schema(LE64, &[("Item", ITEM)]))
        .with_struct("IT", "Item", 0x10, 2, vec![0; 24])
        .with_raw("DATA", 0x20, AtomicType::Short, vec![0; 6])
}

#[test]
fn test_file_report_lists_every_chunk() -> driftfile::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("items.drift");
    Drift::save(&path, &item_app(), &SaveOptions::for_platform(LE64))?;

    let report = DriftInspector::inspect(&path)?;
    assert_eq!(report.signature, "DRFTEST");
    assert_eq!(report.version, 42);
    assert_eq!(report.platform, LE64);
    assert!(!report.compressed);
    assert_eq!(report.file_size, std::fs::metadata(&path)?.len());

    let codes: Vec<&str> = report.chunks.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, ["IT", "DATA", "DNA1", "ENDB"]);
    assert!(report.chunks.iter().all(|c| c.status == ChunkStatus::Ok));
    assert_eq!(report.chunks[0].type_name.as_deref(), Some("Item"));
    assert_eq!(report.chunks[0].count, 2);
    assert_eq!(report.chunks[1].type_name.as_deref(), Some("short"));
    assert_eq!(report.chunks[2].type_name, None);

    let summary = report.schema.as_ref().expect("schema summary");
    assert_eq!(summary.first_user_struct, 13);
    assert_eq!(summary.struct_count, 14);
    assert!(summary.link_status.is_ok());
    assert!(summary.undefined_types.is_empty());

    let text = report.to_string();
    assert!(text.starts_with("=== DRIFTFILE INSPECTOR REPORT ==="));
    assert!(text.contains("├── "));
    assert!(text.contains("└── "));
    assert!(text.contains("Item"));
    Ok(())
}

#[test]
fn test_file_report_serializes_to_json() -> driftfile::Result<()> {
    let bytes = Drift::to_bytes(&item_app(), &SaveOptions::for_platform(LE32))?;
    let report = DriftInspector::inspect_bytes(&bytes)?;
    let json = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(json["signature"], "DRFTEST");
    assert_eq!(json["chunks"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["chunks"][0]["code"], "IT");
    assert_eq!(json["chunks"][0]["address"], 0x10);
    assert_eq!(json["chunks"][0]["status"], "Ok");
    Ok(())
}

#[test]
fn test_report_stops_at_a_malformed_header() -> driftfile::Result<()> {
    let mut bytes = Drift::to_bytes(&item_app(), &SaveOptions::for_platform(LE64))?;
    let second = driftfile::format::FILE_HEADER_SIZE + 24 + 24;
    bytes[second + 1] = 0x7f;

    let report = DriftInspector::inspect_bytes(&bytes)?;
    assert_eq!(report.chunks.len(), 2);
    assert_eq!(report.chunks[1].status, ChunkStatus::CodeError);
    assert!(report.schema.is_none());
    Ok(())
}

#[test]
#[cfg(feature = "lz4_flex")]
fn test_compressed_stream_is_reported() -> driftfile::Result<()> {
    let options = SaveOptions::for_platform(LE64).with_compression(1);
    let bytes = Drift::to_bytes(&item_app(), &options)?;
    let report = DriftInspector::inspect_bytes(&bytes)?;
    assert!(report.compressed);
    assert_eq!(report.file_size, bytes.len() as u64);
    assert_eq!(report.chunks.len(), 4);
    Ok(())
}

#[test]
fn test_schema_comparison_pairs_leaves_by_key() -> driftfile::Result<()> {
    let file = SchemaGraph::parse(
        schema(LE32, &[("Item", ITEM), ("Old", &[("int", "v")])]),
        LE32,
    )?;
    let memory = SchemaGraph::parse(
        schema(
            LE64,
            &[
                ("Item", &[("char", "label[8]"), ("double", "weight"), ("short", "rank")]),
                ("New", &[("int", "v")]),
            ],
        ),
        LE64,
    )?;

    let cmp = SchemaComparison::new(&file, &memory);
    let names: Vec<&str> = cmp.structs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Item", "New", "Old"]);

    let item = &cmp.structs[0];
    assert_eq!(item.file_size, Some(12));
    assert_eq!(item.memory_size, Some(18));
    let paths: Vec<&str> = item.leaves.iter().map(|l| l.path.as_str()).collect();
    assert_eq!(paths, ["label", "weight", "rank", "id"]);

    let weight = &item.leaves[1];
    assert_eq!(weight.file.as_ref().map(|s| s.type_name.as_str()), Some("float"));
    assert_eq!(weight.memory.as_ref().map(|s| (s.offset, s.size)), Some((8, 8)));
    assert!(item.leaves[2].file.is_none());
    assert!(item.leaves[3].memory.is_none());

    assert_eq!(cmp.structs[1].file_size, None);
    assert_eq!(cmp.structs[2].memory_size, None);

    let text = cmp.to_string();
    assert!(text.contains("struct Item: 12b | 18b"));
    assert!(text.contains("struct Old: 4b | absent"));
    Ok(())
}

#[test]
fn test_hex_dump_rows() {
    let bytes: Vec<u8> = (0u8..20).map(|b| b + b'A').collect();
    let dump = hex_dump(&bytes, 0x100, 64);
    let rows: Vec<&str> = dump.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("00000100  41 42 43"));
    assert!(rows[0].ends_with("ABCDEFGHIJKLMNOP"));
    assert!(rows[1].starts_with("00000110  51 52 53 54 "));
    assert!(rows[1].ends_with("QRST"));

    let short = hex_dump(&[0u8; 40], 0, 16);
    assert_eq!(short.lines().count(), 2);
    assert!(short.ends_with("... 24 more bytes\n"));
}

#[test]
fn test_load_options_from_partial_json() {
    let options: LoadOptions =
        serde_json::from_str(r#"{ "strict_zero_check": true, "max_element_size": 512 }"#)
            .expect("options parse");
    assert!(options.strict_zero_check);
    assert_eq!(options.max_element_size, 512);
    assert_eq!(options.platform, LoadOptions::default().platform);
    assert!(!options.dump_chunks);

    let json = serde_json::to_string(&LoadOptions::for_platform(LE32)).expect("serializes");
    let back: LoadOptions = serde_json::from_str(&json).expect("parses");
    assert_eq!(back, LoadOptions::for_platform(LE32));
}

#[test]
fn test_diagnostics_do_not_change_results() -> driftfile::Result<()> {
    let app = TestApp::new(schema(LE32, &[("Item", ITEM), ("Old", &[("int", "v")])]))
        .with_struct(
            "IT",
            "Item",
            0x10,
            1,
            Bytes::new(LE32).i32(7).f32(0.5).chars("ab", 4).build(),
        )
        .with_struct("OL", "Old", 0x30, 1, Bytes::new(LE32).i32(1).build());
    let bytes = Drift::to_bytes(&app, &SaveOptions::for_platform(LE32))?;

    let mut reader = TestApp::new(schema(LE64, &[("Item", ITEM)]));
    let plain = Drift::load_bytes(&bytes, &mut reader, LoadOptions::for_platform(LE64))?;

    let mut noisy = LoadOptions::for_platform(LE64);
    noisy.check_duplicate_keys = true;
    noisy.strict_zero_check = true;
    noisy.log_dropped_objects = true;
    noisy.dump_chunks = true;
    noisy.dump_casts = true;
    noisy.compare_schemas = true;
    let loud = Drift::load_bytes(&bytes, &mut reader, noisy)?;

    assert_eq!(plain.dropped_objects(), 1);
    assert_eq!(loud.dropped_objects(), 1);
    assert_eq!(plain.objects().len(), loud.objects().len());
    for (a, b) in plain.objects().iter().zip(loud.objects()) {
        assert_eq!(a.data(), b.data());
        assert_eq!(a.load_address(), b.load_address());
    }
    Ok(())
}

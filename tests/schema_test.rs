#![allow(missing_docs)]

mod common;

use common::{BE32, LE32, LE64};
use driftfile::schema::{Declarator, LinkStatus, SchemaBuilder, SchemaGraph};
use driftfile::{DriftError, Status};

fn offsets(graph: &SchemaGraph, name: &str) -> Vec<(String, u32, u32)> {
    let s = graph.find_struct(name).expect("struct");
    s.leaves()
        .iter()
        .map(|l| (l.path.clone(), l.offset, l.size))
        .collect()
}

fn leaf(path: &str, offset: u32, size: u32) -> (String, u32, u32) {
    (path.to_string(), offset, size)
}

const NODE: &[(&str, &str)] = &[
    ("Node", "*next"),
    ("int", "id"),
    ("float", "pos[3]"),
    ("char", "name[6]"),
    ("short", "flags"),
];

#[test]
fn test_layout_depends_on_address_width() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Node", NODE)?;

    let wide = SchemaGraph::parse(b.build(LE64)?, LE64)?;
    assert!(wide.link_status().is_ok());
    assert_eq!(wide.find_struct("Node").expect("node").size, 32);
    assert_eq!(
        offsets(&wide, "Node"),
        vec![
            leaf("next", 0, 8),
            leaf("id", 8, 4),
            leaf("pos", 12, 12),
            leaf("name", 24, 6),
            leaf("flags", 30, 2),
        ]
    );

    let narrow = SchemaGraph::parse(b.build(BE32)?, BE32)?;
    assert_eq!(narrow.find_struct("Node").expect("node").size, 28);
    assert_eq!(offsets(&narrow, "Node")[4], leaf("flags", 26, 2));
    Ok(())
}

#[test]
fn test_blob_is_read_in_its_own_byte_order() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Node", NODE)?;
    let big = b.build(BE32)?;
    assert_eq!(&big[..8], b"SDNANAME");
    assert!(SchemaGraph::parse(big.clone(), BE32).is_ok());
    assert!(SchemaGraph::parse(big, LE32).is_err());
    Ok(())
}

#[test]
fn test_pseudo_structs_precede_user_structs() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Node", NODE)?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;
    let first = g.first_user_struct();
    assert_eq!(first, 13);
    for s in &g.structs()[..first as usize] {
        assert!(s.is_atomic());
        assert!(s.members.is_empty());
    }
    let node = g.struct_by_id(first).expect("node");
    assert_eq!(g.struct_name(node), "Node");
    assert!(g.struct_by_id(first + 1).is_none());
    assert!(g.find_type("Node").is_some());
    Ok(())
}

#[test]
fn test_sizes_converge_regardless_of_declaration_order() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Outer", &[("Inner", "inner"), ("int", "k")])?;
    b.add_struct("Inner", &[("double", "d"), ("int", "j[2]")])?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;

    assert_eq!(g.find_struct("Inner").expect("inner").size, 16);
    let outer = g.find_struct("Outer").expect("outer");
    assert_eq!(outer.size, 20);
    assert!(outer.flags.has_nested());
    assert_eq!(
        offsets(&g, "Outer"),
        vec![leaf("inner.d", 0, 8), leaf("inner.j", 8, 8), leaf("k", 16, 4)]
    );
    Ok(())
}

#[test]
fn test_undefined_types_are_reported_together() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("A", &[("Missing", "m"), ("int", "x")])?;
    b.add_struct("B", &[("Other", "o")])?;
    b.add_struct("C", &[("A", "a"), ("A", "*ok")])?;

    let g = SchemaGraph::parse(b.encode(LE64), LE64)?;
    assert!(g.link_status().contains(LinkStatus::UNDEFINED_TYPE));
    assert!(g.link_status().is_fatal());
    let undefined = g.undefined_types();
    assert!(undefined.contains(&"A.m: Missing".to_string()));
    assert!(undefined.contains(&"B.o: Other".to_string()));
    assert!(undefined.contains(&"C.a: A".to_string()));
    assert_eq!(undefined.len(), 3);

    assert!(matches!(g.ensure_linked(), Err(DriftError::Link(_))));
    let err = b.build(LE64).unwrap_err();
    assert_eq!(err.status(), Status::SchemaLink);
    Ok(())
}

#[test]
fn test_misalignment_is_tolerated() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Packed", &[("char", "c"), ("int", "i"), ("void", "*p")])?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;
    let s = g.find_struct("Packed").expect("packed");
    assert!(s.flags.misaligned());
    assert_eq!(g.link_status(), LinkStatus::MISALIGNED);
    assert!(!g.link_status().is_fatal());
    assert!(g.ensure_linked().is_ok());
    assert_eq!(s.size, 1 + 4 + 8);
    Ok(())
}

#[test]
fn test_recorded_size_must_match() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("S", &[("int", "a")])?;
    b.add_type("S", 12);
    let g = SchemaGraph::parse(b.encode(LE64), LE64)?;
    assert!(g.link_status().contains(LinkStatus::SIZE_MISMATCH));
    assert!(g.find_struct("S").expect("s").flags.size_mismatch());
    assert!(g.ensure_linked().is_err());
    Ok(())
}

#[test]
fn test_members_match_by_key_not_position() -> driftfile::Result<()> {
    let mut old = SchemaBuilder::new();
    old.add_struct("Point", &[("int", "x"), ("int", "y"), ("int", "legacy")])?;
    let mut new = SchemaBuilder::new();
    new.add_struct("Point", &[("float", "z"), ("double", "y"), ("short", "x")])?;

    let a = SchemaGraph::parse(old.build(LE32)?, LE32)?;
    let b = SchemaGraph::parse(new.build(LE64)?, LE64)?;
    let (pa, pb) = (a.find_struct("Point").expect("a"), b.find_struct("Point").expect("b"));

    let matched: Vec<(&str, &str)> = pb
        .leaves()
        .iter()
        .filter_map(|l| pa.leaf_by_key(l.key).map(|f| (l.path.as_str(), f.path.as_str())))
        .collect();
    assert_eq!(matched, vec![("y", "y"), ("x", "x")]);
    assert!(pa.member_by_key(pb.members[0].key).is_none());
    Ok(())
}

#[test]
fn test_nested_paths_hash_distinctly() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Point", &[("int", "x"), ("int", "y")])?;
    b.add_struct("Rect", &[("Point", "a"), ("Point", "b")])?;
    b.add_struct("Tri", &[("Point", "v[3]")])?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;

    let rect = g.find_struct("Rect").expect("rect");
    let paths: Vec<&str> = rect.leaves().iter().map(|l| l.path.as_str()).collect();
    assert_eq!(paths, ["a.x", "a.y", "b.x", "b.y"]);
    let mut keys: Vec<u64> = rect.leaves().iter().map(|l| l.key).collect();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), 4);

    let tri = g.find_struct("Tri").expect("tri");
    assert_eq!(tri.leaves().len(), 6);
    assert_eq!(tri.leaves()[3].path, "v[1].y");
    assert_eq!(tri.leaves()[3].offset, 12);

    // A second, independently built graph reproduces the same keys.
    let again = SchemaGraph::parse(b.build(BE32)?, BE32)?;
    let rect2 = again.find_struct("Rect").expect("rect");
    for (l, r) in rect.leaves().iter().zip(rect2.leaves()) {
        assert_eq!(l.key, r.key);
    }
    Ok(())
}

#[test]
fn test_absent_structs_are_flagged() -> driftfile::Result<()> {
    let mut old = SchemaBuilder::new();
    old.add_struct("Kept", &[("int", "a")])?;
    old.add_struct("Gone", &[("int", "b")])?;
    let mut new = SchemaBuilder::new();
    new.add_struct("Kept", &[("int", "a")])?;
    new.add_struct("Added", &[("int", "c")])?;

    let mut a = SchemaGraph::parse(old.build(LE64)?, LE64)?;
    let mut b = SchemaGraph::parse(new.build(LE64)?, LE64)?;
    a.mark_absent(&b);
    b.mark_absent(&a);
    assert!(!a.find_struct("Kept").expect("kept").flags.absent());
    assert!(a.find_struct("Gone").expect("gone").flags.absent());
    assert!(b.find_struct("Added").expect("added").flags.absent());
    Ok(())
}

#[test]
fn test_duplicate_hash_check_passes_on_distinct_strings() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Node", NODE)?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;
    assert!(g.verify_unique_hashes().is_ok());
    Ok(())
}

/// Rewrites the only occurrence of `from` in `blob`.
fn replace_once(blob: &mut [u8], from: &[u8], to: &[u8]) {
    let hits: Vec<usize> = blob
        .windows(from.len())
        .enumerate()
        .filter(|(_, w)| *w == from)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(hits.len(), 1, "{:?}", String::from_utf8_lossy(from));
    blob[hits[0]..hits[0] + to.len()].copy_from_slice(to);
}

#[test]
fn test_duplicate_hash_check_catches_repeated_strings() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Dup", &[("int", "beta"), ("short", "betb")])?;
    let mut blob = b.build(LE64)?;
    replace_once(&mut blob, b"betb\0", b"beta\0");

    let g = SchemaGraph::parse(blob, LE64)?;
    assert!(!g.link_status().is_fatal());
    let dup = g.verify_unique_hashes();
    assert!(dup.contains(LinkStatus::DUPLICATE_HASH));
    assert!(dup.is_fatal());

    let mut types = SchemaBuilder::new();
    types.add_type("Blob1", 4).add_type("Blob2", 4);
    types.add_struct("Holder", &[("Blob1", "a"), ("Blob2", "b")])?;
    let mut blob = types.build(LE64)?;
    replace_once(&mut blob, b"Blob2\0", b"Blob1\0");
    let g = SchemaGraph::parse(blob, LE64)?;
    assert!(g.verify_unique_hashes().contains(LinkStatus::DUPLICATE_HASH));
    Ok(())
}

#[test]
fn test_arrays_of_structs_are_bounded() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Inner", &[("char", "c")])?;
    b.add_struct("Big", &[("Inner", "cells[65535][65535]")])?;
    let err = SchemaGraph::parse(b.encode(LE64), LE64).unwrap_err();
    assert!(matches!(err, DriftError::Schema(_)), "{err}");
    assert_eq!(err.status(), Status::InvalidSchema);

    let mut b = SchemaBuilder::new();
    b.add_struct("Inner", &[("char", "c")])?;
    b.add_struct("Grid", &[("Inner", "cells[256][255]")])?;
    let g = SchemaGraph::parse(b.build(LE64)?, LE64)?;
    let grid = g.find_struct("Grid").expect("grid");
    assert_eq!(grid.leaves().len(), 256 * 255);
    assert_eq!(grid.leaves()[255].path, "cells[255].c");
    Ok(())
}

#[test]
fn test_nesting_depth_is_bounded() -> driftfile::Result<()> {
    let names: Vec<String> = (0..=33).map(|i| format!("Level{i}")).collect();
    let chain = |levels: usize| -> driftfile::Result<Vec<u8>> {
        let mut b = SchemaBuilder::new();
        b.add_struct(&names[0], &[("int", "v")])?;
        for i in 1..levels {
            b.add_struct(&names[i], &[(names[i - 1].as_str(), "inner")])?;
        }
        Ok(b.encode(LE64))
    };

    let g = SchemaGraph::parse(chain(33)?, LE64)?;
    let top = g.find_struct("Level32").expect("top");
    assert_eq!(top.leaves().len(), 1);
    assert!(top.leaves()[0].path.ends_with("inner.v"));

    let err = SchemaGraph::parse(chain(34)?, LE64).unwrap_err();
    assert_eq!(err.status(), Status::InvalidSchema);
    Ok(())
}

#[test]
fn test_malformed_blobs_are_rejected() -> driftfile::Result<()> {
    let mut b = SchemaBuilder::new();
    b.add_struct("Node", NODE)?;
    let blob = b.build(LE64)?;

    let mut bad_tag = blob.clone();
    bad_tag[..4].copy_from_slice(b"XDNA");
    let err = SchemaGraph::parse(bad_tag, LE64).unwrap_err();
    assert_eq!(err.status(), Status::InvalidSchema);

    for cut in [3, 10, blob.len() / 2, blob.len() - 1] {
        assert!(SchemaGraph::parse(blob[..cut].to_vec(), LE64).is_err(), "cut at {cut}");
    }
    assert!(b.add_struct("Node", &[("int", "again")]).is_err());
    Ok(())
}

#[test]
fn test_declarators() -> driftfile::Result<()> {
    let d = Declarator::parse("**items")?;
    assert_eq!((d.pointer_depth, d.array_len), (2, 1));
    assert_eq!(&"**items"[d.base.clone()], "items");

    let d = Declarator::parse("mat[4][4]")?;
    assert_eq!((d.pointer_depth, d.array_len), (0, 16));

    let d = Declarator::parse("*verts[3]")?;
    assert_eq!((d.pointer_depth, d.array_len), (1, 3));

    let d = Declarator::parse("(*callback)()")?;
    assert!(d.function_pointer);
    assert_eq!(d.pointer_depth, 1);

    assert_eq!(
        Declarator::parse("name[8]")?.base_hash,
        Declarator::parse("*name")?.base_hash
    );
    for bad in ["", "*", "x[0]", "x[", "x[a]", "x y"] {
        assert!(Declarator::parse(bad).is_err(), "{bad:?}");
    }
    Ok(())
}

#![allow(missing_docs)]

use driftfile::AtomicType;
use driftfile::atomic::{ATOMIC_TYPES, can_cast, cast, cast_ordered};
use driftfile::endian::{self, Endian};

fn to_bytes(values: &[f64], ty: AtomicType, order: Endian) -> Vec<u8> {
    // encode through a double -> ty cast so every test value starts in `ty`
    let src: Vec<u8> = values.iter().flat_map(|v| v.to_bits().to_ne_bytes()).collect();
    let mut out = vec![0u8; values.len() * ty.size()];
    cast_ordered(&src, Endian::NATIVE, &mut out, order, AtomicType::Double, ty, values.len())
        .expect("encode");
    out
}

fn round_trip(bytes: &[u8], a: AtomicType, b: AtomicType, n: usize) -> Vec<u8> {
    let mut wide = vec![0u8; n * b.size()];
    cast(bytes, &mut wide, a, b, n).expect("widen");
    let mut back = vec![0u8; n * a.size()];
    cast(&wide, &mut back, b, a, n).expect("narrow");
    back
}

#[test]
fn test_widening_pairs_are_invertible() {
    use AtomicType::*;
    let samples = [0.0, 1.0, -1.0, 100.0, -128.0, 127.0];
    let pairs = [
        (Char, Short),
        (Char, Int),
        (Char, Double),
        (UChar, UShort),
        (UChar, Int64),
        (Short, Int),
        (Short, Float),
        (Short, Double),
        (UShort, UInt),
        (Int, Double),
        (Int, Int64),
        (Long, Double),
        (UInt, UInt64),
        (Float, Double),
        (Int, Long),
    ];
    for (a, b) in pairs {
        let values: Vec<f64> = samples
            .iter()
            .copied()
            .filter(|v| !(a.name().starts_with('u') && *v < 0.0))
            .collect();
        let bytes = to_bytes(&values, a, Endian::NATIVE);
        assert_eq!(round_trip(&bytes, a, b, values.len()), bytes, "{a:?} -> {b:?}");
    }
}

#[test]
fn test_extreme_values_survive_widening() {
    let ints = to_bytes(&[f64::from(i32::MIN), f64::from(i32::MAX)], AtomicType::Int, Endian::NATIVE);
    assert_eq!(round_trip(&ints, AtomicType::Int, AtomicType::Double, 2), ints);

    let floats = to_bytes(&[f64::from(f32::MAX), f64::from(f32::MIN_POSITIVE), 0.1], AtomicType::Float, Endian::NATIVE);
    assert_eq!(round_trip(&floats, AtomicType::Float, AtomicType::Double, 3), floats);
}

#[test]
fn test_lossy_pair_is_not_invertible() {
    // 2^53 + 1 has no exact f64 representation, let alone f32.
    let v: i64 = (1 << 53) + 1;
    let src = v.to_ne_bytes();
    let mut f = [0u8; 4];
    cast(&src, &mut f, AtomicType::Int64, AtomicType::Float, 1).expect("cast");
    let mut back = [0u8; 8];
    cast(&f, &mut back, AtomicType::Float, AtomicType::Int64, 1).expect("cast");
    assert_ne!(i64::from_ne_bytes(back), v);
}

#[test]
fn test_narrowing_uses_numeric_conversion() {
    let src = 3.75f64.to_ne_bytes();
    let mut out = [0u8; 4];
    cast(&src, &mut out, AtomicType::Double, AtomicType::Int, 1).expect("cast");
    assert_eq!(i32::from_ne_bytes(out), 3);

    let src = 1.0e12f64.to_ne_bytes();
    let mut out = [0u8; 2];
    cast(&src, &mut out, AtomicType::Double, AtomicType::Short, 1).expect("cast");
    assert_eq!(i16::from_ne_bytes(out), i16::MAX);

    let src = (-5i32).to_ne_bytes();
    let mut out = [0u8; 4];
    cast(&src, &mut out, AtomicType::Int, AtomicType::Float, 1).expect("cast");
    assert_eq!(f32::from_ne_bytes(out), -5.0);
}

#[test]
fn test_cast_ordered_swaps_bytes() {
    let src = 0x0102_0304u32.to_le_bytes();
    let mut dst = [0u8; 4];
    cast_ordered(&src, Endian::Little, &mut dst, Endian::Big, AtomicType::UInt, AtomicType::UInt, 1)
        .expect("cast");
    assert_eq!(dst, [1, 2, 3, 4]);

    let src = 2.5f32.to_le_bytes();
    let mut dst = [0u8; 8];
    cast_ordered(&src, Endian::Little, &mut dst, Endian::Big, AtomicType::Float, AtomicType::Double, 1)
        .expect("cast");
    assert_eq!(f64::from_be_bytes(dst), 2.5);
}

#[test]
fn test_cast_rejects_void_and_short_buffers() {
    let mut dst = [0u8; 8];
    assert!(cast(&[0u8; 8], &mut dst, AtomicType::Void, AtomicType::Int, 1).is_err());
    assert!(cast(&[0u8; 4], &mut dst, AtomicType::Int, AtomicType::Int, 2).is_err());
    let mut small = [0u8; 4];
    assert!(cast(&[0u8; 8], &mut small, AtomicType::Int, AtomicType::Double, 1).is_err());
}

#[test]
fn test_can_cast_requires_known_numeric_types() {
    let int = AtomicType::Int.name_hash();
    let dbl = AtomicType::Double.name_hash();
    assert!(can_cast(int, dbl));
    assert!(!can_cast(int, AtomicType::Void.name_hash()));
    assert!(!can_cast(int, driftfile::hash::hash_str("Mesh")));
}

#[test]
fn test_atomic_table() {
    for (i, t) in ATOMIC_TYPES.iter().enumerate() {
        assert_eq!(t.index(), i);
        assert_eq!(AtomicType::from_name(t.name()), Some(*t));
        assert_eq!(AtomicType::from_hash(t.name_hash()), Some(*t));
    }
    assert_eq!(AtomicType::Long.size(), 4);
    assert_eq!(AtomicType::Int64.size(), 8);
    assert_eq!(AtomicType::Void.size(), 0);
    #[cfg(not(feature = "scalar-f64"))]
    assert_eq!(AtomicType::Scalar.size(), 4);
    #[cfg(feature = "scalar-f64")]
    assert_eq!(AtomicType::Scalar.size(), 8);
}

#[test]
fn test_endian_primitives() {
    assert_eq!(endian::swap16(0x1234), 0x3412);
    assert_eq!(endian::swap32(0x1122_3344), 0x4433_2211);
    assert_eq!(endian::swap64(0x0102_0304_0506_0708), 0x0807_0605_0403_0201);

    let mut a = [0x1234u16, 0xABCD];
    endian::swap16_array(&mut a);
    assert_eq!(a, [0x3412, 0xCDAB]);
    let mut b = [1u32, 2];
    endian::swap32_array(&mut b);
    assert_eq!(b, [1 << 24, 2 << 24]);
    let mut c = [1u64];
    endian::swap64_array(&mut c);
    assert_eq!(c, [1 << 56]);

    let mut raw = [1, 2, 3, 4, 5, 6, 7];
    endian::swap_in_place(&mut raw, 2);
    assert_eq!(raw, [2, 1, 4, 3, 6, 5, 7]);

    let mut buf = [0u8; 8];
    assert!(Endian::Big.write_uint(&mut buf, 4, 0xAABBCCDD));
    assert_eq!(&buf[..4], &[0xAA, 0xBB, 0xCC, 0xDD]);
    assert_eq!(Endian::Big.read_uint(&buf, 4), Some(0xAABBCCDD));
    assert_eq!(Endian::Little.read_uint(&buf, 3), None);
    assert_eq!(Endian::Little.flipped(), Endian::Big);
}

//! Property-based tests for the hz index algebra.
//!
//! Uses proptest to verify the coordinate and Z-key round trips over
//! random bit strings and random in-range inputs.

use hzvol::hz;
use hzvol::Vec3;
use proptest::prelude::*;

/// Strategy for a random bit string of up to 24 characters together with a
/// coordinate inside the power-of-two cube the string implies.
fn bits_and_coord() -> impl Strategy<Value = (String, Vec3)> {
    prop::collection::vec(0u8..3, 1..=24).prop_flat_map(|axes| {
        let bits: String = axes.iter().map(|a| char::from(b'0' + a)).collect();
        let count = |c: u8| axes.iter().filter(|&&a| a == c).count() as u32;
        let (nx, ny, nz) = (count(0), count(1), count(2));
        (0..1i64 << nx, 0..1i64 << ny, 0..1i64 << nz)
            .prop_map(move |(x, y, z)| (bits.clone(), Vec3::new(x, y, z)))
    })
}

/// Strategy for a random bit string and a Z key in its sentinel space
/// (the sentinel bit one position above the string is set).
fn bits_and_z() -> impl Strategy<Value = (String, u64)> {
    prop::collection::vec(0u8..3, 1..=24).prop_flat_map(|axes| {
        let bits: String = axes.iter().map(|a| char::from(b'0' + a)).collect();
        let n = axes.len() as u32;
        (0u64..1 << n).prop_map(move |raw| (bits.clone(), raw | (1u64 << n)))
    })
}

proptest! {
    /// Every in-cube coordinate survives the trip through its hz index.
    #[test]
    fn hz_roundtrip((bits, coord) in bits_and_coord()) {
        let hz = hz::xyz_to_hz(&bits, coord);
        prop_assert_eq!(hz::hz_to_xyz(&bits, hz), coord);
    }

    /// Every Z key survives the trip through its hz index.
    #[test]
    fn z_roundtrip((bits, z) in bits_and_z()) {
        let hz = hz::z_to_hz(&bits, z);
        prop_assert_eq!(hz::hz_to_z_auto(&bits, hz), z);
    }

    /// The hz level recovered from an index matches the level the index
    /// was built at.
    #[test]
    fn level_recovery((bits, coord) in bits_and_coord()) {
        let hz = hz::xyz_to_hz(&bits, coord);
        let level = hz::hz_to_level(hz);
        prop_assert!(level as usize <= bits.len());
        if hz > 0 {
            prop_assert_eq!(hz::hz_to_z(&bits, hz, level), hz::hz_to_z_auto(&bits, hz));
        }
    }
}

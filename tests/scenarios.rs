//! End-to-end scenario tests for the reserver and BigInt.
//!
//! Each test below exercises one of the testable properties/scenarios this
//! crate is built against: tight-fit allocation, fragmented first-fit reuse,
//! a reservation crossing a bitfield word boundary, oversize (larger than a
//! default block) allocation, a wide BigInt round trip, the 64-bit limb's
//! Knuth correction path, and shift saturation at the storage boundary.

use qentem_reserve::bigint::U1024;
use qentem_reserve::config::{DefaultConfig, ReserverConfig};
use qentem_reserve::cpu::CpuHelper;
use qentem_reserve::{BigInt, Reserver};

#[test]
fn scenario_a_tight_fit_allocation() {
    let reserver: Reserver = Reserver::new();
    // A request that exactly matches one default block leaves no room for
    // a second chunk in that block.
    let bytes = DefaultConfig::DEFAULT_BLOCK_SIZE - DefaultConfig::CHUNK_ALIGN;
    let ptr = reserver.reserve(bytes).expect("tight-fit reservation should succeed");
    assert!(reserver.owns(ptr));
    reserver.release(ptr, bytes).expect("release should succeed");
}

#[test]
fn scenario_b_fragmented_first_fit_reuses_freed_gap() {
    let reserver: Reserver = Reserver::new();
    let chunk = DefaultConfig::CHUNK_ALIGN;

    let a = reserver.reserve(chunk).unwrap();
    let b = reserver.reserve(chunk).unwrap();
    let c = reserver.reserve(chunk).unwrap();

    // Free the middle chunk, creating a one-chunk gap between `a` and `c`.
    reserver.release(b, chunk).unwrap();

    // A same-size request should land back in the freed gap rather than
    // growing past `c`.
    let d = reserver.reserve(chunk).unwrap();
    assert_eq!(b, d, "first-fit should reuse the freed gap");

    reserver.release(a, chunk).unwrap();
    reserver.release(c, chunk).unwrap();
    reserver.release(d, chunk).unwrap();
}

#[test]
fn scenario_c_reservation_crosses_a_bitfield_word() {
    let reserver: Reserver = Reserver::new();
    // One bitfield word is `usize::BITS` chunks; request enough chunks to
    // guarantee the run straddles a word boundary regardless of where the
    // pool's high-water mark currently sits.
    let bytes = (usize::BITS as usize + 4) * DefaultConfig::CHUNK_ALIGN;
    let ptr = reserver.reserve(bytes).expect("cross-word reservation should succeed");
    reserver.release(ptr, bytes).expect("release should succeed");
}

#[test]
fn scenario_d_oversize_allocation_gets_its_own_block() {
    let reserver: Reserver = Reserver::new();
    let bytes = DefaultConfig::DEFAULT_BLOCK_SIZE * 3;
    let ptr = reserver
        .reserve(bytes)
        .expect("a request larger than the default block size should still succeed");
    assert!(reserver.owns(ptr));
    reserver.release(ptr, bytes).expect("release should succeed");
}

#[test]
fn scenario_e_wide_bigint_round_trip_at_1024_bits() {
    let mut value = U1024::from_limb(1u64);
    value.shift_left(1000);
    value.add_limb(0xDEAD_BEEF, 0);

    let original = value;
    let divisor = U1024::from_limb(0x1_0000_0001u64);
    let remainder = value.div_big(&divisor);

    value.mul_big(&divisor);
    value.add_big(&remainder);
    assert_eq!(value, original);
    assert_eq!(U1024::total_bit_width(), 1024);
}

#[test]
fn scenario_f_knuth_divide_correction_path() {
    // A small divisor normalizes with a large initial_shift, which is the
    // branch most likely to need the quotient-overestimate correction in
    // the 64-bit double-width divide.
    let mut value: BigInt<u64, 4> = BigInt::from_limb(1);
    value.shift_left(250);
    value.add_limb(1, 0);

    let original = value;
    let remainder = value.divide_limb(3);
    value.multiply_limb(3);
    value.add_limb(remainder, 0);
    assert_eq!(value, original);
}

#[test]
fn scenario_g_shift_left_saturates_at_storage_boundary() {
    let mut value: BigInt<u64, 2> = BigInt::from_limb(1);
    // 128-bit storage; shifting by 200 bits runs past every limb.
    value.shift_left(200);
    assert!(value.is_zero());

    let mut value: BigInt<u64, 2> = BigInt::from_limb(1);
    // Shifting to exactly the top bit should not be lost.
    value.shift_left(127);
    assert_eq!(value.find_last_bit(), 127);
}

#[test]
fn cpu_helper_reports_at_least_one_online_core() {
    assert!(CpuHelper::core_count() >= 1);
    let online = CpuHelper::online_cpu_set();
    assert!(online.is_set(0));
}

//! The havoc stage: a burst of random byte-level edits applied in place.

use std::cmp;

use rand::Rng;

use super::dictionary::Dictionary;

/// Buffers shorter than this are left alone.
pub(super) const MIN_INPUT_LEN: usize = 8;

/// Boundary constants overwritten into the buffer by the interesting-value
/// operator, per integer width (little-endian, signed).
const INTERESTING_16: [i16; 11] = [
    -32768, 32767, -1, 0, 1, -128, 127, 255, -256, 256, 32767,
];
const INTERESTING_32: [i32; 11] = [
    0,
    -2147483648,
    2147483647,
    -1,
    1,
    -32768,
    32767,
    -65536,
    65535,
    -100663046,
    100663046,
];
const INTERESTING_64: [i64; 9] = [
    0,
    -1,
    1,
    -4294967296,
    4294967296,
    -2147483648,
    2147483647,
    i64::MAX,
    i64::MIN,
];

/// Applies a random number of havoc edits to `data`.
///
/// The edit count is uniform in `[1, max(4, len / 100)]`; each edit picks one
/// of the seven operators uniformly. Buffers under [`MIN_INPUT_LEN`] bytes
/// are returned untouched.
pub(crate) fn havoc_bytes<R: Rng>(data: &mut Vec<u8>, dictionary: &Dictionary, rng: &mut R) {
    if data.len() < MIN_INPUT_LEN {
        return;
    }
    let edits = rng.gen_range(1..=cmp::max(4, data.len() / 100));
    for _ in 0..edits {
        match rng.gen_range(0..7) {
            0 => bit_flip(data, rng),
            1 => int_randomise(data, rng),
            2 => interesting_value(data, rng),
            3 => chunk_copy(data, rng),
            4 => dict_insert(data, dictionary, rng),
            5 => dict_replace(data, dictionary, rng),
            _ => arith(data, rng),
        }
    }
}

fn random_width<R: Rng>(rng: &mut R) -> usize {
    match rng.gen_range(0..3) {
        0 => 2,
        1 => 4,
        _ => 8,
    }
}

/// Flips one bit at a random offset.
fn bit_flip<R: Rng>(data: &mut [u8], rng: &mut R) {
    let idx = rng.gen_range(0..data.len());
    let bit = rng.gen_range(0..8);
    data[idx] ^= 1 << bit;
}

/// Overwrites an aligned-arbitrary offset with a uniform signed integer of
/// width 2, 4 or 8, little-endian.
fn int_randomise<R: Rng>(data: &mut [u8], rng: &mut R) {
    let width = random_width(rng);
    if data.len() < width {
        return;
    }
    let idx = rng.gen_range(0..=data.len() - width);
    match width {
        2 => data[idx..idx + 2].copy_from_slice(&rng.gen::<i16>().to_le_bytes()),
        4 => data[idx..idx + 4].copy_from_slice(&rng.gen::<i32>().to_le_bytes()),
        _ => data[idx..idx + 8].copy_from_slice(&rng.gen::<i64>().to_le_bytes()),
    }
}

/// Overwrites a random offset with a boundary constant of width 2, 4 or 8.
fn interesting_value<R: Rng>(data: &mut [u8], rng: &mut R) {
    let width = random_width(rng);
    if data.len() < width {
        return;
    }
    let idx = rng.gen_range(0..=data.len() - width);
    match width {
        2 => {
            let value = INTERESTING_16[rng.gen_range(0..INTERESTING_16.len())];
            data[idx..idx + 2].copy_from_slice(&value.to_le_bytes());
        }
        4 => {
            let value = INTERESTING_32[rng.gen_range(0..INTERESTING_32.len())];
            data[idx..idx + 4].copy_from_slice(&value.to_le_bytes());
        }
        _ => {
            let value = INTERESTING_64[rng.gen_range(0..INTERESTING_64.len())];
            data[idx..idx + 8].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Copies a chunk of 2..=32 bytes from one offset to another; source and
/// destination may overlap.
fn chunk_copy<R: Rng>(data: &mut [u8], rng: &mut R) {
    if data.len() < 4 {
        return;
    }
    let chunk = rng.gen_range(2..=cmp::min(32, data.len() / 2));
    let src = rng.gen_range(0..=data.len() - chunk);
    let dst = rng.gen_range(0..=data.len() - chunk);
    data.copy_within(src..src + chunk, dst);
}

/// Inserts a dictionary token at a random offset, growing the buffer.
fn dict_insert<R: Rng>(data: &mut Vec<u8>, dictionary: &Dictionary, rng: &mut R) {
    let Some(token) = dictionary.choose(rng) else {
        return;
    };
    if data.len() < 2 {
        data.extend_from_slice(token);
    } else {
        let pos = rng.gen_range(0..data.len());
        data.splice(pos..pos, token.iter().copied());
    }
}

/// Overwrites a random offset with a dictionary token, when it fits.
fn dict_replace<R: Rng>(data: &mut [u8], dictionary: &Dictionary, rng: &mut R) {
    let Some(token) = dictionary.choose(rng) else {
        return;
    };
    if data.len() < 2 || token.len() > data.len() {
        return;
    }
    let pos = rng.gen_range(0..=data.len() - token.len());
    data[pos..pos + token.len()].copy_from_slice(token);
}

/// Adds a bounded random delta to an integer of width 2, 4 or 8. When the sum
/// leaves the width's range, the opposite delta extreme is written instead.
fn arith<R: Rng>(data: &mut [u8], rng: &mut R) {
    let width = random_width(rng);
    if data.len() < width {
        return;
    }
    let idx = rng.gen_range(0..=data.len() - width);

    let bound: i128 = 1 << (8 * width - 8);
    let (min_value, max_value): (i128, i128) = match width {
        2 => (i16::MIN.into(), i16::MAX.into()),
        4 => (i32::MIN.into(), i32::MAX.into()),
        _ => (i64::MIN.into(), i64::MAX.into()),
    };
    let value: i128 = match width {
        2 => i16::from_le_bytes([data[idx], data[idx + 1]]).into(),
        4 => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[idx..idx + 4]);
            i32::from_le_bytes(bytes).into()
        }
        _ => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[idx..idx + 8]);
            i64::from_le_bytes(bytes).into()
        }
    };

    let delta = rng.gen_range(-bound..=bound);
    let sum = value + delta;
    let result = if (min_value..=max_value).contains(&sum) {
        sum
    } else if delta > 0 {
        -bound
    } else {
        bound
    };

    match width {
        2 => data[idx..idx + 2].copy_from_slice(&(result as i16).to_le_bytes()),
        4 => data[idx..idx + 4].copy_from_slice(&(result as i32).to_le_bytes()),
        _ => data[idx..idx + 8].copy_from_slice(&(result as i64).to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn short_buffers_are_left_alone() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut data = b"1234567".to_vec();
        let before = data.clone();
        havoc_bytes(&mut data, &Dictionary::default(), &mut rng);
        assert_eq!(data, before);
    }

    #[test]
    fn havoc_changes_the_buffer_eventually() {
        let mut rng = StdRng::seed_from_u64(1);
        let before = vec![0u8; 64];
        let mut changed = 0;
        for _ in 0..50 {
            let mut data = before.clone();
            havoc_bytes(&mut data, &Dictionary::default(), &mut rng);
            if data != before {
                changed += 1;
            }
        }
        // dictionary operators are no-ops here and chunk copies of zeroes
        // are invisible, so not every burst leaves a trace
        assert!(changed > 30);
    }

    #[test]
    fn length_is_preserved_without_a_dictionary() {
        // only dict-insert may grow the buffer
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..200 {
            let mut data = vec![7u8; 33];
            havoc_bytes(&mut data, &Dictionary::default(), &mut rng);
            assert_eq!(data.len(), 33);
        }
    }

    #[test]
    fn bit_flip_touches_exactly_one_bit() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let mut data = vec![0u8; 16];
            bit_flip(&mut data, &mut rng);
            let set: u32 = data.iter().map(|byte| byte.count_ones()).sum();
            assert_eq!(set, 1);
        }
    }

    #[test]
    fn interesting_value_writes_a_table_entry() {
        // 0xAA.. never decodes to a table constant, so after the op some
        // window of the buffer must hold one
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..200 {
            let mut data = vec![0xAAu8; 8];
            interesting_value(&mut data, &mut rng);
            let found = (0..=6).any(|idx| {
                INTERESTING_16
                    .contains(&i16::from_le_bytes([data[idx], data[idx + 1]]))
            }) || (0..=4).any(|idx| {
                INTERESTING_32
                    .contains(&i32::from_le_bytes(data[idx..idx + 4].try_into().unwrap()))
            }) || INTERESTING_64
                .contains(&i64::from_le_bytes(data[..8].try_into().unwrap()));
            assert!(found, "no table constant found in {data:?}");
        }
    }

    #[test]
    fn arith_saturates_to_the_opposite_extreme() {
        // a two byte buffer pins the operator to width 2; starting from
        // i16::MAX, any positive delta overflows and must land on -256
        let mut rng = StdRng::seed_from_u64(5);
        let mut saturated = false;
        for _ in 0..2_000 {
            let mut data = i16::MAX.to_le_bytes().to_vec();
            arith(&mut data, &mut rng);
            let result = i16::from_le_bytes([data[0], data[1]]);
            assert!(result == -256 || (i16::MAX - 256..=i16::MAX).contains(&result));
            if result == -256 {
                saturated = true;
            }
        }
        assert!(saturated);
    }

    #[test]
    fn dict_insert_grows_dict_replace_preserves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.dict");
        std::fs::write(&path, b"k=\"TOKEN\"\n").unwrap();
        let dict = Dictionary::load(&path).unwrap();

        let mut rng = StdRng::seed_from_u64(6);
        let mut data = vec![1u8; 10];
        dict_insert(&mut data, &dict, &mut rng);
        assert_eq!(data.len(), 15);

        let mut data = vec![1u8; 10];
        dict_replace(&mut data, &dict, &mut rng);
        assert_eq!(data.len(), 10);
        assert!(data.windows(5).any(|window| window == b"TOKEN"));
    }

    #[test]
    fn chunk_copy_duplicates_in_buffer_bytes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data: Vec<u8> = (0..64).collect();
        chunk_copy(&mut data, &mut rng);
        assert_eq!(data.len(), 64);
        // every byte still originates from the initial contents
        assert!(data.iter().all(|&byte| byte < 64));
    }
}

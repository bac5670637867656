//! Lexicographic ordering keys.
//!
//! Canvas elements and folder nodes are ordered by plain string comparison
//! of an `index` field. Two generators live here:
//!
//! - [`next_index`] produces a key strictly greater than every existing key,
//!   using the fractional-index integer layout the host writes (`a0`..`az`,
//!   then `b00`..`bzz`, ...). The head letter encodes how many base-62 digits
//!   follow, so incrementing never produces a shorter, smaller-sorting key.
//! - [`folder_index`] produces a fresh key for a new folder node. Only
//!   approximate insertion order is needed there.

use rand::Rng;

const BASE_62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE_36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Index given to the first element of an empty collection.
pub const FIRST_INDEX: &str = "a0";

/// Number of characters (head included) in the integer part for a head letter.
fn integer_len(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn digit_value(c: u8) -> Option<usize> {
    BASE_62.iter().position(|&d| d == c)
}

/// Split a key into its integer part, if it has a well-formed one.
fn integer_part(key: &str) -> Option<&str> {
    let head = *key.as_bytes().first()?;
    let len = integer_len(head)?;
    if key.len() < len || !key.is_char_boundary(len) {
        return None;
    }
    let part = &key[..len];
    if part.bytes().skip(1).all(|c| digit_value(c).is_some()) {
        Some(part)
    } else {
        None
    }
}

/// Increment a fractional-index integer part. `None` when `z`-headed digits overflow.
fn increment_integer(part: &str) -> Option<String> {
    let bytes = part.as_bytes();
    let head = bytes[0];
    let mut digits: Vec<u8> = bytes[1..].to_vec();

    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        let value = digit_value(*digit)? + 1;
        if value == BASE_62.len() {
            *digit = BASE_62[0];
        } else {
            *digit = BASE_62[value];
            carry = false;
            break;
        }
    }

    if carry {
        match head {
            b'Z' => return Some(format!("a{}", BASE_62[0] as char)),
            b'z' => return None,
            _ => {}
        }
        let next_head = head + 1;
        if next_head > b'a' {
            digits.push(BASE_62[0]);
        } else {
            digits.pop();
        }
        let mut out = String::with_capacity(digits.len() + 1);
        out.push(next_head as char);
        out.extend(digits.iter().map(|&d| d as char));
        return Some(out);
    }

    let mut out = String::with_capacity(part.len());
    out.push(head as char);
    out.extend(digits.iter().map(|&d| d as char));
    Some(out)
}

/// A key that sorts strictly after `key`.
pub fn index_after(key: &str) -> String {
    integer_part(key)
        .and_then(increment_integer)
        .unwrap_or_else(|| format!("{key}V"))
}

/// A key strictly greater than every key in `existing` ([`FIRST_INDEX`] when empty).
pub fn next_index<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    match existing.into_iter().max() {
        Some(max) => index_after(max),
        None => FIRST_INDEX.to_string(),
    }
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE_36[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// A fresh folder ordering key: `a` + base-36 milliseconds + random suffix.
pub fn folder_index() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| BASE_36[rng.gen_range(0..BASE_36.len())] as char)
        .collect();
    format!("a{}{}", to_base36(millis), suffix)
}

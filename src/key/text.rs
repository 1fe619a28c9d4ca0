use std::cmp::Ordering;

/// Compare two text slots. A highest-of-type marker beats any content.
/// With `ignore_length`, one side being a prefix of the other counts as equal,
/// which is how prefix seek keys bracket every string starting with them.
pub fn compare_text(
    left: &[u8],
    left_highest: bool,
    right: &[u8],
    right_highest: bool,
    ignore_length: bool,
) -> Ordering {
    if left_highest || right_highest {
        return left_highest.cmp(&right_highest);
    }
    lexicographical_compare(left, right, ignore_length)
}

/// Unsigned byte-wise comparison, shorter first on a common prefix.
pub fn lexicographical_compare(left: &[u8], right: &[u8], ignore_length: bool) -> Ordering {
    let common = left.len().min(right.len());
    match left[..common].cmp(&right[..common]) {
        Ordering::Equal if ignore_length => Ordering::Equal,
        Ordering::Equal => left.len().cmp(&right.len()),
        ordering => ordering,
    }
}

/// Shortest prefix length of `right` that still sorts after `left`,
/// assuming `left < right`.
pub fn minimal_length_to_differ(left: &[u8], right: &[u8]) -> usize {
    let equal = left
        .iter()
        .zip(right.iter())
        .take_while(|(l, r)| l == r)
        .count();
    right.len().min(equal + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_compare_unsigned() {
        // "é" starts with 0xC3 which must sort after ASCII
        assert_eq!(
            lexicographical_compare("é".as_bytes(), b"z", false),
            Ordering::Greater
        );
    }

    #[test]
    fn prefix_sorts_first_unless_length_ignored() {
        assert_eq!(lexicographical_compare(b"ab", b"abc", false), Ordering::Less);
        assert_eq!(lexicographical_compare(b"ab", b"abc", true), Ordering::Equal);
        assert_eq!(lexicographical_compare(b"ab", b"b", true), Ordering::Less);
    }

    #[test]
    fn highest_beats_content() {
        assert_eq!(compare_text(b"", true, b"zzz", false, false), Ordering::Greater);
        assert_eq!(compare_text(b"a", true, b"b", true, false), Ordering::Equal);
    }

    #[test]
    fn minimal_length() {
        assert_eq!(minimal_length_to_differ(b"abc", b"abd"), 3);
        assert_eq!(minimal_length_to_differ(b"abc", b"b"), 1);
        assert_eq!(minimal_length_to_differ(b"ab", b"abzzz"), 3);
        assert_eq!(minimal_length_to_differ(b"", b"xyz"), 1);
    }
}

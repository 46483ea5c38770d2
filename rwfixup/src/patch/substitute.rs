// SPDX-FileCopyrightText: 2026 rwfixup contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::borrow::Cow;

use memchr::memmem;

pub const DEFAULT_FROM: &str = "/system/system_ext/apex/";
pub const DEFAULT_TO: &str = "/apex/";

/// Replace every non-overlapping occurrence of `from` with `to`. Returns the
/// new data and the number of replacements. The input is borrowed back if
/// nothing matched or `from` is empty.
pub fn replace_all<'a>(data: &'a [u8], from: &[u8], to: &[u8]) -> (Cow<'a, [u8]>, usize) {
    if from.is_empty() {
        return (Cow::Borrowed(data), 0);
    }

    let mut matches = memmem::find_iter(data, from).peekable();
    if matches.peek().is_none() {
        return (Cow::Borrowed(data), 0);
    }

    let mut output = Vec::with_capacity(data.len());
    let mut last = 0;
    let mut count = 0;

    for offset in matches {
        output.extend_from_slice(&data[last..offset]);
        output.extend_from_slice(to);
        last = offset + from.len();
        count += 1;
    }

    output.extend_from_slice(&data[last..]);

    (Cow::Owned(output), count)
}

#[cfg(test)]
mod tests {
    use bstr::ByteSlice;

    use super::*;

    fn apex(data: &str) -> (String, usize) {
        let (output, count) = replace_all(
            data.as_bytes(),
            DEFAULT_FROM.as_bytes(),
            DEFAULT_TO.as_bytes(),
        );
        (output.to_str().unwrap().to_owned(), count)
    }

    #[test]
    fn apex_path() {
        assert_eq!(
            apex("exec /system/system_ext/apex/foo.so"),
            ("exec /apex/foo.so".to_owned(), 1),
        );
    }

    #[test]
    fn no_occurrence_borrows() {
        let data = b"exec /system/apex/foo.so\n";
        let (output, count) = replace_all(data, DEFAULT_FROM.as_bytes(), DEFAULT_TO.as_bytes());

        assert_eq!(count, 0);
        assert!(matches!(output, Cow::Borrowed(_)));
        assert_eq!(output.as_ref(), data);
    }

    #[test]
    fn multiple_occurrences() {
        assert_eq!(
            apex(concat!(
                "a /system/system_ext/apex/x\n",
                "b /system/system_ext/apex//system/system_ext/apex/y\n",
            )),
            ("a /apex/x\nb /apex//apex/y\n".to_owned(), 3),
        );
    }

    #[test]
    fn non_overlapping() {
        let (output, count) = replace_all(b"aaaa", b"aa", b"b");
        assert_eq!(output.as_ref(), b"bb");
        assert_eq!(count, 2);

        let (output, count) = replace_all(b"aaa", b"aa", b"b");
        assert_eq!(output.as_ref(), b"ba");
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_needle() {
        let (output, count) = replace_all(b"abc", b"", b"x");
        assert_eq!(output.as_ref(), b"abc");
        assert_eq!(count, 0);
    }
}

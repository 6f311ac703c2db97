//! Position conversion utilities.
//!
//! Blocks and errors are located by byte offset; diagnostics want a line and
//! a column. Columns count characters, not bytes.

/// Convert a byte offset to a 0-indexed `(line, column)` pair.
///
/// Offsets past the end are clamped; an offset inside a multi-byte
/// character resolves to the start of that character.
pub fn line_col(source: &str, byte_offset: usize) -> (usize, usize) {
    let mut offset = byte_offset.min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }

    let before = &source[..offset];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let col = source[line_start..offset].chars().count();
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii() {
        let source = "hello world";
        assert_eq!(line_col(source, 0), (0, 0));
        assert_eq!(line_col(source, 5), (0, 5));
        assert_eq!(line_col(source, 11), (0, 11));
    }

    #[test]
    fn test_lines() {
        let source = "one\ntwo\nthree";
        assert_eq!(line_col(source, 3), (0, 3)); // the newline itself
        assert_eq!(line_col(source, 4), (1, 0));
        assert_eq!(line_col(source, 10), (2, 2));
    }

    #[test]
    fn test_multibyte() {
        let source = "café {{";
        // é is 2 bytes but 1 column
        assert_eq!(line_col(source, 3), (0, 3)); // before é
        assert_eq!(line_col(source, 5), (0, 4)); // after é
        assert_eq!(line_col(source, 4), (0, 3)); // inside é
    }

    #[test]
    fn test_out_of_bounds() {
        let source = "hello";
        assert_eq!(line_col(source, 100), (0, 5)); // clamped to length
    }
}

use std::fmt::Write;

/// Bytes rendered per hex dump line.
pub const BYTES_PER_LINE: usize = 8;

/// Render `bytes` as upper-case, colon-separated hex, [`BYTES_PER_LINE`]
/// bytes per line, each line prefixed by `indent`.
///
/// An empty slice renders as an empty string.
#[must_use]
pub fn hex_dump(bytes: &[u8], indent: &str) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / BYTES_PER_LINE * (indent.len() + 1));
    for line in bytes.chunks(BYTES_PER_LINE) {
        out.push_str(indent);
        for (i, byte) in line.iter().enumerate() {
            if i > 0 {
                out.push(':');
            }
            // Writing into a String cannot fail
            let _ = write!(out, "{byte:02X}");
        }
        out.push('\n');
    }
    out
}

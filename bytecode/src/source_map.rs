//! Delta-encoded VLQ source map: maps bytecode PCs to source lines and
//! columns.
//!
//! Each entry is 3 VLQ values:
//! - `delta_pc` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)
//! - `delta_column` (signed, zigzag + VLQ)
//!
//! Entries are only recorded when the position changes, so straight-line
//! code from one source line costs a single entry.

/// Accumulates source map entries during compilation.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    entries: Vec<(u32, u32, u32)>, // (pc, line, column)
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record that code from `pc` on comes from `line:column`.
    ///
    /// A record at the same pc as the previous one replaces it; a record
    /// with the same position as the previous one is dropped.
    pub fn add(&mut self, pc: u32, line: u32, column: u32) {
        if let Some(last) = self.entries.last_mut() {
            if last.1 == line && last.2 == column {
                return;
            }
            if last.0 == pc {
                *last = (pc, line, column);
                return;
            }
        }
        self.entries.push((pc, line, column));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Produce the delta-encoded VLQ byte stream.
    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut prev_pc: u32 = 0;
        let mut prev_line: i64 = 0;
        let mut prev_column: i64 = 0;

        for &(pc, line, column) in &self.entries {
            encode_unsigned_vlq(pc - prev_pc, &mut buf);
            encode_unsigned_vlq(zigzag_encode(line as i64 - prev_line), &mut buf);
            encode_unsigned_vlq(zigzag_encode(column as i64 - prev_column), &mut buf);

            prev_pc = pc;
            prev_line = line as i64;
            prev_column = column as i64;
        }

        buf
    }
}

/// Look up the source position for `target_pc` in a delta-encoded source
/// map. Returns the `(line, column)` of the last entry with
/// `pc <= target_pc`.
pub fn source_map_lookup(encoded: &[u8], target_pc: u32) -> Option<(u32, u32)> {
    let mut pos = 0;
    let mut pc: u32 = 0;
    let mut line: i64 = 0;
    let mut column: i64 = 0;
    let mut best: Option<(u32, u32)> = None;

    while pos < encoded.len() {
        let delta_pc = decode_unsigned_vlq(encoded, &mut pos)?;
        let delta_line = zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);
        let delta_column = zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);

        pc = pc.checked_add(delta_pc)?;
        line += delta_line;
        column += delta_column;

        if pc > target_pc {
            break;
        }
        best = Some((u32::try_from(line).ok()?, u32::try_from(column).ok()?));
    }

    best
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// Encode an unsigned integer as a variable-length quantity.
/// Each byte uses 7 data bits + 1 continuation bit (MSB).
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode an unsigned VLQ from `encoded` starting at `pos`.
/// Advances `pos` past the consumed bytes.
fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None; // overflow
        }
    }
}

/// Zigzag-encode a signed i64 into an unsigned u32.
fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

/// Zigzag-decode an unsigned u32 back to a signed i64.
fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_map() {
        let builder = SourceMapBuilder::new();
        let encoded = builder.finish();
        assert!(encoded.is_empty());
        assert_eq!(source_map_lookup(&encoded, 0), None);
    }

    #[test]
    fn lookup_picks_last_entry_at_or_before_pc() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, 1, 1);
        builder.add(3, 2, 5);
        builder.add(7, 1, 9);
        let encoded = builder.finish();

        assert_eq!(source_map_lookup(&encoded, 0), Some((1, 1)));
        assert_eq!(source_map_lookup(&encoded, 2), Some((1, 1)));
        assert_eq!(source_map_lookup(&encoded, 3), Some((2, 5)));
        assert_eq!(source_map_lookup(&encoded, 6), Some((2, 5)));
        assert_eq!(source_map_lookup(&encoded, 7), Some((1, 9)));
        assert_eq!(source_map_lookup(&encoded, 100), Some((1, 9)));
    }

    #[test]
    fn repeated_positions_are_collapsed() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, 4, 2);
        builder.add(2, 4, 2);
        builder.add(5, 4, 2);
        assert_eq!(builder.len(), 1);
        builder.add(5, 6, 1);
        builder.add(5, 7, 1);
        assert_eq!(builder.len(), 2);
        let encoded = builder.finish();
        assert_eq!(source_map_lookup(&encoded, 5), Some((7, 1)));
    }

    #[test]
    fn zigzag_handles_negative_deltas() {
        for v in [-1000, -1, 0, 1, 1000, i32::MAX as i64, i32::MIN as i64] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn truncated_map_is_rejected() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, 300, 1);
        let mut encoded = builder.finish();
        encoded.pop();
        assert_eq!(source_map_lookup(&encoded, 0), None);
    }

    #[test]
    fn typical_size() {
        let mut builder = SourceMapBuilder::new();
        for i in 0..100u32 {
            builder.add(i * 3, i + 1, (i % 7) + 1);
        }
        let encoded = builder.finish();
        assert!(encoded.len() < 400);
    }
}

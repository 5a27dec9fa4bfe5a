//! HPACK header compression (RFC 7541).
//!
//! The static table contents (Appendix A) are mandated by the RFC and
//! reproduced verbatim as data; the dynamic table, the integer/string
//! primitives and the encoder/decoder built on top of them are this
//! crate's own, following the same explicit-state-machine style as
//! [`crate::serializer::Serializer`].

use super::Error;
use crate::http2::huffman;

/// RFC 7541 Appendix A. Index 0 is unused — HPACK indices are
/// 1-based, with the static table occupying 1..=61 and the dynamic
/// table starting at 62.
#[rustfmt::skip]
const STATIC_TABLE: [(&str, &str); 62] = [
    ("", ""),
    (":authority", ""), (":method", "GET"), (":method", "POST"),
    (":path", "/"), (":path", "/index.html"),
    (":scheme", "http"), (":scheme", "https"),
    (":status", "200"), (":status", "204"), (":status", "206"),
    (":status", "304"), (":status", "400"), (":status", "404"), (":status", "500"),
    ("accept-charset", ""), ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""), ("accept-ranges", ""), ("accept", ""),
    ("access-control-allow-origin", ""), ("age", ""), ("allow", ""),
    ("authorization", ""), ("cache-control", ""), ("content-disposition", ""),
    ("content-encoding", ""), ("content-language", ""), ("content-length", ""),
    ("content-location", ""), ("content-range", ""), ("content-type", ""),
    ("cookie", ""), ("date", ""), ("etag", ""), ("expect", ""),
    ("expires", ""), ("from", ""), ("host", ""), ("if-match", ""),
    ("if-modified-since", ""), ("if-none-match", ""), ("if-range", ""),
    ("if-unmodified-since", ""), ("last-modified", ""), ("link", ""),
    ("location", ""), ("max-forwards", ""), ("proxy-authenticate", ""),
    ("proxy-authorization", ""), ("range", ""), ("referer", ""),
    ("refresh", ""), ("retry-after", ""), ("server", ""), ("set-cookie", ""),
    ("strict-transport-security", ""), ("transfer-encoding", ""),
    ("user-agent", ""), ("vary", ""), ("via", ""), ("www-authenticate", ""),
];

const STATIC_TABLE_LEN: usize = STATIC_TABLE.len() - 1;

/// Maximum number of 7-bit continuation octets an encoded integer may
/// use before it's treated as malformed, bounding decode cost on a
/// hostile peer independent of the eventual numeric overflow check.
const MAX_INTEGER_CONTINUATION_BYTES: usize = 5;

/// One decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    /// Marks a field (e.g. `authorization`, `cookie`) whose value must
    /// never enter the dynamic table and must always be re-sent as a
    /// literal-never-indexed representation, so a peer that persists
    /// or forwards its compression state can't replay or leak it.
    pub sensitive: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Field {
        Field {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn sensitive(name: impl Into<String>, value: impl Into<String>) -> Field {
        Field {
            name: name.into(),
            value: value.into(),
            sensitive: true,
        }
    }

    /// RFC 7541 §4.1: 32 bytes of bookkeeping overhead per entry.
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// A byte cursor over an encoded header block, used by both the
/// integer and string decoding primitives.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    fn peek(&self) -> Result<u8, Error> {
        self.data.get(self.pos).copied().ok_or(Error::HpackTruncated)
    }

    fn take(&mut self) -> Result<u8, Error> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_n(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(Error::HpackTruncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode an RFC 7541 §5.1 integer. `prefix_bits` is the width of the
/// prefix in the first (already-peeked) byte; `first_byte` has any
/// leading representation-selector bits already present.
fn decode_integer(cursor: &mut Cursor, first_byte: u8, prefix_bits: u8) -> Result<u64, Error> {
    let mask = (1u8 << prefix_bits) - 1;
    let prefix = (first_byte & mask) as u64;
    if prefix < mask as u64 {
        return Ok(prefix);
    }
    let mut value = prefix;
    let mut shift = 0u32;
    for _ in 0..MAX_INTEGER_CONTINUATION_BYTES {
        let byte = cursor.take()?;
        value += ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(Error::HpackIntegerTooLarge)
}

fn encode_integer(out: &mut Vec<u8>, selector_bits: u8, prefix_bits: u8, value: u64) {
    let mask = (1u8 << prefix_bits) - 1;
    if value < mask as u64 {
        out.push(selector_bits | value as u8);
        return;
    }
    out.push(selector_bits | mask);
    let mut remaining = value - mask as u64;
    while remaining >= 0x80 {
        out.push(((remaining & 0x7f) | 0x80) as u8);
        remaining >>= 7;
    }
    out.push(remaining as u8);
}

fn decode_string(cursor: &mut Cursor) -> Result<String, Error> {
    let first = cursor.take()?;
    let huffman_encoded = first & 0x80 != 0;
    let len = decode_integer(cursor, first, 7)? as usize;
    let raw = cursor.take_n(len)?;
    let bytes = if huffman_encoded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    String::from_utf8(bytes).map_err(|_| Error::HpackInvalidUtf8)
}

/// Encodes as Huffman whenever that's not longer than the literal
/// bytes, the representation every mainstream HPACK encoder picks.
fn encode_string(out: &mut Vec<u8>, value: &str) {
    let huffman_len = huffman::encoded_len(value.as_bytes());
    if huffman_len < value.len() {
        out.push(0x80);
        encode_integer_tail(out, huffman_len as u64);
        out.extend_from_slice(&huffman::encode(value.as_bytes()));
    } else {
        out.push(0x00);
        encode_integer_tail(out, value.len() as u64);
        out.extend_from_slice(value.as_bytes());
    }
}

/// `encode_integer` with an already-written selector bit and a 7-bit
/// prefix, for the length field that follows a string's Huffman flag.
fn encode_integer_tail(out: &mut Vec<u8>, value: u64) {
    let last = out.len() - 1;
    let selector = out[last] & 0x80;
    out.truncate(last);
    encode_integer(out, selector, 7, value);
}

/// The dynamic table (RFC 7541 §2.3.2): a bounded FIFO of recently
/// emitted header fields, most-recently-inserted first.
pub struct DynamicTable {
    entries: std::collections::VecDeque<Field>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> DynamicTable {
        DynamicTable {
            entries: std::collections::VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn evict_to_fit(&mut self, incoming: usize) {
        while self.size + incoming > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    fn insert(&mut self, field: Field) {
        let cost = field.size();
        if cost > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to_fit(cost);
        self.size += cost;
        self.entries.push_front(field);
    }

    fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit(0);
    }

    fn get(&self, dynamic_index: usize) -> Option<&Field> {
        self.entries.get(dynamic_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// One HPACK codec. Connection-scoped and stateful: a live dynamic
/// table must be shared by every call that decodes or encodes header
/// blocks for that connection, never reconstructed per request.
pub struct Context {
    table: DynamicTable,
}

impl Context {
    pub fn new(max_dynamic_table_size: usize) -> Context {
        Context {
            table: DynamicTable::new(max_dynamic_table_size),
        }
    }

    pub fn set_max_dynamic_table_size(&mut self, size: usize) {
        self.table.resize(size);
    }

    pub fn dynamic_table_size(&self) -> usize {
        self.table.size()
    }

    fn lookup(&self, index: u64) -> Result<Field, Error> {
        let index = index as usize;
        if index == 0 {
            return Err(Error::HpackBadIndex(0));
        }
        if index <= STATIC_TABLE_LEN {
            let (name, value) = STATIC_TABLE[index];
            return Ok(Field::new(name, value));
        }
        self.table
            .get(index - STATIC_TABLE_LEN - 1)
            .cloned()
            .ok_or(Error::HpackBadIndex(index as u64))
    }

    /// Decode one complete header block (already reassembled from any
    /// HEADERS/CONTINUATION frame split) into an ordered field list.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<Field>, Error> {
        let mut cursor = Cursor::new(block);
        let mut fields = Vec::new();
        while cursor.has_remaining() {
            let first = cursor.take()?;
            if first & 0x80 != 0 {
                // Indexed Header Field (§6.1).
                let index = decode_integer(&mut cursor, first, 7)?;
                fields.push(self.lookup(index)?);
            } else if first & 0x40 != 0 {
                // Literal Header Field with Incremental Indexing (§6.2.1).
                let index = decode_integer(&mut cursor, first, 6)?;
                let field = self.decode_literal_value(&mut cursor, index)?;
                self.table.insert(field.clone());
                fields.push(field);
            } else if first & 0x20 != 0 {
                // Dynamic Table Size Update (§6.3).
                let new_size = decode_integer(&mut cursor, first, 5)?;
                self.table.resize(new_size as usize);
            } else {
                // Literal Header Field without/never Indexing (§6.2.2, §6.2.3):
                // both decode identically, they only differ in re-encoding advice.
                let index = decode_integer(&mut cursor, first, 4)?;
                fields.push(self.decode_literal_value(&mut cursor, index)?);
            }
        }
        Ok(fields)
    }

    fn decode_literal_value(&self, cursor: &mut Cursor, name_index: u64) -> Result<Field, Error> {
        let name = if name_index == 0 {
            decode_string(cursor)?
        } else {
            self.lookup(name_index)?.name
        };
        let value = decode_string(cursor)?;
        Ok(Field::new(name, value))
    }

    /// Encode `fields` as a complete header block. Ordinary fields are
    /// indexed into the dynamic table (literal-with-incremental-indexing);
    /// fields marked [`Field::sensitive`] are always emitted as
    /// literal-never-indexed and never touch the dynamic table.
    pub fn encode(&mut self, fields: &[Field]) -> Vec<u8> {
        let mut out = Vec::new();
        for field in fields {
            let (repr, should_insert) = Self::build_field_repr(field);
            out.extend_from_slice(&repr);
            if should_insert {
                self.table.insert(field.clone());
            }
        }
        out
    }

    /// Encode as many leading `fields` as fit within `buffer`'s
    /// existing capacity, stopping at a field boundary rather than
    /// splitting one mid-representation. A `field_count` short of
    /// `fields.len()` means the block didn't fit in a single HEADERS
    /// frame; this crate treats that as an error rather than
    /// continuing onto a CONTINUATION frame.
    pub fn encode_into(&mut self, buffer: &mut Vec<u8>, fields: &[Field]) -> EncodeResult {
        let limit = buffer.capacity();
        let start = buffer.len();
        let mut field_count = 0;
        for field in fields {
            let (repr, should_insert) = Self::build_field_repr(field);
            if buffer.len() + repr.len() > limit {
                break;
            }
            buffer.extend_from_slice(&repr);
            if should_insert {
                self.table.insert(field.clone());
            }
            field_count += 1;
        }
        EncodeResult {
            used_bytes: buffer.len() - start,
            field_count,
        }
    }

    fn static_index_for(name: &str, value: &str) -> Option<(usize, bool)> {
        STATIC_TABLE
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, (n, v))| *n == name && *v == value)
            .map(|(i, _)| (i, true))
            .or_else(|| {
                STATIC_TABLE
                    .iter()
                    .enumerate()
                    .skip(1)
                    .find(|(_, (n, _))| *n == name)
                    .map(|(i, _)| (i, false))
            })
    }

    /// Builds the encoded representation for one field without
    /// touching the dynamic table, and reports whether the caller
    /// should then insert it there (only literal-with-incremental-indexing
    /// does; indexed and never-indexed representations don't).
    fn build_field_repr(field: &Field) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        if field.sensitive {
            match Self::static_index_for(&field.name, &field.value) {
                Some((index, _)) => {
                    encode_integer(&mut out, 0x10, 4, index as u64);
                    encode_string(&mut out, &field.value);
                }
                None => {
                    encode_integer(&mut out, 0x10, 4, 0);
                    encode_string(&mut out, &field.name);
                    encode_string(&mut out, &field.value);
                }
            }
            return (out, false);
        }
        match Self::static_index_for(&field.name, &field.value) {
            Some((index, true)) => {
                encode_integer(&mut out, 0x80, 7, index as u64);
                (out, false)
            }
            Some((index, false)) => {
                encode_integer(&mut out, 0x40, 6, index as u64);
                encode_string(&mut out, &field.value);
                (out, true)
            }
            None => {
                encode_integer(&mut out, 0x40, 6, 0);
                encode_string(&mut out, &field.name);
                encode_string(&mut out, &field.value);
                (out, true)
            }
        }
    }
}

/// Outcome of [`Context::encode_into`]: how many bytes it wrote and
/// how many leading fields made it in before the buffer's capacity
/// would have been exceeded.
pub struct EncodeResult {
    pub used_bytes: usize,
    pub field_count: usize,
}

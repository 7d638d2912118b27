//! Block-boundary-aware CSV reader (spec.md §4.6 Pass 1, §9 "the CSV
//! reader's... iteration is a forward-only iterator with internal state
//! `{buffer, pos, inQuote, escaped}`; it is never restartable within a
//! block").

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;
use crate::types::CSV_READING_BLOCK_SIZE;

#[derive(Debug, Clone, Copy)]
pub struct CsvSpecialChars {
    pub token_separator: u8,
    pub quote_char: u8,
    pub escape_char: u8,
}

impl Default for CsvSpecialChars {
    fn default() -> Self {
        Self {
            token_separator: b',',
            quote_char: b'"',
            escape_char: b'"',
        }
    }
}

/// A byte range `[start, end)` carved out of a CSV file. A block's reader
/// skips the partial record at its start (handled by whoever opened the
/// previous block) and continues past `end` to finish its last record,
/// so adjacent blocks partition records without duplication
/// (spec.md §4.6 Pass 1).
#[derive(Debug, Clone, Copy)]
pub struct CsvBlock {
    pub start: u64,
    pub end: u64,
}

pub fn blocks_for_file_size(file_size: u64) -> Vec<CsvBlock> {
    if file_size == 0 {
        return vec![CsvBlock { start: 0, end: 0 }];
    }
    let num_blocks = file_size.div_ceil(CSV_READING_BLOCK_SIZE);
    (0..num_blocks)
        .map(|i| CsvBlock {
            start: i * CSV_READING_BLOCK_SIZE,
            end: ((i + 1) * CSV_READING_BLOCK_SIZE).min(file_size),
        })
        .collect()
}

/// Forward-only record/token iterator. State is exactly `{buffer, pos,
/// inQuote, escaped}` — reopening at a new offset is a fresh reader, not
/// a seek on an existing one.
pub struct CsvReader {
    reader: BufReader<File>,
    buffer: [u8; 1],
    pos: u64,
    in_quote: bool,
    escaped: bool,
    special: CsvSpecialChars,
}

impl CsvReader {
    /// Opens `path` at byte `start`. If `start > 0` the partial record
    /// already claimed by the previous block is skipped by discarding
    /// bytes up to and including the next `\n`.
    pub fn open_at(path: impl AsRef<Path>, start: u64, special: CsvSpecialChars) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = Self {
            reader: BufReader::new(file),
            buffer: [0u8; 1],
            pos: start,
            in_quote: false,
            escaped: false,
            special,
        };
        if start > 0 {
            reader.skip_partial_record()?;
        }
        Ok(reader)
    }

    fn skip_partial_record(&mut self) -> Result<()> {
        while let Some(b) = self.next_byte()? {
            if b == b'\n' {
                break;
            }
        }
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let n = self.reader.read(&mut self.buffer)?;
        if n == 0 {
            return Ok(None);
        }
        self.pos += 1;
        Ok(Some(self.buffer[0]))
    }

    /// Reads comment (`#`-prefixed) and blank lines, returning the first
    /// substantive line as a raw string -- used to find the header line
    /// (spec.md §6 "first non-empty non-comment line is the header").
    pub fn next_header_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.next_record()? {
                None => return Ok(None),
                Some(fields) => {
                    let line = fields.join(&(self.special.token_separator as char).to_string());
                    if line.trim().is_empty() || line.trim_start().starts_with('#') {
                        continue;
                    }
                    return Ok(Some(line));
                }
            }
        }
    }

    /// Reads one logical record, honoring `escapeChar` escaping of the
    /// quote character and itself, and quoted fields that may embed the
    /// separator and newlines.
    pub fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut any = false;

        loop {
            let byte = match self.next_byte()? {
                None => {
                    if !any {
                        return Ok(None);
                    }
                    fields.push(field);
                    return Ok(Some(fields));
                }
                Some(b) => b,
            };
            any = true;

            if self.escaped {
                field.push(byte as char);
                self.escaped = false;
                continue;
            }
            if self.in_quote && byte == self.special.escape_char {
                self.escaped = true;
                continue;
            }
            if byte == self.special.quote_char {
                self.in_quote = !self.in_quote;
                continue;
            }
            if !self.in_quote && byte == self.special.token_separator {
                fields.push(std::mem::take(&mut field));
                continue;
            }
            if !self.in_quote && byte == b'\n' {
                if field.ends_with('\r') {
                    field.pop();
                }
                fields.push(field);
                return Ok(Some(fields));
            }
            field.push(byte as char);
        }
    }
}

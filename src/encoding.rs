//! Word extraction and the token stream formats exchanged with workers.
//!
//! A word is a maximal run of ASCII letters, case folded. Map output writes
//! each distinct word followed by its count as a run of `'1'` bytes, so the
//! reduce side only has to count ones and can never confuse a tally with the
//! letters of the next word. Reduce output writes real totals in decimal.

use crate::config::Limits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const UNARY_DIGIT: u8 = b'1';

#[inline]
pub fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    pub word: String,
    #[serde(rename = "frequency")]
    pub count: u64,
}

/// Word to count mapping that remembers first-seen order, so encoding the
/// same input always produces the same bytes.
#[derive(Debug, Clone, Default)]
pub struct WordTable {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
    max_entries: Option<usize>,
    dropped: usize,
}

impl WordTable {
    pub fn new() -> Self {
        WordTable::default()
    }

    /// A table that refuses new words once `max_entries` distinct words are held.
    pub fn bounded(max_entries: usize) -> Self {
        WordTable {
            max_entries: Some(max_entries),
            ..WordTable::default()
        }
    }

    pub fn observe(&mut self, word: &str) -> bool {
        self.merge(word, 1)
    }

    /// Adds `count` to `word`. Returns false when the word had to be dropped
    /// because the table is full. A zero count never creates an entry.
    pub fn merge(&mut self, word: &str, count: u64) -> bool {
        if count == 0 {
            return true;
        }
        if let Some(&slot) = self.index.get(word) {
            let entry = &mut self.entries[slot].1;
            *entry = entry.saturating_add(count);
            return true;
        }
        if self.max_entries.is_some_and(|max| self.entries.len() >= max) {
            self.dropped += 1;
            return false;
        }
        self.index.insert(word.to_string(), self.entries.len());
        self.entries.push((word.to_string(), count));
        true
    }

    pub fn merge_table(&mut self, other: &WordTable) {
        for (word, count) in other.iter() {
            self.merge(word, count);
        }
    }

    pub fn get(&self, word: &str) -> Option<u64> {
        self.index.get(word).map(|&slot| self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Occurrences of new words refused since the table filled up.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(word, count)| (word.as_str(), *count))
    }

    pub fn into_counts(self) -> Vec<WordCount> {
        self.entries
            .into_iter()
            .map(|(word, count)| WordCount { word, count })
            .collect()
    }
}

/// Lazy scan of the words in a byte buffer. Clone it before iterating to
/// walk the same words again.
#[derive(Debug, Clone)]
pub struct Words<'a> {
    buf: &'a [u8],
    pos: usize,
    max_word_len: usize,
}

impl<'a> Words<'a> {
    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl<'a> Iterator for Words<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let skip = self.rest().iter().position(|&b| is_word_byte(b))?;
        let start = self.pos + skip;
        let run = self.buf[start..]
            .iter()
            .position(|&b| !is_word_byte(b))
            .unwrap_or(self.buf.len() - start);
        self.pos = start + run;

        // the whole run is consumed even when only a prefix is kept
        let kept = run.min(self.max_word_len);
        Some(
            self.buf[start..start + kept]
                .iter()
                .map(|b| b.to_ascii_lowercase() as char)
                .collect(),
        )
    }
}

pub fn extract_words<'a>(text: &'a [u8], limits: &Limits) -> Words<'a> {
    Words {
        buf: text,
        pos: 0,
        max_word_len: limits.max_word_len,
    }
}

/// How a count run following a word is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CountEncoding {
    /// Count equals the number of consecutive `'1'` bytes. Map output.
    Unary,
    /// Count is a decimal numeral. Reduce output.
    Decimal,
    /// Unary when the digit run is all ones, decimal otherwise. Only useful
    /// for streams from producers that emitted both; `word11` reads as 2.
    Mixed,
}

impl CountEncoding {
    /// Reads the count at the start of `buf`, returning the value (None when
    /// no count run is present) and the bytes consumed.
    fn read_count(self, buf: &[u8]) -> (Option<u64>, usize) {
        match self {
            CountEncoding::Unary => {
                let ones = buf.iter().take_while(|&&b| b == UNARY_DIGIT).count();
                ((ones > 0).then_some(ones as u64), ones)
            }
            CountEncoding::Decimal => {
                let digits = digit_run(buf);
                ((!digits.is_empty()).then(|| parse_decimal(digits)), digits.len())
            }
            CountEncoding::Mixed => {
                let digits = digit_run(buf);
                if digits.is_empty() {
                    (None, 0)
                } else if digits.iter().all(|&b| b == UNARY_DIGIT) {
                    (Some(digits.len() as u64), digits.len())
                } else {
                    (Some(parse_decimal(digits)), digits.len())
                }
            }
        }
    }
}

fn digit_run(buf: &[u8]) -> &[u8] {
    let len = buf.iter().take_while(|b| b.is_ascii_digit()).count();
    &buf[..len]
}

fn parse_decimal(digits: &[u8]) -> u64 {
    digits.iter().fold(0u64, |acc, &d| {
        acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
    })
}

/// Parses a `word count word count ...` stream into `table`. A word without
/// a count run contributes 1 so a truncated chunk still makes progress.
pub fn decode_into(stream: &[u8], encoding: CountEncoding, limits: &Limits, table: &mut WordTable) {
    let mut words = extract_words(stream, limits);
    while let Some(word) = words.next() {
        let (count, used) = encoding.read_count(words.rest());
        words.pos += used;
        table.merge(&word, count.unwrap_or(1));
    }
}

fn encode_with<F>(table: &WordTable, limits: &Limits, mut write_count: F) -> Vec<u8>
where
    F: FnMut(u64, &mut Vec<u8>),
{
    let mut out = Vec::new();
    let mut entry = Vec::new();
    for (written, (word, count)) in table.iter().enumerate() {
        entry.clear();
        entry.extend_from_slice(word.as_bytes());
        write_count(count, &mut entry);
        if out.len() + entry.len() > limits.max_message_len {
            warn!(
                "reply ceiling of {} bytes reached, dropping {} of {} entries",
                limits.max_message_len,
                table.len() - written,
                table.len()
            );
            break;
        }
        out.extend_from_slice(&entry);
    }
    out
}

/// Counts the words of a raw text chunk and encodes them with unary counts.
pub fn map_encode(text: &[u8], limits: &Limits) -> Vec<u8> {
    let mut table = WordTable::bounded(limits.max_table_entries);
    for word in extract_words(text, limits) {
        table.observe(&word);
    }
    if table.dropped() > 0 {
        warn!("word table full, {} occurrences dropped", table.dropped());
    }
    encode_with(&table, limits, |count, out| {
        out.resize(out.len() + count as usize, UNARY_DIGIT)
    })
}

/// Sums a unary-encoded intermediate stream per word.
pub fn reduce_aggregate(stream: &[u8], limits: &Limits) -> WordTable {
    let mut table = WordTable::bounded(limits.max_table_entries);
    decode_into(stream, CountEncoding::Unary, limits, &mut table);
    if table.dropped() > 0 {
        warn!("word table full, {} occurrences dropped", table.dropped());
    }
    table
}

/// Encodes aggregated totals with decimal counts.
pub fn reduce_encode(table: &WordTable, limits: &Limits) -> Vec<u8> {
    encode_with(table, limits, |count, out| {
        out.extend_from_slice(count.to_string().as_bytes())
    })
}

/// Parses a reduce reply.
pub fn final_parse(reply: &[u8], encoding: CountEncoding, limits: &Limits) -> WordTable {
    let mut table = WordTable::new();
    decode_into(reply, encoding, limits, &mut table);
    table
}

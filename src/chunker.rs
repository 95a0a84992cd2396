//! Splits a buffer into request-sized chunks without cutting a token apart.

use crate::encoding::is_word_byte;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Input text: never split an alphabetic run.
    RawText,
    /// Map output: cut only between a count run and the next word.
    Intermediate,
}

/// Length of the chunk starting at `pos`.
///
/// Never 0 while `pos < buf.len()`. Raw text chunks may run past `max_len`
/// when the text around the target offset is one long alphabetic run; the
/// forward scan stops at the first separator.
pub fn next_chunk_len(buf: &[u8], pos: usize, max_len: usize, mode: ChunkMode) -> usize {
    let total = buf.len();
    if pos >= total {
        return 0;
    }
    let max_len = max_len.max(1);
    if pos + max_len >= total {
        return total - pos;
    }

    let target = pos + max_len;
    let len = match mode {
        ChunkMode::RawText => raw_text_cut(buf, pos, target, max_len),
        ChunkMode::Intermediate => intermediate_cut(buf, pos, target).unwrap_or(max_len),
    };
    trace!(pos, len, ?mode, "chunk boundary");
    len
}

fn raw_text_cut(buf: &[u8], pos: usize, target: usize, max_len: usize) -> usize {
    // separators this close to the target keep chunks from degenerating
    let floor = target.saturating_sub(max_len / 4).max(pos);
    let separator = match buf[floor..target].iter().rposition(|&b| !is_word_byte(b)) {
        Some(offset) => floor + offset,
        None => match buf[target..].iter().position(|&b| !is_word_byte(b)) {
            Some(offset) => target + offset,
            None => return buf.len() - pos,
        },
    };
    // the separator closes this chunk so the next one starts on fresh content
    separator + 1 - pos
}

fn intermediate_cut(buf: &[u8], pos: usize, target: usize) -> Option<usize> {
    (pos + 1..=target)
        .rev()
        .find(|&at| buf[at - 1].is_ascii_digit() && is_word_byte(buf[at]))
        .map(|at| at - pos)
}

/// Iterator over consecutive chunks of a buffer.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    buf: &'a [u8],
    pos: usize,
    max_len: usize,
    mode: ChunkMode,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let len = next_chunk_len(self.buf, self.pos, self.max_len, self.mode);
        if len == 0 {
            return None;
        }
        let chunk = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(chunk)
    }
}

pub fn chunks(buf: &[u8], max_len: usize, mode: ChunkMode) -> Chunks<'_> {
    Chunks {
        buf,
        pos: 0,
        max_len,
        mode,
    }
}

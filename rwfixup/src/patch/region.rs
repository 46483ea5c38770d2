// SPDX-FileCopyrightText: 2026 rwfixup contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Comment out a bounded region of lines.
//!
//! The region starts at the first line containing the start marker and ends at
//! the first line, at or after the start, containing the end marker. Markers
//! are literal substrings and may appear anywhere in a line. If the end marker
//! never shows up, the region extends to the end of the input. After a region
//! closes, a later start marker opens another one.
//!
//! Lines inside the region whose first byte is already the comment character
//! are passed through untouched, which makes the transform idempotent. Every
//! input line produces exactly one output line.

use std::borrow::Cow;

use bstr::ByteSlice;
use memchr::memmem::Finder;
use tracing::trace;

pub const DEFAULT_PREFIX: &[u8] = b"# ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Outside,
    Inside,
}

/// What a single pass did. This is informational only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionSummary {
    /// Whether the start marker matched any line.
    pub found: bool,
    /// Whether the region was closed by the end marker. When the start marker
    /// matched and this is false, the region ran to the end of the input.
    pub closed: bool,
    /// Lines that received the prefix in this pass.
    pub commented: usize,
    /// Lines inside the region that were already commented.
    pub already_commented: usize,
}

impl RegionSummary {
    /// Whether the region was found but never closed.
    pub fn is_unterminated(&self) -> bool {
        self.found && !self.closed
    }
}

pub struct RegionCommenter<'a> {
    start: Finder<'a>,
    end: Finder<'a>,
    prefix: &'a [u8],
}

impl<'a> RegionCommenter<'a> {
    /// Both markers should be non-empty. An empty marker matches every line.
    pub fn new(start: &'a [u8], end: &'a [u8], prefix: &'a [u8]) -> Self {
        Self {
            start: Finder::new(start),
            end: Finder::new(end),
            prefix,
        }
    }

    fn is_commented(&self, line: &[u8]) -> bool {
        match (line.first(), self.prefix.first()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Advance the state machine by one line. Returns the output line and the
    /// state to use for the next line.
    fn step<'l>(
        &self,
        state: State,
        line: &'l [u8],
        summary: &mut RegionSummary,
    ) -> (Cow<'l, [u8]>, State) {
        let state = match state {
            State::Outside if self.start.find(line).is_some() => {
                trace!("Region starts at: {:?}", line.as_bstr());
                summary.found = true;
                State::Inside
            }
            s => s,
        };

        match state {
            State::Outside => (Cow::Borrowed(line), State::Outside),
            State::Inside => {
                let output = if self.is_commented(line) {
                    summary.already_commented += 1;
                    Cow::Borrowed(line)
                } else {
                    summary.commented += 1;

                    let mut buf = Vec::with_capacity(self.prefix.len() + line.len());
                    buf.extend_from_slice(self.prefix);
                    buf.extend_from_slice(line);
                    Cow::Owned(buf)
                };

                let next = if self.end.find(line).is_some() {
                    trace!("Region ends at: {:?}", line.as_bstr());
                    summary.closed = true;
                    State::Outside
                } else {
                    State::Inside
                };

                (output, next)
            }
        }
    }

    /// Transform a sequence of lines. The lines must not include their line
    /// terminators.
    pub fn comment_lines<'l, L>(
        &self,
        lines: &[&'l L],
    ) -> (Vec<Cow<'l, [u8]>>, RegionSummary)
    where
        L: AsRef<[u8]> + ?Sized,
    {
        let mut summary = RegionSummary::default();
        let mut state = State::Outside;
        let mut output = Vec::with_capacity(lines.len());

        for &line in lines {
            let bytes = AsRef::<[u8]>::as_ref(line);
            let (new_line, next) = self.step(state, bytes, &mut summary);
            output.push(new_line);
            state = next;
        }

        (output, summary)
    }

    /// Transform a whole document. Line terminators (`\n` or `\r\n`) are
    /// preserved, as is a missing terminator on the final line.
    pub fn comment_document(&self, data: &[u8]) -> (Vec<u8>, RegionSummary) {
        let mut summary = RegionSummary::default();
        let mut state = State::Outside;
        let mut output = Vec::with_capacity(data.len());

        for line in data.lines_with_terminator() {
            let (body, terminator) = split_terminator(line);
            let (new_body, next) = self.step(state, body, &mut summary);

            output.extend_from_slice(&new_body);
            output.extend_from_slice(terminator);
            state = next;
        }

        (output, summary)
    }
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    let len = if line.ends_with(b"\r\n") {
        2
    } else if line.ends_with(b"\n") {
        1
    } else {
        0
    };

    line.split_at(line.len() - len)
}

/// Count lines the same way [`RegionCommenter::comment_document`] splits them.
pub fn line_count(data: &[u8]) -> usize {
    data.lines_with_terminator().count()
}

/// Comment out the region between `start` and `end` in `lines`.
pub fn comment_region<'l, L>(
    lines: &[&'l L],
    start: &[u8],
    end: &[u8],
    prefix: &[u8],
) -> Vec<Cow<'l, [u8]>>
where
    L: AsRef<[u8]> + ?Sized,
{
    RegionCommenter::new(start, end, prefix).comment_lines(lines).0
}

/// Comment out the region between `start` and `end` in a whole document.
pub fn comment_region_in(
    data: &[u8],
    start: &[u8],
    end: &[u8],
    prefix: &[u8],
) -> (Vec<u8>, RegionSummary) {
    RegionCommenter::new(start, end, prefix).comment_document(data)
}

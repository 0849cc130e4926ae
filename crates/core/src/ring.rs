// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Line-oriented bounded screen buffer fed by a raw byte stream.
//!
//! Unlike a full terminal emulator, [`RingScreenBuffer`] only tracks enough
//! cursor state to rewrite the current line on a bare carriage return and
//! to strip ANSI CSI/OSC sequences — it does not interpret cursor-addressing
//! escapes. That is enough for readiness pattern matching, which only cares
//! about the text of completed lines.

/// Maximum trailing bytes buffered across `feed()` calls while waiting for
/// an escape sequence (`ESC [ ... final-byte` or `ESC ] ... BEL|ESC \`) to
/// complete. Not a hard limit on sequence length — merely how much of a
/// split sequence we remember; anything this long was never going to be
/// a CSI sequence final byte anyway; OSC sequences are consumed until
/// their terminator regardless of length via the `in_osc` flag below.
const MAX_ESC_LOOKBACK: usize = 64;

/// Bounded, line-oriented buffer of terminal output.
#[derive(Debug)]
pub struct RingScreenBuffer {
    max_lines: usize,
    lines: Vec<String>,
    /// Logical index of `lines[0]`; only ever increases.
    base_idx: u64,
    /// Lines at index >= this are not subject to eviction while the
    /// current command is active. Reset by [`RingScreenBuffer::clear`].
    preserve_before: u64,
    /// Whether `clear()` has ever been called. Before the first call there
    /// is no in-flight command output to protect, so eviction is
    /// unconditional; `preserve_before` defaulting to `0` must not be read
    /// as "everything from line 0 onward is protected".
    has_cleared: bool,
    /// Partial line accumulated since the last linefeed.
    current_line: String,
    /// Parser state carried across `feed()` calls.
    parser: ParserState,
}

#[derive(Debug, Default)]
struct ParserState {
    in_csi: bool,
    in_osc: bool,
    /// Saw ESC but haven't classified CSI/OSC/other yet.
    pending_esc: bool,
    /// Previous byte, used to detect the OSC `ESC \` terminator.
    prev_was_esc: bool,
    /// Bytes consumed inside the current escape sequence, bounded by
    /// [`MAX_ESC_LOOKBACK`] as a safety valve against unterminated input.
    esc_len: usize,
}

impl RingScreenBuffer {
    /// Create a new buffer bounded to `max_lines` (spec default: 5000).
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: Vec::new(),
            base_idx: 0,
            preserve_before: 0,
            has_cleared: false,
            current_line: String::new(),
            parser: ParserState::default(),
        }
    }

    /// Logical index of the first retained line.
    pub fn base_idx(&self) -> u64 {
        self.base_idx
    }

    /// Logical index below which the current command's output is immune
    /// to eviction.
    pub fn preserve_before(&self) -> u64 {
        self.preserve_before
    }

    /// Total number of completed lines plus the in-progress line, as a
    /// logical index (`base_idx + lines.len()`).
    pub fn line_count(&self) -> u64 {
        self.base_idx + self.lines.len() as u64
    }

    /// Feed raw bytes from the underlying stream. Decodes as UTF-8 with
    /// lossy replacement; interprets CR (rewrite current line), LF (flush
    /// line), backspace (delete one char), tab (literal), and strips CSI/
    /// OSC escape sequences. Bell and other C0 controls are discarded.
    pub fn feed(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        for ch in text.chars() {
            self.feed_char(ch);
        }
        self.evict_if_needed();
    }

    fn feed_char(&mut self, ch: char) {
        let p = &mut self.parser;

        if p.in_osc {
            p.esc_len += 1;
            if ch == '\u{7}' {
                p.in_osc = false;
            } else if p.prev_was_esc && ch == '\\' {
                p.in_osc = false;
            }
            p.prev_was_esc = ch == '\u{1b}';
            if p.esc_len > MAX_ESC_LOOKBACK * 4 {
                // Runaway OSC with no terminator; bail out so we don't
                // silently discard the rest of the stream forever.
                p.in_osc = false;
            }
            return;
        }

        if p.in_csi {
            p.esc_len += 1;
            // CSI final bytes are in 0x40..=0x7E.
            if ('\u{40}'..='\u{7e}').contains(&ch) || p.esc_len > MAX_ESC_LOOKBACK {
                p.in_csi = false;
            }
            return;
        }

        if p.pending_esc {
            p.pending_esc = false;
            match ch {
                '[' => {
                    p.in_csi = true;
                    p.esc_len = 0;
                }
                ']' => {
                    p.in_osc = true;
                    p.esc_len = 0;
                    p.prev_was_esc = false;
                }
                _ => {
                    // Unrecognized single-char escape: swallow just the
                    // introducer and the one following char, nothing else.
                }
            }
            return;
        }

        match ch {
            '\u{1b}' => p.pending_esc = true,
            '\r' => self.current_line.clear(),
            '\n' => self.flush_line(),
            '\u{8}' => {
                self.current_line.pop();
            }
            '\u{7}' => {}
            c if (c as u32) < 0x20 && c != '\t' => {}
            c => self.current_line.push(c),
        }
    }

    fn flush_line(&mut self) {
        let line = std::mem::take(&mut self.current_line);
        self.lines.push(line);
    }

    /// Drop oldest lines past `max_lines`, never evicting below
    /// `preserve_before` once a command is in flight. Before the first
    /// `clear()` there is no preserved region at all, so an idle pane that
    /// is fed bytes but never targeted by `execute` still stays bounded.
    /// If the preserve boundary itself would force the buffer over budget,
    /// the bound is allowed to be exceeded for the remainder of the
    /// current command — see open question in DESIGN.md.
    fn evict_if_needed(&mut self) {
        if !self.has_cleared {
            while self.lines.len() > self.max_lines {
                self.lines.remove(0);
                self.base_idx += 1;
            }
            return;
        }
        while self.lines.len() > self.max_lines && self.base_idx < self.preserve_before {
            self.lines.remove(0);
            self.base_idx += 1;
        }
    }

    /// Mark the preserve boundary at the current line count; subsequent
    /// reads of `all_content` only see data fed after this call.
    pub fn clear(&mut self) {
        self.preserve_before = self.line_count();
        self.has_cleared = true;
    }

    /// All content from the preserve boundary to the end, newline-joined.
    /// Returns the empty string if nothing has been fed since `clear`.
    pub fn all_content(&self) -> String {
        let start = self.preserve_before.saturating_sub(self.base_idx) as usize;
        let start = start.min(self.lines.len());
        let mut out = self.lines[start..].join("\n");
        if !self.current_line.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.current_line);
        }
        out
    }

    /// Last `n` completed lines (plus the in-progress line), newline-joined.
    pub fn last_n_lines(&self, n: usize) -> String {
        let total = self.lines.len();
        let start = total.saturating_sub(n);
        let mut out = self.lines[start..].join("\n");
        if !self.current_line.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.current_line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_then_all_content_is_empty_until_new_bytes() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"hello\n");
        buf.clear();
        assert_eq!(buf.all_content(), "");
        buf.feed(b"world");
        assert_eq!(buf.all_content(), "world");
    }

    #[test]
    fn carriage_return_rewrites_current_line() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"progress: 10%\rprogress: 50%\rprogress: 100%\n");
        assert_eq!(buf.all_content(), "progress: 100%");
    }

    #[test]
    fn backspace_deletes_one_character() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"abcx\x08\n");
        assert_eq!(buf.all_content(), "abc");
    }

    #[test]
    fn strips_csi_and_osc_sequences() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"\x1b[31mred\x1b[0m text\n");
        assert_eq!(buf.all_content(), "red text");
        buf.feed(b"\x1b]0;title\x07after\n");
        assert_eq!(buf.all_content(), "red text\nafter");
    }

    #[test]
    fn csi_sequence_split_across_feed_calls() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"before\x1b[3");
        buf.feed(b"1mred\n");
        assert_eq!(buf.all_content(), "beforered");
    }

    #[test]
    fn idle_pane_never_cleared_still_stays_bounded() {
        // No `clear()` call anywhere: a pane fed bytes by the collector but
        // never targeted by `execute` must not grow without bound.
        let mut buf = RingScreenBuffer::new(5);
        for i in 0..50 {
            buf.feed(format!("line {i}\n").as_bytes());
        }
        assert_eq!(buf.lines.len(), 5);
        assert_eq!(buf.all_content(), "line 45\nline 46\nline 47\nline 48\nline 49");
    }

    #[test]
    fn invariant_preserve_before_le_line_count() {
        let mut buf = RingScreenBuffer::new(5);
        for i in 0..50 {
            buf.feed(format!("line {i}\n").as_bytes());
        }
        buf.clear();
        for i in 50..60 {
            buf.feed(format!("line {i}\n").as_bytes());
        }
        assert!(buf.base_idx() <= buf.preserve_before());
        assert!(buf.preserve_before() <= buf.line_count());
    }

    #[test]
    fn eviction_never_drops_preserved_lines_mid_command() {
        let mut buf = RingScreenBuffer::new(3);
        buf.feed(b"a\nb\nc\n");
        buf.clear();
        // Bound is 3 but preserve_before pins at 3 lines already emitted;
        // feeding more must not evict below preserve_before even though
        // that means exceeding max_lines for the duration of the command.
        buf.feed(b"d\ne\nf\ng\n");
        assert!(buf.base_idx() <= buf.preserve_before());
        assert_eq!(buf.all_content(), "d\ne\nf\ng");
    }

    #[test]
    fn tab_is_literal() {
        let mut buf = RingScreenBuffer::new(100);
        buf.feed(b"a\tb\n");
        assert_eq!(buf.all_content(), "a\tb");
    }
}

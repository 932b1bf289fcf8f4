//! Bounded scrollback for one session's terminal output.
//!
//! Raw PTY bytes arrive in arbitrary chunks. Escape sequences are stripped
//! with a small state machine that survives chunk boundaries, CRLF and lone
//! CR become line breaks, and complete lines land in a sliding window that
//! evicts the oldest line first. Bytes after the last line break are held
//! as the partial line until the next chunk completes it.

use std::collections::VecDeque;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const DEL: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Ground,
    Escape,
    Csi,
    /// OSC and the other string sequences (DCS, SOS, PM, APC).
    Str,
    StrEscape,
    /// One designator byte follows (`ESC ( B` and friends).
    Designator,
}

/// Sliding window of complete output lines plus the trailing partial line.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    partial: Vec<u8>,
    state: EscapeState,
    pending_cr: bool,
}

impl OutputBuffer {
    /// Create an empty buffer retaining at most `max_lines` complete lines.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            max_lines,
            partial: Vec::new(),
            state: EscapeState::Ground,
            pending_cr: false,
        }
    }

    /// Ingest a chunk of raw terminal output.
    pub fn append(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed(byte);
        }
    }

    fn feed(&mut self, byte: u8) {
        // Escape sequences between a CR and its LF do not break the pair.
        let after_cr = self.pending_cr;
        if self.state == EscapeState::Ground && byte != ESC {
            self.pending_cr = false;
        }

        match self.state {
            EscapeState::Ground => match byte {
                ESC => self.state = EscapeState::Escape,
                b'\r' => {
                    self.finish_line();
                    self.pending_cr = true;
                }
                b'\n' => {
                    if !after_cr {
                        self.finish_line();
                    }
                }
                b'\t' => self.partial.push(byte),
                b if b < 0x20 || b == DEL => {}
                b => self.partial.push(b),
            },
            EscapeState::Escape => {
                self.state = match byte {
                    b'[' => EscapeState::Csi,
                    b']' | b'P' | b'X' | b'^' | b'_' => EscapeState::Str,
                    b'(' | b')' | b'*' | b'+' | b'#' | b'%' => EscapeState::Designator,
                    ESC => EscapeState::Escape,
                    _ => EscapeState::Ground,
                };
            }
            EscapeState::Csi => {
                if byte == ESC {
                    self.state = EscapeState::Escape;
                } else if (0x40..=0x7e).contains(&byte) {
                    self.state = EscapeState::Ground;
                }
            }
            EscapeState::Str => match byte {
                BEL => self.state = EscapeState::Ground,
                ESC => self.state = EscapeState::StrEscape,
                _ => {}
            },
            EscapeState::StrEscape => {
                self.state = if byte == b'\\' {
                    EscapeState::Ground
                } else {
                    EscapeState::Str
                };
            }
            EscapeState::Designator => self.state = EscapeState::Ground,
        }
    }

    fn finish_line(&mut self) {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// The last `n` complete lines, oldest first.
    #[must_use]
    pub fn get_lines(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Every retained complete line, oldest first.
    #[must_use]
    pub fn get_all_lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// The carried fragment that has not seen a line terminator yet.
    #[must_use]
    pub fn partial_line(&self) -> String {
        String::from_utf8_lossy(&self.partial).into_owned()
    }

    /// Last `n` complete lines plus the partial line, newline-joined.
    ///
    /// This is the sample the health evaluator hashes.
    #[must_use]
    pub fn tail_text(&self, n: usize) -> String {
        let mut text = self.get_lines(n).join("\n");
        if !self.partial.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.partial_line());
        }
        text
    }

    /// Drop every line, the partial fragment and any half-read escape.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.partial.clear();
        self.state = EscapeState::Ground;
        self.pending_cr = false;
    }

    /// Number of retained complete lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no complete line is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Configured line cap.
    #[must_use]
    pub fn max_lines(&self) -> usize {
        self.max_lines
    }
}

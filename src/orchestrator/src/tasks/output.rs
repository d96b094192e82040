//! Bounded, consume-once output buffer

/// Returned by a poll when nothing was produced since the previous poll
pub const NO_NEW_OUTPUT: &str = "(no new output)";

/// Output captured from a background task.
///
/// Holds at most `max_bytes` of task output. The first write that would go
/// past the cap is cut at a char boundary and followed by a single
/// truncation marker; everything after that is counted but dropped.
#[derive(Debug)]
pub struct OutputBuffer {
    data: String,
    max_bytes: usize,
    truncated: bool,
    cursor: usize,
    dropped_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: String::new(),
            max_bytes,
            truncated: false,
            cursor: 0,
            dropped_bytes: 0,
        }
    }

    pub fn push(&mut self, text: &str) {
        if self.truncated {
            self.dropped_bytes += text.len();
            return;
        }

        let room = self.max_bytes.saturating_sub(self.data.len());
        if text.len() <= room {
            self.data.push_str(text);
            return;
        }

        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.data.push_str(&text[..cut]);
        self.dropped_bytes += text.len() - cut;
        self.data.push_str(&format!(
            "\n[Output truncated at {} bytes]\n",
            self.max_bytes
        ));
        self.truncated = true;
    }

    /// Output produced since the previous call, or `None`
    pub fn take_new(&mut self) -> Option<String> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let new = self.data[self.cursor..].to_string();
        self.cursor = self.data.len();
        Some(new)
    }

    /// Everything retained so far, consumed or not
    pub fn contents(&self) -> &str {
        &self.data
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }
}

//! Streaming content classifier.
//!
//! Re-labels raw model text fragments into typed chunks by watching for
//! directive markers at the start of each line. A line stays buffered
//! only while it could still become a marker; after that its text flows
//! through immediately under the decided type.

use crate::directive::{Marker, could_be_marker_prefix, split_marker};
use crate::stream_event::{ContentType, TypedChunk};

fn marker_type(marker: Marker) -> ContentType {
    match marker {
        Marker::Ask => ContentType::Ask,
        Marker::Answer => ContentType::Answer,
        Marker::Think => ContentType::Thinking,
        Marker::Action => ContentType::Action,
    }
}

/// Single-consumer classifier for one model response.
#[derive(Debug)]
pub struct StreamClassifier {
    current: ContentType,
    buffer: String,
    line_decided: bool,
    hide_action: bool,
}

impl Default for StreamClassifier {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StreamClassifier {
    pub fn new(hide_action: bool) -> Self {
        Self {
            current: ContentType::Reasoning,
            buffer: String::new(),
            line_decided: false,
            hide_action,
        }
    }

    /// The type subsequent undecided text would be emitted under.
    pub fn current_type(&self) -> ContentType {
        self.current
    }

    /// Feed one fragment; returns the chunks that became decidable.
    pub fn feed(&mut self, fragment: &str) -> Vec<TypedChunk> {
        let mut out = Vec::new();
        let mut rest = fragment;
        while !rest.is_empty() {
            match rest.find('\n') {
                Some(i) => {
                    self.push_segment(&rest[..i], &mut out);
                    self.end_line(&mut out);
                    rest = &rest[i + 1..];
                }
                None => {
                    self.push_segment(rest, &mut out);
                    rest = "";
                }
            }
        }
        out
    }

    /// Flush whatever is still undecided and reset for the next response.
    pub fn finish(&mut self) -> Vec<TypedChunk> {
        let mut out = Vec::new();
        if !self.line_decided && !self.buffer.is_empty() {
            self.decide(&mut out);
        }
        self.buffer.clear();
        self.line_decided = false;
        self.current = ContentType::Reasoning;
        out
    }

    fn push_segment(&mut self, segment: &str, out: &mut Vec<TypedChunk>) {
        if segment.is_empty() {
            return;
        }
        if self.line_decided {
            self.emit(self.current, segment, out);
            return;
        }
        self.buffer.push_str(segment);
        if !could_be_marker_prefix(&self.buffer) {
            self.decide(out);
        }
    }

    fn end_line(&mut self, out: &mut Vec<TypedChunk>) {
        if !self.line_decided {
            self.decide(out);
        }
        self.emit(self.current, "\n", out);
        self.line_decided = false;
    }

    fn decide(&mut self, out: &mut Vec<TypedChunk>) {
        let line = std::mem::take(&mut self.buffer);
        match split_marker(&line) {
            Some((marker, rest)) => {
                self.current = marker_type(marker);
                self.emit(self.current, rest, out);
            }
            None => self.emit(self.current, &line, out),
        }
        self.line_decided = true;
    }

    fn emit(&self, content_type: ContentType, text: &str, out: &mut Vec<TypedChunk>) {
        if text.is_empty() || (self.hide_action && content_type == ContentType::Action) {
            return;
        }
        match out.last_mut() {
            Some(last) if last.content_type == content_type => last.text.push_str(text),
            _ => out.push(TypedChunk::new(content_type, text)),
        }
    }
}

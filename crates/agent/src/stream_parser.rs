//! Incremental tag demultiplexer for streamed replies.
//!
//! Text deltas are fed in as they arrive; the demultiplexer tracks the stack
//! of open tags and emits [`StreamingUpdate`]s for the innermost field as
//! word boundaries are crossed. Concatenating every update for one field, in
//! order, reproduces that field's inner text exactly.

use typewire_core::StreamingUpdate;
use typewire_core::schema::PATH_SEPARATOR;

/// Single-pass, character-driven tag tracker.
#[derive(Debug, Default)]
pub struct TagDemux {
    stack: Vec<String>,
    word: String,
    /// Characters seen since an unconfirmed `<`
    pending_tag: Option<String>,
}

impl TagDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the currently open field, if any.
    pub fn current_field(&self) -> Option<String> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.join(PATH_SEPARATOR))
        }
    }

    /// Consume one text delta, returning the updates it completes.
    pub fn push(&mut self, delta: &str) -> Vec<StreamingUpdate> {
        let mut updates = Vec::new();
        for c in delta.chars() {
            self.push_char(c, &mut updates);
        }
        updates
    }

    /// Flush whatever is buffered once the stream has ended.
    pub fn finish(&mut self) -> Vec<StreamingUpdate> {
        let mut updates = Vec::new();
        if let Some(partial) = self.pending_tag.take() {
            self.append_literal('<');
            for c in partial.chars() {
                self.append_literal(c);
            }
        }
        self.flush_word(&mut updates);
        updates
    }

    fn push_char(&mut self, c: char, updates: &mut Vec<StreamingUpdate>) {
        if let Some(mut name) = self.pending_tag.take() {
            if c == '>' && is_tag_name(&name) {
                self.flush_word(updates);
                self.apply_tag(&name);
                return;
            }
            if is_tag_char(c, name.is_empty()) {
                name.push(c);
                self.pending_tag = Some(name);
                return;
            }

            // Not a tag after all: the `<` and what followed are plain text.
            self.append_literal('<');
            for ch in name.chars() {
                self.append_literal(ch);
            }
        }

        match c {
            '<' => self.pending_tag = Some(String::new()),
            ' ' | '\n' => {
                if let Some(field) = self.current_field() {
                    self.flush_word(updates);
                    updates.push(StreamingUpdate::new(field, c.to_string()));
                }
            }
            _ => self.append_literal(c),
        }
    }

    /// Text outside any tag is model chatter and is dropped.
    fn append_literal(&mut self, c: char) {
        if !self.stack.is_empty() {
            self.word.push(c);
        }
    }

    fn flush_word(&mut self, updates: &mut Vec<StreamingUpdate>) {
        if self.word.is_empty() {
            return;
        }
        let word = std::mem::take(&mut self.word);
        if let Some(field) = self.current_field() {
            updates.push(StreamingUpdate::new(field, word));
        }
    }

    fn apply_tag(&mut self, name: &str) {
        match name.strip_prefix('/') {
            Some(closing) => {
                if let Some(pos) = self.stack.iter().rposition(|open| open == closing) {
                    self.stack.truncate(pos);
                }
            }
            None => self.stack.push(name.to_string()),
        }
    }
}

fn is_tag_char(c: char, first: bool) -> bool {
    if first {
        c.is_ascii_alphabetic() || c == '_' || c == '/'
    } else {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
    }
}

fn is_tag_name(name: &str) -> bool {
    let bare = name.strip_prefix('/').unwrap_or(name);
    bare.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Feed `chunks` through a demux and concatenate updates per field.
    fn reconstruct(chunks: &[&str]) -> BTreeMap<String, String> {
        let mut demux = TagDemux::new();
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut updates = Vec::new();
        for chunk in chunks {
            updates.extend(demux.push(chunk));
        }
        updates.extend(demux.finish());
        for update in updates {
            fields.entry(update.field).or_default().push_str(&update.value);
        }
        fields
    }

    #[test]
    fn words_and_separators_are_separate_updates() {
        let mut demux = TagDemux::new();
        let mut updates = demux.push("<answer>Paris is");
        updates.extend(demux.push(" nice</answer>"));
        updates.extend(demux.finish());

        let values: Vec<&str> = updates.iter().map(|u| u.value.as_str()).collect();
        assert_eq!(values, vec!["Paris", " ", "is", " ", "nice"]);
        assert!(updates.iter().all(|u| u.field == "answer"));
    }

    #[test]
    fn nested_tags_join_with_underscore() {
        let fields = reconstruct(&["<analysis><step1>look</step1><step2>think hard</step2></analysis>"]);
        assert_eq!(fields["analysis_step1"], "look");
        assert_eq!(fields["analysis_step2"], "think hard");
        assert!(!fields.contains_key("analysis"));
    }

    #[test]
    fn reconstruction_survives_arbitrary_chunking() {
        let reply = "Sure!\n<summary>  Two  spaces\nand a newline </summary>\n<ok>true</ok>";
        let expected_summary = "  Two  spaces\nand a newline ";

        for split in 0..reply.len() {
            let (a, b) = reply.split_at(split);
            let fields = reconstruct(&[a, b]);
            assert_eq!(fields["summary"], expected_summary, "split at {split}");
            assert_eq!(fields["ok"], "true", "split at {split}");
        }

        let one_char_chunks: Vec<String> = reply.chars().map(String::from).collect();
        let refs: Vec<&str> = one_char_chunks.iter().map(String::as_str).collect();
        assert_eq!(reconstruct(&refs)["summary"], expected_summary);
    }

    #[test]
    fn text_outside_tags_is_dropped() {
        let fields = reconstruct(&["Here you go: <a>x</a> bye"]);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a"], "x");
    }

    #[test]
    fn stray_angle_bracket_is_literal() {
        let fields = reconstruct(&["<expr>a < b and c<d</expr>"]);
        assert_eq!(fields["expr"], "a < b and c<d");
    }

    #[test]
    fn unterminated_field_flushes_at_finish() {
        let mut demux = TagDemux::new();
        let mut updates = demux.push("<answer>cut off mid");
        assert_eq!(updates.len(), 4);
        updates.extend(demux.finish());
        assert_eq!(updates.last().unwrap().value, "mid");

        let fields = reconstruct(&["<answer>ends with <half"]);
        assert_eq!(fields["answer"], "ends with <half");
    }

    #[test]
    fn nothing_emitted_without_open_tag() {
        let mut demux = TagDemux::new();
        assert!(demux.push("no tags here at all\n").is_empty());
        assert!(demux.finish().is_empty());
        assert!(demux.current_field().is_none());
    }
}

//! Assembled chapter text and the mutations that keep a view in sync with it.
//!
//! Heights and offsets are measured in characters of the assembled text; the
//! presentation layer converts them to whatever unit it scrolls in.

use std::collections::VecDeque;

/// Turns a chapter index into a display label such as `Chapter 3`.
///
/// `{n}` expands to the one-based chapter number and `{title}` to the
/// chapter title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLabeler {
    template: String,
}

impl ChapterLabeler {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    pub fn label(&self, index: usize, title: &str) -> String {
        self.template
            .replace("{n}", &(index + 1).to_string())
            .replace("{title}", title)
            .trim()
            .to_string()
    }
}

impl Default for ChapterLabeler {
    fn default() -> Self {
        Self::new("Chapter {n}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSection {
    pub index: usize,
    pub label: String,
    pub text: String,
}

impl ChapterSection {
    /// Label, blank line, body.
    pub fn rendered(&self) -> String {
        format!("{}\n\n{}", self.label, self.text)
    }

    fn rendered_len(&self) -> usize {
        self.label.chars().count() + 2 + self.text.chars().count()
    }
}

/// Change applied to the assembled buffer, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferMutation {
    /// Buffer now holds only this chapter.
    Replace {
        index: usize,
        label: String,
        text: String,
        /// Always set: the view restarts at the top of the new content.
        scroll_to_top: bool,
    },
    /// Chapter inserted above the current content.
    ///
    /// `anchor_offset` is the length of the inserted block, separator
    /// included: shifting the scroll offset by it keeps the same text in view.
    Prepend {
        index: usize,
        label: String,
        text: String,
        prior_height: usize,
        anchor_offset: usize,
    },
    /// Chapter added below the current content.
    Append {
        index: usize,
        label: String,
        text: String,
    },
}

impl BufferMutation {
    pub fn index(&self) -> usize {
        match self {
            BufferMutation::Replace { index, .. }
            | BufferMutation::Prepend { index, .. }
            | BufferMutation::Append { index, .. } => *index,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            BufferMutation::Replace { label, .. }
            | BufferMutation::Prepend { label, .. }
            | BufferMutation::Append { label, .. } => label,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BufferMutation::Replace { .. } => "replace",
            BufferMutation::Prepend { .. } => "prepend",
            BufferMutation::Append { .. } => "append",
        }
    }
}

/// Chapters in ascending index order, joined by a separator.
#[derive(Debug, Clone)]
pub struct AssembledBuffer {
    sections: VecDeque<ChapterSection>,
    separator: String,
    height: usize,
    anchor_offset: Option<usize>,
}

impl AssembledBuffer {
    pub fn new(separator: &str) -> Self {
        Self {
            sections: VecDeque::new(),
            separator: separator.to_string(),
            height: 0,
            anchor_offset: None,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = &ChapterSection> {
        self.sections.iter()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.sections.iter().map(|section| section.index).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Length of [`AssembledBuffer::text`] in characters.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Offset of the boundary below the most recently prepended chapter.
    pub fn anchor_offset(&self) -> Option<usize> {
        self.anchor_offset
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for (position, section) in self.sections.iter().enumerate() {
            if position > 0 {
                out.push_str(&self.separator);
            }
            out.push_str(&section.rendered());
        }
        out
    }

    pub fn replace(&mut self, section: ChapterSection) -> BufferMutation {
        self.sections.clear();
        self.height = section.rendered_len();
        self.anchor_offset = None;
        let mutation = BufferMutation::Replace {
            index: section.index,
            label: section.label.clone(),
            text: section.text.clone(),
            scroll_to_top: true,
        };
        self.sections.push_back(section);
        mutation
    }

    pub fn prepend(&mut self, section: ChapterSection) -> BufferMutation {
        let first = self.sections.front().map(|front| front.index);
        assert_eq!(
            first,
            Some(section.index + 1),
            "prepended chapter must sit directly above the buffer"
        );
        let prior_height = self.height;
        let anchor_offset = section.rendered_len() + self.separator.chars().count();
        self.height += anchor_offset;
        self.anchor_offset = Some(anchor_offset);
        let mutation = BufferMutation::Prepend {
            index: section.index,
            label: section.label.clone(),
            text: section.text.clone(),
            prior_height,
            anchor_offset,
        };
        self.sections.push_front(section);
        mutation
    }

    pub fn append(&mut self, section: ChapterSection) -> BufferMutation {
        let last = self.sections.back().map(|back| back.index);
        assert_eq!(
            last.map(|index| index + 1),
            Some(section.index),
            "appended chapter must sit directly below the buffer"
        );
        self.height += self.separator.chars().count() + section.rendered_len();
        let mutation = BufferMutation::Append {
            index: section.index,
            label: section.label.clone(),
            text: section.text.clone(),
        };
        self.sections.push_back(section);
        mutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(index: usize, text: &str) -> ChapterSection {
        ChapterSection {
            index,
            label: ChapterLabeler::default().label(index, ""),
            text: text.to_string(),
        }
    }

    #[test]
    fn labels_are_one_based() {
        assert_eq!(ChapterLabeler::default().label(0, "ignored"), "Chapter 1");
        assert_eq!(ChapterLabeler::new("第{n}章").label(2, ""), "第3章");
        assert_eq!(
            ChapterLabeler::new("{n}. {title}").label(4, "Storm"),
            "5. Storm"
        );
    }

    #[test]
    fn chapters_stay_in_ascending_order() {
        let mut buffer = AssembledBuffer::new("\n\n");
        buffer.replace(section(3, "c3"));
        buffer.prepend(section(2, "c2"));
        buffer.append(section(4, "c4"));

        assert_eq!(buffer.indices(), vec![2, 3, 4]);
        assert_eq!(
            buffer.text(),
            "Chapter 3\n\nc2\n\nChapter 4\n\nc3\n\nChapter 5\n\nc4"
        );
        assert_eq!(buffer.height(), buffer.text().chars().count());
    }

    #[test]
    fn prepend_reports_anchor_for_scroll_preservation() {
        let mut buffer = AssembledBuffer::new("\n\n");
        buffer.replace(section(1, "second"));
        let before = buffer.text();

        let mutation = buffer.prepend(section(0, "первая"));

        let BufferMutation::Prepend {
            prior_height,
            anchor_offset,
            ..
        } = mutation
        else {
            panic!("expected a prepend mutation");
        };
        let after = buffer.text();
        assert_eq!(prior_height, before.chars().count());
        assert_eq!(anchor_offset, after.chars().count() - before.chars().count());
        let kept: String = after.chars().skip(anchor_offset).collect();
        assert_eq!(kept, before);
        assert_eq!(buffer.anchor_offset(), Some(anchor_offset));
    }

    #[test]
    fn replace_resets_the_buffer() {
        let mut buffer = AssembledBuffer::new("\n---\n");
        buffer.replace(section(0, "a"));
        buffer.append(section(1, "b"));

        let mutation = buffer.replace(section(5, "f"));

        assert_eq!(mutation.kind(), "replace");
        assert!(matches!(
            mutation,
            BufferMutation::Replace {
                scroll_to_top: true,
                ..
            }
        ));
        assert_eq!(mutation.index(), 5);
        assert_eq!(buffer.indices(), vec![5]);
        assert_eq!(buffer.anchor_offset(), None);
        assert_eq!(buffer.text(), "Chapter 6\n\nf");
    }

    #[test]
    #[should_panic(expected = "directly below")]
    fn gaps_are_a_contract_violation() {
        let mut buffer = AssembledBuffer::new("\n\n");
        buffer.replace(section(0, "a"));
        buffer.append(section(2, "c"));
    }
}

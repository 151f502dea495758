//! Structured tutor reply parsing.
//!
//! The tutor answers in a fixed, tag-delimited layout:
//!
//! ```text
//! === Spoken English Transcript ===
//! ...
//! === Chinese Translation ===
//! ...
//! === Knowledge Points (核心知识点) ===
//! - 词汇 (Vocab): ...
//! - 地道表达 (Phrases): ...
//! - 语法要点 (Grammar): ...
//! === Today's Homework (今日作业) ===
//! ...
//! === Advanced Level Up ===
//! ...
//! ```
//!
//! Parsing never fails. A section that is missing or malformed yields an
//! empty string, and a reply with no usable spoken section falls back to
//! whatever precedes the first `===`.

use regex::Regex;
use std::sync::LazyLock;

/// Top-level sections of a tutor reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Spoken,
    Translation,
    Knowledge,
    Homework,
    LevelUp,
}

/// One row of the reply schema.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub kind: SectionKind,
    /// Full tag name as the tutor is instructed to write it.
    pub name: &'static str,
    /// Lowercase English prefix that identifies the tag on its own.
    pub key: &'static str,
}

pub const SECTIONS: &[Section] = &[
    Section {
        kind: SectionKind::Spoken,
        name: "Spoken English Transcript",
        key: "spoken english transcript",
    },
    Section {
        kind: SectionKind::Translation,
        name: "Chinese Translation",
        key: "chinese translation",
    },
    Section {
        kind: SectionKind::Knowledge,
        name: "Knowledge Points (核心知识点)",
        key: "knowledge points",
    },
    Section {
        kind: SectionKind::Homework,
        name: "Today's Homework (今日作业)",
        key: "today's homework",
    },
    Section {
        kind: SectionKind::LevelUp,
        name: "Advanced Level Up",
        key: "advanced level up",
    },
];

/// Bulleted sub-items of the knowledge section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeKind {
    Vocab,
    Phrases,
    Grammar,
}

#[derive(Debug, Clone, Copy)]
pub struct KnowledgeItem {
    pub kind: KnowledgeKind,
    /// Bilingual label, e.g. `词汇 (Vocab)`.
    pub label: &'static str,
    /// Regex matching the label line prefix; the bare English label is accepted too.
    pattern: &'static str,
}

pub const KNOWLEDGE_ITEMS: &[KnowledgeItem] = &[
    KnowledgeItem {
        kind: KnowledgeKind::Vocab,
        label: "词汇 (Vocab)",
        pattern: r"(?i)-[ \t]*(?:词汇[ \t]*[(（][ \t]*vocab[ \t]*[)）]|vocab)[ \t]*[:：]",
    },
    KnowledgeItem {
        kind: KnowledgeKind::Phrases,
        label: "地道表达 (Phrases)",
        pattern: r"(?i)-[ \t]*(?:地道表达[ \t]*[(（][ \t]*phrases[ \t]*[)）]|phrases)[ \t]*[:：]",
    },
    KnowledgeItem {
        kind: KnowledgeKind::Grammar,
        label: "语法要点 (Grammar)",
        pattern: r"(?i)-[ \t]*(?:语法要点[ \t]*[(（][ \t]*grammar[ \t]*[)）]|grammar)[ \t]*[:：]",
    },
];

/// Each section's own tag matcher, so a stray `===` in one body cannot
/// swallow the tag that follows it.
static SECTION_RES: LazyLock<Vec<(SectionKind, Regex)>> = LazyLock::new(|| {
    SECTIONS
        .iter()
        .map(|section| (section.kind, Regex::new(&tag_pattern(section.key)).unwrap()))
        .collect()
});

static ITEM_RES: LazyLock<Vec<(KnowledgeKind, Regex)>> = LazyLock::new(|| {
    KNOWLEDGE_ITEMS
        .iter()
        .map(|item| (item.kind, Regex::new(item.pattern).unwrap()))
        .collect()
});

/// Flat result of parsing one tutor reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub natural: String,
    pub translation: String,
    pub vocabulary: String,
    pub phrases: String,
    pub grammar: String,
    pub homework: String,
    pub improved: String,
}

/// `=== <key>... ===` with any case, any run of whitespace between words,
/// and curly apostrophes.
fn tag_pattern(key: &str) -> String {
    let words: Vec<String> = key
        .split_whitespace()
        .map(|word| regex::escape(word).replace('\'', "['\u{2018}\u{2019}]"))
        .collect();
    format!(r"(?i)===\s*{}[^=]*===", words.join(r"\s+"))
}

/// Content of every section present in `text`, in text order. Each body
/// runs to the next `===`; the first occurrence of a tag wins.
fn split_sections(text: &str) -> Vec<(SectionKind, &str)> {
    let mut found: Vec<(usize, SectionKind, &str)> = SECTION_RES
        .iter()
        .filter_map(|(kind, re)| {
            let tag = re.find(text)?;
            let rest = &text[tag.end()..];
            let body = rest.find("===").map_or(rest, |end| &rest[..end]);
            Some((tag.start(), *kind, body.trim()))
        })
        .collect();
    found.sort_by_key(|(start, _, _)| *start);
    found.into_iter().map(|(_, kind, body)| (kind, body)).collect()
}

fn split_knowledge(body: &str) -> Vec<(KnowledgeKind, &str)> {
    let mut labels: Vec<(usize, usize, KnowledgeKind)> = ITEM_RES
        .iter()
        .filter_map(|(kind, re)| re.find(body).map(|m| (m.start(), m.end(), *kind)))
        .collect();
    labels.sort_by_key(|(start, _, _)| *start);

    labels
        .iter()
        .enumerate()
        .map(|(i, (_, end, kind))| {
            let stop = labels
                .get(i + 1)
                .map_or(body.len(), |(next_start, _, _)| *next_start);
            (*kind, body[*end..stop.max(*end)].trim())
        })
        .collect()
}

/// Parse a tutor reply into its sections.
pub fn parse_tutor_reply(text: &str) -> ParsedReply {
    let mut reply = ParsedReply::default();

    for (kind, body) in split_sections(text) {
        let body = body.to_string();
        match kind {
            SectionKind::Spoken => reply.natural = body,
            SectionKind::Translation => reply.translation = body,
            SectionKind::Homework => reply.homework = body,
            SectionKind::LevelUp => reply.improved = body,
            SectionKind::Knowledge => {
                for (item, content) in split_knowledge(&body) {
                    let content = content.to_string();
                    match item {
                        KnowledgeKind::Vocab => reply.vocabulary = content,
                        KnowledgeKind::Phrases => reply.phrases = content,
                        KnowledgeKind::Grammar => reply.grammar = content,
                    }
                }
            }
        }
    }

    if reply.natural.is_empty() {
        reply.natural = text.split("===").next().unwrap_or_default().trim().to_string();
    }

    reply
}

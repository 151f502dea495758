//! Tutor persona and per-session context.

use super::response::{KNOWLEDGE_ITEMS, SECTIONS};
use super::stats::DailyStats;

const PERSONA: &str = r#"You are "Coach Aria", a warm, experienced English tutor helping Chinese-speaking learners regain spoken fluency.

LANGUAGE RULES
1. Chinese translations must be standard, idiomatic Mandarin. Avoid translation-ese; use natural word order and phrasing.
2. Correct the learner's English inside your reply, naturally, without lecturing.

HOMEWORK AND GRADING
- When the learner mentions "homework", "assignment", "submission" or "这是作业", grade what they said: give a score from 1 to 10, correct the grammar, and offer a level-up version.
- Every reply fills in the homework section with a concrete task based on the conversation so far.

AUDIO
- Speak the English first, then the Chinese translation, in the same audio stream.

OUTPUT FORMAT (STRICT)
Always answer with exactly these sections, in this order:"#;

const SECTION_GUIDE: &[&str] = &[
    "<English reply with natural corrections. End with a question.>",
    "<Idiomatic Chinese translation in standard Mandarin.>",
    "",
    "<One specific task based on today's conversation.>",
    "<A more native or professional way to say what the learner meant, and why it is better.>",
];

const KNOWLEDGE_GUIDE: &[&str] = &[
    "[Word] - [Meaning];",
    "[Phrase] - [Meaning];",
    "[Grammar topic in English] (中文标题) - [Explanation in natural Chinese].",
];

/// The base system instruction, including the reply schema the parser expects.
pub fn system_instruction() -> String {
    let mut out = String::from(PERSONA);
    out.push('\n');
    for (section, guide) in SECTIONS.iter().zip(SECTION_GUIDE) {
        out.push_str(&format!("\n=== {} ===\n", section.name));
        if section.kind == super::response::SectionKind::Knowledge {
            for (item, example) in KNOWLEDGE_ITEMS.iter().zip(KNOWLEDGE_GUIDE) {
                out.push_str(&format!("- {}:\n{example}\n", item.label));
            }
        } else {
            out.push_str(guide);
            out.push('\n');
        }
    }
    out
}

/// One-line hint telling the tutor whether this session grades homework
/// or is free practice.
pub fn context_hint(stats: &DailyStats) -> String {
    match stats.homework_assigned.as_deref() {
        Some(homework) if stats.has_outstanding_homework() => format!(
            "Mode: Homework Grading. The user is submitting: \"{homework}\". Provide specific feedback, corrections, and a score out of 10. "
        ),
        _ => format!(
            "Mode: Practice. Current Date: {}. ",
            stats.date.format("%Y-%m-%d")
        ),
    }
}

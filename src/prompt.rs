//! Grounded prompt assembly and answer cleanup.
//!
//! The system prompt constrains the model to answer only from the supplied
//! context and to admit missing information with one exact sentence, so an
//! empty retrieval produces a truthful refusal instead of a hallucination.
//! Cleanup strips reasoning traces (`<think>` blocks) and boilerplate
//! introductions some hosted models prepend.

use crate::models::ScoredChunk;

/// The exact sentence the model must return when the context lacks the
/// answer. Also what the caller sees on an empty retrieval.
pub const NO_INFORMATION: &str = "The information is not available in the provided documents.";

/// Marker placed in the context section when retrieval returned nothing.
pub const NO_CONTEXT_MARKER: &str = "[no relevant context found]";

const SYSTEM_PROMPT: &str = "\
You are a highly intelligent Q&A assistant designed to analyze provided documents. \
Your primary goal is to answer questions accurately based only on the text supplied \
in the 'Context' section.

Core Instructions:
- Analyze the context carefully. If it appears to be a table (with rows, columns, \
or comma-separated values), interpret it as structured data.
- Read the context and the user's question carefully and synthesize the information \
to answer all parts of the question.
- Be precise: locate the exact information needed to answer the question. For \
tabular data, find the correct row and column; for text, find the relevant sentence \
or fact.
- Your entire response must be one or two sentences.
- Do NOT use bullet points, numbered lists, or markdown formatting.
- Do NOT add conversational filler, a thinking process, or introductions like \
\"Here is the information\".
- CRUCIAL RULE: If the answer is not explicitly stated in the context, or the \
context reads \"[no relevant context found]\", reply with only this exact phrase: \
\"The information is not available in the provided documents.\" Do not infer, \
guess, or provide any information not directly present in the text.

Provide concise, factual answers only.";

/// A composed prompt ready for the completion capability.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Assemble the grounded prompt for one question from its retrieved context.
pub fn build_prompt(question: &str, context: &[ScoredChunk]) -> Prompt {
    let context_text = if context.is_empty() {
        NO_CONTEXT_MARKER.to_string()
    } else {
        let mut sections = Vec::with_capacity(context.len());
        for scored in context {
            let chunk = &scored.chunk;
            let tag = match chunk.page {
                Some(page) => format!("[{} p.{}]", chunk.source_id, page),
                None => format!("[{}]", chunk.source_id),
            };
            sections.push(format!("{}\n{}", tag, chunk.text));
        }
        sections.join("\n---\n")
    };

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!(
            "Context:\n---\n{}\n---\n\nQuestion: {}",
            context_text, question
        ),
    }
}

/// Strip reasoning traces and boilerplate from a raw model response.
pub fn clean_answer(raw: &str) -> String {
    let mut answer = strip_think_blocks(raw);

    // Drop boilerplate prefixes some models insist on.
    const INTRO_PREFIXES: [&str; 4] = ["answer:", "response:", "based on the context:", "**answer:**"];
    loop {
        let trimmed = answer.trim_start();
        let lower = trimmed.to_lowercase();
        let mut stripped = false;
        for prefix in INTRO_PREFIXES {
            if lower.starts_with(prefix) {
                answer = trimmed[prefix.len()..].to_string();
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }

    // Collapse runs of blank lines left behind by the stripping.
    let mut out = String::with_capacity(answer.len());
    let mut blank_run = 0;
    for line in answer.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out.trim().to_string()
}

/// Remove every `<think>...</think>` span; an unterminated open tag drops the
/// rest of the text.
fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

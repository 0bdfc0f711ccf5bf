//! Markdown to ANSI-styled terminal text.

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const ITALIC: &str = "\x1b[3m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";

/// Renders markdown for a plain terminal. Pure: no I/O, no state.
pub fn render(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_code_block = false;
    // None for bullet lists, Some(next index) for ordered ones.
    let mut list_stack: Vec<Option<u64>> = Vec::new();

    for event in Parser::new(input) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { .. } => {
                    out.push_str(BOLD);
                }
                Tag::Strong => out.push_str(BOLD),
                Tag::Emphasis => out.push_str(ITALIC),
                Tag::CodeBlock(kind) => {
                    in_code_block = true;
                    if let CodeBlockKind::Fenced(lang) = &kind
                        && !lang.is_empty()
                    {
                        out.push_str(DIM);
                        out.push_str(lang);
                        out.push_str(RESET);
                        out.push('\n');
                    }
                    out.push_str(CYAN);
                }
                Tag::List(start) => list_stack.push(start),
                Tag::Item => {
                    let indent = "  ".repeat(list_stack.len().saturating_sub(1));
                    match list_stack.last_mut() {
                        Some(Some(index)) => {
                            out.push_str(&format!("{indent}{index}. "));
                            *index += 1;
                        }
                        _ => {
                            out.push_str(&indent);
                            out.push_str("- ");
                        }
                    }
                }
                Tag::BlockQuote(_) => out.push_str(DIM),
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Heading(_) => {
                    out.push_str(RESET);
                    out.push_str("\n\n");
                }
                TagEnd::Strong | TagEnd::Emphasis => out.push_str(RESET),
                TagEnd::CodeBlock => {
                    in_code_block = false;
                    out.push_str(RESET);
                    out.push('\n');
                }
                TagEnd::Paragraph => out.push_str("\n\n"),
                TagEnd::List(_) => {
                    list_stack.pop();
                    if list_stack.is_empty() {
                        out.push('\n');
                    }
                }
                TagEnd::Item => out.push('\n'),
                TagEnd::BlockQuote(_) => {
                    out.push_str(RESET);
                    out.push('\n');
                }
                _ => {}
            },
            Event::Text(text) => out.push_str(&text),
            Event::Code(code) => {
                out.push_str(CYAN);
                out.push_str(&code);
                out.push_str(RESET);
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => {
                out.push_str(DIM);
                out.push_str("----------------------------------------");
                out.push_str(RESET);
                out.push('\n');
            }
            _ => {}
        }
    }

    // Block handling above leaves trailing newlines.
    while out.ends_with('\n') {
        out.pop();
    }
    if in_code_block {
        out.push_str(RESET);
    }
    out
}

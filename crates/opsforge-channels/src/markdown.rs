//! Markdown adaptation for chat cards.
//!
//! Feishu card markdown has no fenced-code or inline-code rendering: fences
//! become 4-space indented blocks and inline code becomes bold.

/// Rewrite standard markdown into the dialect Feishu cards render.
pub fn adapt_markdown_for_card(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue; // fence lines are dropped
        }
        if in_fence {
            out.push_str("    ");
            out.push_str(line);
        } else {
            out.push_str(&convert_inline_code(line));
        }
        out.push('\n');
    }

    if text.ends_with('\n') || out.is_empty() {
        out
    } else {
        out.truncate(out.len() - 1);
        out
    }
}

/// `` `code` `` -> `**code**`. Unpaired backticks are left alone.
fn convert_inline_code(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let Some(start) = rest.find('`') else {
            out.push_str(rest);
            return out;
        };
        let Some(len) = rest[start + 1..].find('`') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        out.push_str("**");
        out.push_str(&rest[start + 1..start + 1 + len]);
        out.push_str("**");
        rest = &rest[start + len + 2..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_become_indented_blocks() {
        let input = "Before\n```rust\nfn main() {}\n```\nAfter";
        let out = adapt_markdown_for_card(input);
        assert_eq!(out, "Before\n    fn main() {}\nAfter");
    }

    #[test]
    fn inline_code_becomes_bold() {
        assert_eq!(
            adapt_markdown_for_card("run `cargo test` locally"),
            "run **cargo test** locally"
        );
    }

    #[test]
    fn unpaired_backtick_untouched() {
        assert_eq!(adapt_markdown_for_card("a ` b"), "a ` b");
    }

    #[test]
    fn code_inside_fence_not_bolded() {
        let input = "```\nlet s = `tpl`;\n```";
        let out = adapt_markdown_for_card(input);
        assert_eq!(out, "    let s = `tpl`;");
    }

    #[test]
    fn multiple_inline_spans() {
        assert_eq!(
            adapt_markdown_for_card("`a` and `b`"),
            "**a** and **b**"
        );
    }
}

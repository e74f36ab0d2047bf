//! Output truncation helpers.
//!
//! AI context windows are finite and tool output is unbounded, so oversized
//! text is cut down before it reaches the model. Three shapes exist, one per
//! call site: head/tail keep for fresh tool results, an aggressive rewrite
//! for old tool results during context trim, and head-only keep for the
//! dispatcher's small read-only loop. All splits are char-boundary safe.

/// Keep 70 % head and 20 % tail of an over-budget tool result; the middle is
/// elided with a marker that names the tool and the original length.
///
/// Text within `max_chars` is returned unchanged.
pub fn truncate_head_tail(text: &str, max_chars: usize, tool_name: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return text.to_owned();
    }

    let head_keep = max_chars * 7 / 10;
    let tail_keep = max_chars / 5;
    let head: String = chars[..head_keep].iter().collect();
    let tail: String = chars[total - tail_keep..].iter().collect();

    format!(
        "{head}\n\n... [{tool_name} output truncated: {total} chars total, middle elided] ...\n\n{tail}"
    )
}

/// Chars above which a stored tool_result is rewritten during context trim.
pub const TRIM_REWRITE_THRESHOLD: usize = 10_000;

/// Aggressive rewrite for old tool_results when the context budget is blown:
/// keep the first 5000 and last 2000 chars.
pub fn truncate_for_trim(text: &str) -> String {
    const HEAD: usize = 5_000;
    const TAIL: usize = 2_000;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total <= TRIM_REWRITE_THRESHOLD {
        return text.to_owned();
    }

    let head: String = chars[..HEAD].iter().collect();
    let tail: String = chars[total - TAIL..].iter().collect();
    format!("{head}\n\n... [earlier tool output trimmed: {total} chars original] ...\n\n{tail}")
}

/// Keep the head of `text` up to `max_chars`, dropping the tail behind an
/// explicit marker. Used for dispatcher tool results (> 8 KB).
pub fn truncate_keep_head(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return text.to_owned();
    }

    let head: String = chars[..max_chars].iter().collect();
    format!(
        "{head}\n... [truncated: {} of {total} chars dropped]",
        total - max_chars
    )
}

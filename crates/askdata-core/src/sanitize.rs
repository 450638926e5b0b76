//! Query normalization ahead of the safety check.
//!
//! [`sanitize`] strips SQL comments and collapses whitespace so the validator
//! sees the statement's real tokens. Block comments are removed without
//! leaving a gap, so `DR/**/OP TABLE` becomes `DROP TABLE`.
//!
//! String literals are not tracked: a `--` or `/*` inside quotes is treated
//! as a comment too. That can only make the query stricter, never hide a
//! keyword from the validator.

/// Remove comments, collapse whitespace runs to a single space and trim.
///
/// Idempotent: `sanitize(&sanitize(q)) == sanitize(q)` for every input.
pub fn sanitize(query: &str) -> String {
    // Removing one comment can splice two halves of a new marker together
    // (`-/**/-`), so strip until nothing changes.
    let mut current = query.to_string();
    loop {
        let stripped = strip_comments_once(&current);
        if stripped == current {
            break;
        }
        current = stripped;
    }

    current.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_comments_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('-', Some('-')) => {
                // Line comment: drop through end of line, keep the newline
                // as a token separator.
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

//! FTS5 query tokenizer (spec.md §4.5/§8 scenario 3): a quote-toggle state
//! machine that turns a raw user query into an injection-safe FTS5 MATCH
//! expression, tolerating unbalanced quotes without ever producing a parse
//! error in the engine.

/// One token extracted from a raw query: either a bare word or, when it was
/// delimited by a pair of (or one unmatched) double quote, a phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(pub String);

/// Splits `query` into tokens. A `"` always flushes whatever is buffered and
/// toggles quote mode, whether or not the quote is ever closed — so an
/// unbalanced trailing quote degrades to a plain word boundary rather than
/// an error.
pub fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut in_quote = false;

    for c in query.chars() {
        if c == '"' {
            if !buf.is_empty() {
                tokens.push(Token(std::mem::take(&mut buf)));
            }
            in_quote = !in_quote;
        } else if c.is_whitespace() && !in_quote {
            if !buf.is_empty() {
                tokens.push(Token(std::mem::take(&mut buf)));
            }
        } else {
            buf.push(c);
        }
    }
    if !buf.is_empty() {
        tokens.push(Token(buf));
    }

    tokens
}

/// Escapes a phrase for embedding inside an FTS5 double-quoted string:
/// doubles any literal `"` so the engine treats it as a literal character
/// rather than the end of the phrase.
fn escape_phrase(s: &str) -> String {
    s.replace('"', "\"\"")
}

fn quote(s: &str) -> String {
    format!("\"{}\"", escape_phrase(s))
}

/// Builds the FTS5 MATCH expression for `query` (spec.md §4.5/§8 scenario 3):
/// an exact phrase over every token joined by spaces, OR'd with each token
/// matched individually. Returns `None` for a query with no tokens (an
/// empty/whitespace-only string), which the caller should treat as "no
/// results" rather than attempt to run.
pub fn build_match_expression(query: &str) -> Option<String> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return None;
    }

    let exact_joined = tokens.iter().map(|t| t.0.as_str()).collect::<Vec<_>>().join(" ");
    let per_token = tokens.iter().map(|t| quote(&t.0)).collect::<Vec<_>>().join(" OR ");

    Some(format!("({}) OR ({})", quote(&exact_joined), per_token))
}

//! Locating a named function declaration in Lua source

/// A function declaration found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub params: Vec<String>,
    /// Declaration text from its first keyword through the closing `end`
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

/// Find the declaration of `name` as `function name(...)`, `local function
/// name(...)` or `name = function(...)`
pub fn find_declaration(source: &str, name: &str) -> Option<Declaration> {
    let tokens = tokenize(source);
    let text = |i: usize| tokens.get(i).map(|t| t.text);

    for i in 0..tokens.len() {
        let (start, function_at, open_at) = if text(i) == Some("function")
            && text(i + 1) == Some(name)
            && text(i + 2) == Some("(")
        {
            (i, i, i + 2)
        } else if text(i) == Some(name)
            && text(i + 1) == Some("=")
            && text(i + 2) == Some("function")
            && text(i + 3) == Some("(")
            && (i == 0 || text(i - 1) != Some("."))
        {
            (i, i + 2, i + 3)
        } else {
            continue;
        };
        let start = if start > 0 && text(start - 1) == Some("local") {
            start - 1
        } else {
            start
        };

        let params = parse_params(&tokens[open_at + 1..]);
        let end = block_end(&tokens[function_at..])?;
        return Some(Declaration {
            params,
            body: source[tokens[start].start..end].to_string(),
        });
    }
    None
}

fn parse_params(tokens: &[Token<'_>]) -> Vec<String> {
    let mut params = Vec::new();
    for token in tokens {
        match token.text {
            ")" => break,
            "," => {}
            "..." => params.push("...".to_string()),
            word => params.push(word.to_string()),
        }
    }
    params
}

/// Byte offset just past the `end` closing the block opened by `tokens[0]`
fn block_end(tokens: &[Token<'_>]) -> Option<usize> {
    let mut depth = 0usize;
    for token in tokens {
        match token.text {
            "function" | "if" | "do" | "repeat" => depth += 1,
            "end" | "until" => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(token.end);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split Lua source into words and punctuation, skipping strings and comments
fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if source[i..].starts_with("--") {
            i += 2;
            i = match long_bracket_level(bytes, i) {
                Some(level) => skip_long_bracket(source, i, level),
                None => source[i..].find('\n').map_or(bytes.len(), |n| i + n + 1),
            };
        } else if c == b'"' || c == b'\'' {
            i = skip_quoted(bytes, i);
        } else if let Some(level) = long_bracket_level(bytes, i) {
            i = skip_long_bracket(source, i, level);
        } else if c.is_ascii_alphanumeric() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token {
                text: &source[start..i],
                start,
                end: i,
            });
        } else if source[i..].starts_with("...") {
            tokens.push(Token {
                text: "...",
                start: i,
                end: i + 3,
            });
            i += 3;
        } else {
            let len = source[i..].chars().next().map_or(1, char::len_utf8);
            tokens.push(Token {
                text: &source[i..i + len],
                start: i,
                end: i + len,
            });
            i += len;
        }
    }
    tokens
}

/// Level of a long bracket (`[[`, `[==[`) opening at `i`
fn long_bracket_level(bytes: &[u8], i: usize) -> Option<usize> {
    if bytes.get(i) != Some(&b'[') {
        return None;
    }
    let level = bytes[i + 1..].iter().take_while(|b| **b == b'=').count();
    (bytes.get(i + 1 + level) == Some(&b'[')).then_some(level)
}

fn skip_long_bracket(source: &str, i: usize, level: usize) -> usize {
    let close = format!("]{}]", "=".repeat(level));
    let body = i + level + 2;
    source[body..]
        .find(&close)
        .map_or(source.len(), |n| body + n + close.len())
}

fn skip_quoted(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b if b == quote || b == b'\n' => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

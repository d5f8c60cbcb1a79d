use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    MissingParentheses,
    MissingName,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingParentheses => {
                write!(f, "invalid skill invocation: missing parentheses")
            }
            ParseError::MissingName => {
                write!(f, "invalid skill invocation: missing skill name")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses a call-syntax string like `name(a, 2, k='v')` into an
/// [`Invocation`]. Argument values are decoded as literals where possible;
/// anything that is not a recognized literal is kept verbatim as a trimmed
/// string so the worker can do its own coercion.
pub fn parse(text: &str) -> Result<Invocation, ParseError> {
    let text = text.trim();
    let Some((head, rest)) = text.split_once('(') else {
        return Err(ParseError::MissingParentheses);
    };
    if !text.contains(')') {
        return Err(ParseError::MissingParentheses);
    }
    let body = match rest.rfind(')') {
        Some(index) => &rest[..index],
        None => rest,
    };
    let name = head.trim();
    if name.is_empty() {
        return Err(ParseError::MissingName);
    }

    let mut invocation = Invocation {
        name: name.to_string(),
        args: Vec::new(),
        kwargs: Vec::new(),
    };
    if body.trim().is_empty() {
        return Ok(invocation);
    }

    // Comma-splitting must respect quoting and nesting: values may contain
    // parentheses, brackets, or commas of their own.
    let mut current = String::new();
    let mut in_quotes = false;
    let mut paren_depth = 0i32;
    let mut bracket_depth = 0i32;
    for ch in body.chars() {
        match ch {
            '\'' => in_quotes = !in_quotes,
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth -= 1,
            '[' if !in_quotes => bracket_depth += 1,
            ']' if !in_quotes => bracket_depth -= 1,
            ',' if !in_quotes && paren_depth == 0 && bracket_depth == 0 => {
                push_token(&current, &mut invocation);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push_token(&current, &mut invocation);

    Ok(invocation)
}

fn push_token(token: &str, invocation: &mut Invocation) {
    if token.trim().is_empty() {
        return;
    }
    match split_keyword(token) {
        Some((key, expression)) => {
            let key = key.trim().to_string();
            let value = decode_expression(expression);
            if let Some(entry) = invocation.kwargs.iter_mut().find(|(name, _)| *name == key) {
                entry.1 = value;
            } else {
                invocation.kwargs.push((key, value));
            }
        }
        None => invocation.args.push(decode_expression(token)),
    }
}

// The first `=` that is neither quoted nor nested separates a keyword name
// from its value expression.
fn split_keyword(token: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    let mut paren_depth = 0i32;
    let mut bracket_depth = 0i32;
    for (index, ch) in token.char_indices() {
        match ch {
            '\'' => in_quotes = !in_quotes,
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth -= 1,
            '[' if !in_quotes => bracket_depth += 1,
            ']' if !in_quotes => bracket_depth -= 1,
            '=' if !in_quotes && paren_depth == 0 && bracket_depth == 0 => {
                return Some((&token[..index], &token[index + 1..]));
            }
            _ => {}
        }
    }
    None
}

fn decode_expression(expression: &str) -> Value {
    let trimmed = expression.trim();
    match decode_literal(trimmed) {
        Some(value) => value,
        None => Value::String(trimmed.to_string()),
    }
}

/// Decodes a Python-style literal: `None`/`True`/`False`, integers, floats,
/// quoted strings, `[...]` lists, `(...)` tuples, and `{...}` maps with
/// string keys. Returns `None` when the text is not such a literal.
pub fn decode_literal(text: &str) -> Option<Value> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let value = parse_literal(&chars, &mut pos)?;
    skip_whitespace(&chars, &mut pos);
    if pos != chars.len() {
        return None;
    }
    Some(value)
}

fn parse_literal(chars: &[char], pos: &mut usize) -> Option<Value> {
    skip_whitespace(chars, pos);
    match chars.get(*pos)? {
        '\'' | '"' => parse_string(chars, pos),
        '[' => parse_list(chars, pos),
        '(' => parse_parenthesized(chars, pos),
        '{' => parse_map(chars, pos),
        _ => parse_scalar(chars, pos),
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|ch| ch.is_whitespace()) {
        *pos += 1;
    }
}

// Strings are delimiter-to-delimiter with no escape processing.
fn parse_string(chars: &[char], pos: &mut usize) -> Option<Value> {
    let quote = chars[*pos];
    *pos += 1;
    let start = *pos;
    while let Some(&ch) = chars.get(*pos) {
        if ch == quote {
            let text: String = chars[start..*pos].iter().collect();
            *pos += 1;
            return Some(Value::String(text));
        }
        *pos += 1;
    }
    None
}

fn parse_list(chars: &[char], pos: &mut usize) -> Option<Value> {
    *pos += 1;
    let mut items = Vec::new();
    loop {
        skip_whitespace(chars, pos);
        if chars.get(*pos)? == &']' {
            *pos += 1;
            return Some(Value::Array(items));
        }
        items.push(parse_literal(chars, pos)?);
        skip_whitespace(chars, pos);
        match chars.get(*pos)? {
            ',' => *pos += 1,
            ']' => {
                *pos += 1;
                return Some(Value::Array(items));
            }
            _ => return None,
        }
    }
}

// `(x)` is a parenthesized value; `(x,)` and `(x, y)` are sequences.
fn parse_parenthesized(chars: &[char], pos: &mut usize) -> Option<Value> {
    *pos += 1;
    skip_whitespace(chars, pos);
    if chars.get(*pos)? == &')' {
        *pos += 1;
        return Some(Value::Array(Vec::new()));
    }
    let first = parse_literal(chars, pos)?;
    skip_whitespace(chars, pos);
    match chars.get(*pos)? {
        ')' => {
            *pos += 1;
            Some(first)
        }
        ',' => {
            *pos += 1;
            let mut items = vec![first];
            loop {
                skip_whitespace(chars, pos);
                if chars.get(*pos)? == &')' {
                    *pos += 1;
                    return Some(Value::Array(items));
                }
                items.push(parse_literal(chars, pos)?);
                skip_whitespace(chars, pos);
                match chars.get(*pos)? {
                    ',' => *pos += 1,
                    ')' => {
                        *pos += 1;
                        return Some(Value::Array(items));
                    }
                    _ => return None,
                }
            }
        }
        _ => None,
    }
}

fn parse_map(chars: &[char], pos: &mut usize) -> Option<Value> {
    *pos += 1;
    let mut map = Map::new();
    loop {
        skip_whitespace(chars, pos);
        if chars.get(*pos)? == &'}' {
            *pos += 1;
            return Some(Value::Object(map));
        }
        let key = match parse_literal(chars, pos)? {
            Value::String(key) => key,
            _ => return None,
        };
        skip_whitespace(chars, pos);
        if chars.get(*pos)? != &':' {
            return None;
        }
        *pos += 1;
        let value = parse_literal(chars, pos)?;
        map.insert(key, value);
        skip_whitespace(chars, pos);
        match chars.get(*pos)? {
            ',' => *pos += 1,
            '}' => {
                *pos += 1;
                return Some(Value::Object(map));
            }
            _ => return None,
        }
    }
}

fn parse_scalar(chars: &[char], pos: &mut usize) -> Option<Value> {
    let start = *pos;
    while let Some(&ch) = chars.get(*pos) {
        if matches!(ch, ',' | ']' | ')' | '}' | ':') || ch.is_whitespace() {
            break;
        }
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    let token: String = chars[start..*pos].iter().collect();
    match token.as_str() {
        "None" => Some(Value::Null),
        "True" => Some(Value::Bool(true)),
        "False" => Some(Value::Bool(false)),
        _ => parse_number(&token),
    }
}

fn parse_number(token: &str) -> Option<Value> {
    if let Ok(int) = token.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    if let Ok(int) = token.parse::<u64>() {
        return Some(Value::Number(int.into()));
    }
    // Reject alphabetic spellings ("inf", "nan") that f64 parsing accepts.
    let numeric = token
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | '.' | 'e' | 'E'));
    if !numeric {
        return None;
    }
    let float = token.parse::<f64>().ok()?;
    if !float.is_finite() {
        return None;
    }
    Number::from_f64(float).map(Value::Number)
}

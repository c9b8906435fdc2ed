use crate::error::{ExecError, ExecErrorKind};

/// One cellscript expression. A cell or script is a sequence of top-level
/// forms; `(f a b)` parses to `List([Ident("f"), a, b])`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Num(f64),
    Str(String),
    Ident(String),
    List(Vec<Expr>),
}

impl Expr {
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Int(_) | Expr::Num(_) | Expr::Str(_) | Expr::Ident(_) => 1,
            Expr::List(items) => 1 + items.iter().map(Expr::node_count).sum::<usize>(),
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Head identifier of a call form, if this is one.
    pub fn callee(&self) -> Option<&str> {
        match self {
            Expr::List(items) => items.first().and_then(Expr::as_ident),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pos {
    line: usize,
    col: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(Pos),
    Close(Pos),
    Int(i64),
    Num(f64),
    Str(String),
    Ident(String),
}

fn parse_err(pos: Pos, msg: impl Into<String>) -> ExecError {
    ExecError::new(
        ExecErrorKind::Parse,
        format!("{}:{}: {}", pos.line, pos.col, msg.into()),
    )
}

fn lex(source: &str) -> Result<Vec<Token>, ExecError> {
    let mut out = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;
    let mut col = 1usize;

    while let Some(&c) = chars.peek() {
        let pos = Pos { line, col };
        match c {
            '\n' => {
                chars.next();
                line += 1;
                col = 1;
            }
            c if c.is_whitespace() => {
                chars.next();
                col += 1;
            }
            ';' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    col += 1;
                }
            }
            '(' => {
                chars.next();
                col += 1;
                out.push(Token::Open(pos));
            }
            ')' => {
                chars.next();
                col += 1;
                out.push(Token::Close(pos));
            }
            '"' => {
                chars.next();
                col += 1;
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    col += 1;
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let esc = chars
                                .next()
                                .ok_or_else(|| parse_err(pos, "unterminated escape"))?;
                            col += 1;
                            match esc {
                                'n' => s.push('\n'),
                                't' => s.push('\t'),
                                '\\' => s.push('\\'),
                                '"' => s.push('"'),
                                other => {
                                    return Err(parse_err(
                                        pos,
                                        format!("unknown escape: \\{other}"),
                                    ));
                                }
                            }
                        }
                        '\n' => {
                            s.push('\n');
                            line += 1;
                            col = 1;
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(parse_err(pos, "unterminated string literal"));
                }
                out.push(Token::Str(s));
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == ';' || c == '"' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                    col += 1;
                }
                out.push(atom_token(pos, atom)?);
            }
        }
    }

    Ok(out)
}

fn atom_token(pos: Pos, atom: String) -> Result<Token, ExecError> {
    debug_assert!(!atom.is_empty());
    let first = atom.as_bytes()[0];
    let looks_numeric =
        first.is_ascii_digit() || ((first == b'-' || first == b'+') && atom.len() > 1);
    if looks_numeric {
        if let Ok(i) = atom.parse::<i64>() {
            return Ok(Token::Int(i));
        }
        if let Ok(n) = atom.parse::<f64>() {
            return Ok(Token::Num(n));
        }
        if atom.chars().skip(1).all(|c| c.is_ascii_digit() || c == '.') {
            return Err(parse_err(pos, format!("malformed number: {atom}")));
        }
    }
    Ok(Token::Ident(atom))
}

/// Parse a source text into its sequence of top-level forms.
pub fn parse_source(source: &str) -> Result<Vec<Expr>, ExecError> {
    let tokens = lex(source)?;
    let mut forms = Vec::new();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (expr, next) = parse_expr(&tokens, idx)?;
        forms.push(expr);
        idx = next;
    }
    Ok(forms)
}

fn parse_expr(tokens: &[Token], idx: usize) -> Result<(Expr, usize), ExecError> {
    let eof = Pos { line: 0, col: 0 };
    match tokens.get(idx) {
        None => Err(parse_err(eof, "unexpected end of input")),
        Some(Token::Int(i)) => Ok((Expr::Int(*i), idx + 1)),
        Some(Token::Num(n)) => Ok((Expr::Num(*n), idx + 1)),
        Some(Token::Str(s)) => Ok((Expr::Str(s.clone()), idx + 1)),
        Some(Token::Ident(s)) => Ok((Expr::Ident(s.clone()), idx + 1)),
        Some(Token::Close(pos)) => Err(parse_err(*pos, "unmatched ')'")),
        Some(Token::Open(pos)) => {
            let open = *pos;
            let mut items = Vec::new();
            let mut cur = idx + 1;
            loop {
                match tokens.get(cur) {
                    None => return Err(parse_err(open, "unclosed '('")),
                    Some(Token::Close(_)) => return Ok((Expr::List(items), cur + 1)),
                    Some(_) => {
                        let (item, next) = parse_expr(tokens, cur)?;
                        items.push(item);
                        cur = next;
                    }
                }
            }
        }
    }
}

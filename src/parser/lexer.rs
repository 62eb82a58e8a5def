//! Indentation-aware tokenizer for the restricted Python-subset code
//! front-end (spec.md §4.1).

use crate::diagnostics::SourceLoc;
use crate::error::CamelError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    // punctuation / operators
    Eq,      // =
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    // keywords
    If,
    Elif,
    Else,
    For,
    In,
    Not,
    And,
    Or,
    Is,
    Raise,
    True,
    False,
    None,
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "def", "class", "import", "lambda", "try", "except", "while", "global", "nonlocal", "with",
    "yield", "async", "await", "from",
];

pub struct Lexer<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            lines: source.split('\n').collect(),
        }
    }

    fn line_text(&self, line_no: usize) -> String {
        self.lines.get(line_no - 1).copied().unwrap_or("").to_string()
    }

    fn err(&self, message: impl Into<String>, line: usize, column: usize) -> CamelError {
        CamelError::parse(
            message,
            Some(SourceLoc::new(line, column, self.line_text(line))),
        )
    }

    /// Tokenize the entire source into a flat stream, ending with `Eof`.
    pub fn tokenize(&self) -> Result<Vec<Token>, CamelError> {
        let chars: Vec<char> = self.source.chars().collect();
        let mut tokens = Vec::new();
        let mut indent_stack: Vec<usize> = vec![0];
        let mut bracket_depth: i32 = 0;
        let mut i = 0usize;
        let mut line = 1usize;
        let mut col = 1usize;
        let mut at_line_start = true;

        while i < chars.len() {
            if at_line_start && bracket_depth == 0 {
                // Measure indentation width in spaces (tabs count as 1 here; the
                // code front-end is planner-generated and expected to use spaces).
                let line_start_i = i;
                let mut width = 0usize;
                while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                    width += 1;
                    i += 1;
                    col += 1;
                }
                // Blank line or comment-only line: skip without indent tracking.
                if i >= chars.len() || chars[i] == '\n' || chars[i] == '#' {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                        col += 1;
                    }
                    if i < chars.len() {
                        i += 1;
                        line += 1;
                        col = 1;
                    }
                    continue;
                }
                let current = *indent_stack.last().unwrap();
                if width > current {
                    indent_stack.push(width);
                    tokens.push(Token {
                        tok: Tok::Indent,
                        line,
                        column: 1,
                    });
                } else {
                    while *indent_stack.last().unwrap() > width {
                        indent_stack.pop();
                        tokens.push(Token {
                            tok: Tok::Dedent,
                            line,
                            column: 1,
                        });
                    }
                    if *indent_stack.last().unwrap() != width {
                        return Err(self.err(
                            "inconsistent indentation",
                            line,
                            line_start_i - line_start_i + 1,
                        ));
                    }
                }
                at_line_start = false;
                continue;
            }

            let c = chars[i];
            match c {
                ' ' | '\t' => {
                    i += 1;
                    col += 1;
                }
                '#' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
                '\n' => {
                    i += 1;
                    if bracket_depth == 0 {
                        tokens.push(Token {
                            tok: Tok::Newline,
                            line,
                            column: col,
                        });
                        at_line_start = true;
                    }
                    line += 1;
                    col = 1;
                }
                '\\' if i + 1 < chars.len() && chars[i + 1] == '\n' => {
                    // explicit line continuation
                    i += 2;
                    line += 1;
                    col = 1;
                }
                '0'..='9' => {
                    let (tok, consumed) = self.lex_number(&chars[i..]);
                    tokens.push(Token {
                        tok,
                        line,
                        column: col,
                    });
                    col += consumed;
                    i += consumed;
                }
                '"' | '\'' => {
                    let start_line = line;
                    let start_col = col;
                    let quote = c;
                    let mut j = i + 1;
                    let mut s = String::new();
                    let mut closed = false;
                    while j < chars.len() {
                        if chars[j] == '\\' && j + 1 < chars.len() {
                            let escaped = match chars[j + 1] {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '\\' => '\\',
                                '\'' => '\'',
                                '"' => '"',
                                other => other,
                            };
                            s.push(escaped);
                            j += 2;
                        } else if chars[j] == quote {
                            closed = true;
                            j += 1;
                            break;
                        } else if chars[j] == '\n' {
                            break;
                        } else {
                            s.push(chars[j]);
                            j += 1;
                        }
                    }
                    if !closed {
                        return Err(self.err("unterminated string literal", start_line, start_col));
                    }
                    col += j - i;
                    i = j;
                    tokens.push(Token {
                        tok: Tok::Str(s),
                        line: start_line,
                        column: start_col,
                    });
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    let consumed = i - start;
                    let start_col = col;
                    col += consumed;
                    if FORBIDDEN_KEYWORDS.contains(&word.as_str()) {
                        return Err(self.err(
                            format!("unsupported construct '{word}'"),
                            line,
                            start_col,
                        ));
                    }
                    let tok = match word.as_str() {
                        "if" => Tok::If,
                        "elif" => Tok::Elif,
                        "else" => Tok::Else,
                        "for" => Tok::For,
                        "in" => Tok::In,
                        "not" => Tok::Not,
                        "and" => Tok::And,
                        "or" => Tok::Or,
                        "is" => Tok::Is,
                        "raise" => Tok::Raise,
                        "True" => Tok::True,
                        "False" => Tok::False,
                        "None" => Tok::None,
                        _ => Tok::Ident(word),
                    };
                    tokens.push(Token {
                        tok,
                        line,
                        column: start_col,
                    });
                }
                _ => {
                    let start_col = col;
                    let (tok, consumed, opens, closes) = self.lex_symbol(&chars[i..], line, col)?;
                    bracket_depth += opens;
                    bracket_depth -= closes;
                    tokens.push(Token {
                        tok,
                        line,
                        column: start_col,
                    });
                    i += consumed;
                    col += consumed;
                }
            }
        }

        // Close any trailing statement.
        if tokens.last().map(|t| t.tok != Tok::Newline).unwrap_or(false) {
            tokens.push(Token {
                tok: Tok::Newline,
                line,
                column: col,
            });
        }
        if bracket_depth > 0 {
            // Report at the last open-bracket token we can find.
            let loc = tokens
                .iter()
                .rev()
                .find(|t| matches!(t.tok, Tok::LParen | Tok::LBracket | Tok::LBrace))
                .map(|t| (t.line, t.column))
                .unwrap_or((line, col));
            return Err(self.err("unexpected end of input: unclosed bracket", loc.0, loc.1));
        }
        while indent_stack.len() > 1 {
            indent_stack.pop();
            tokens.push(Token {
                tok: Tok::Dedent,
                line,
                column: 1,
            });
        }
        tokens.push(Token {
            tok: Tok::Eof,
            line,
            column: col,
        });
        Ok(tokens)
    }

    fn lex_number(&self, rest: &[char]) -> (Tok, usize) {
        let mut j = 0;
        while j < rest.len() && rest[j].is_ascii_digit() {
            j += 1;
        }
        let mut is_float = false;
        if j < rest.len() && rest[j] == '.' && j + 1 < rest.len() && rest[j + 1].is_ascii_digit() {
            is_float = true;
            j += 1;
            while j < rest.len() && rest[j].is_ascii_digit() {
                j += 1;
            }
        }
        let text: String = rest[..j].iter().collect();
        if is_float {
            (Tok::Float(text.parse().unwrap_or(0.0)), j)
        } else {
            (Tok::Int(text.parse().unwrap_or(0)), j)
        }
    }

    #[allow(clippy::type_complexity)]
    fn lex_symbol(
        &self,
        rest: &[char],
        line: usize,
        col: usize,
    ) -> Result<(Tok, usize, i32, i32), CamelError> {
        let two: String = rest.iter().take(2).collect();
        let result = match two.as_str() {
            "==" => Some((Tok::EqEq, 2, 0, 0)),
            "!=" => Some((Tok::NotEq, 2, 0, 0)),
            "<=" => Some((Tok::LtEq, 2, 0, 0)),
            ">=" => Some((Tok::GtEq, 2, 0, 0)),
            "+=" => Some((Tok::PlusEq, 2, 0, 0)),
            "-=" => Some((Tok::MinusEq, 2, 0, 0)),
            "*=" => Some((Tok::StarEq, 2, 0, 0)),
            "/=" => Some((Tok::SlashEq, 2, 0, 0)),
            "%=" => Some((Tok::PercentEq, 2, 0, 0)),
            _ => None,
        };
        if let Some(r) = result {
            return Ok(r);
        }
        let c = rest[0];
        let r = match c {
            '=' => (Tok::Eq, 1, 0, 0),
            '<' => (Tok::Lt, 1, 0, 0),
            '>' => (Tok::Gt, 1, 0, 0),
            '+' => (Tok::Plus, 1, 0, 0),
            '-' => (Tok::Minus, 1, 0, 0),
            '*' => (Tok::Star, 1, 0, 0),
            '/' => (Tok::Slash, 1, 0, 0),
            '%' => (Tok::Percent, 1, 0, 0),
            '(' => (Tok::LParen, 1, 1, 0),
            ')' => (Tok::RParen, 1, 0, 1),
            '[' => (Tok::LBracket, 1, 1, 0),
            ']' => (Tok::RBracket, 1, 0, 1),
            '{' => (Tok::LBrace, 1, 1, 0),
            '}' => (Tok::RBrace, 1, 0, 1),
            ',' => (Tok::Comma, 1, 0, 0),
            ':' => (Tok::Colon, 1, 0, 0),
            '.' => (Tok::Dot, 1, 0, 0),
            other => return Err(self.err(format!("unexpected character '{other}'"), line, col)),
        };
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<Tok> {
        tokens.iter().map(|t| t.tok.clone()).collect()
    }

    #[test]
    fn tokenizes_simple_assignment() {
        let lex = Lexer::new("value = 1 + 2\n");
        let tokens = lex.tokenize().unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                Tok::Ident("value".into()),
                Tok::Eq,
                Tok::Int(1),
                Tok::Plus,
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn brackets_suppress_newlines() {
        let lex = Lexer::new("x = [\n1,\n2]\n");
        let tokens = lex.tokenize().unwrap();
        // Only one Newline should appear (after the closing bracket's line).
        let newlines = tokens.iter().filter(|t| t.tok == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn unclosed_bracket_is_a_trusted_parse_error() {
        let lex = Lexer::new("items = [\nfinal(\"bad\")");
        let err = lex.tokenize().unwrap_err();
        assert!(err.trusted());
        assert_eq!(err.source_loc().unwrap().line, 1);
    }

    #[test]
    fn forbidden_keyword_is_rejected() {
        let lex = Lexer::new("def f():\n    pass\n");
        let err = lex.tokenize().unwrap_err();
        assert!(err.trusted());
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let lex = Lexer::new("if x:\n    y = 1\nz = 2\n");
        let tokens = lex.tokenize().unwrap();
        assert!(kinds(&tokens).contains(&Tok::Indent));
        assert!(kinds(&tokens).contains(&Tok::Dedent));
    }
}

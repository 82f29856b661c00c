//! Purpose: Tokenize Lua-style table text for the decoder.
//! Exports: `Token`, `TokenKind`, `tokenize`.
//! Role: Byte-offset/line aware scanner; recognizes only the table-literal subset.
//! Invariants: Unknown characters become `TokenKind::Other` instead of failing.
//! Invariants: Only unterminated strings, long brackets and block comments are hard errors.
//! Notes: String escapes are limited to `\"` and `\'`; other backslashes are kept verbatim.

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind<'src> {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Assign,
    Comma,
    Semicolon,
    Dot,
    Minus,
    Name(&'src str),
    Str(String),
    Number(f64),
    /// A numeral-looking run that does not parse as a number (`1.2.3`, `12abc`).
    Malformed(&'src str),
    Other(char),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token<'src> {
    pub kind: TokenKind<'src>,
    pub line: u32,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token<'_>>, Error> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'src> {
    source: &'src str,
    position: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            position: 0,
            line: 1,
        }
    }

    fn rest(&self) -> &'src str {
        &self.source[self.position..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: &str, line: u32, offset: usize) -> Error {
        Error::new(ErrorKind::Parse)
            .with_message(message)
            .with_line(line)
            .with_offset(offset as u64)
    }

    fn next_token(&mut self) -> Result<Token<'src>, Error> {
        self.skip_trivia()?;

        let offset = self.position;
        let line = self.line;
        let Some(c) = self.peek_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
                offset,
            });
        };

        let kind = match c {
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            ']' => self.single(TokenKind::RBracket),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '=' => self.single(TokenKind::Assign),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            '-' => self.single(TokenKind::Minus),
            '[' => match self.long_bracket_level() {
                Some(level) => TokenKind::Str(self.long_string(level, line, offset)?),
                None => self.single(TokenKind::LBracket),
            },
            '"' | '\'' => TokenKind::Str(self.quoted_string(c, line, offset)?),
            '.' if self.peek_nth(1).is_some_and(|next| next.is_ascii_digit()) => self.numeral(),
            '.' => self.single(TokenKind::Dot),
            c if c.is_ascii_digit() => self.numeral(),
            c if c.is_ascii_alphabetic() || c == '_' => self.name(),
            other => self.single(TokenKind::Other(other)),
        };

        Ok(Token { kind, line, offset })
    }

    fn single(&mut self, kind: TokenKind<'src>) -> TokenKind<'src> {
        self.advance();
        kind
    }

    fn skip_trivia(&mut self) -> Result<(), Error> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('-') if self.peek_nth(1) == Some('-') => {
                    let line = self.line;
                    let offset = self.position;
                    self.advance();
                    self.advance();
                    if let Some(level) = self.long_bracket_level() {
                        self.long_string(level, line, offset)
                            .map_err(|_| self.error("unterminated block comment", line, offset))?;
                    } else {
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Level of a `[[` / `[==[` opener at the cursor, if one starts here.
    fn long_bracket_level(&self) -> Option<usize> {
        let rest = self.rest();
        let after = rest.strip_prefix('[')?;
        let level = after.chars().take_while(|c| *c == '=').count();
        after[level..].starts_with('[').then_some(level)
    }

    fn long_string(&mut self, level: usize, line: u32, offset: usize) -> Result<String, Error> {
        let open_len = level + 2;
        for _ in 0..open_len {
            self.advance();
        }
        if self.peek_char() == Some('\r') {
            self.advance();
        }
        if self.peek_char() == Some('\n') {
            self.advance();
        }
        let close = format!("]{}]", "=".repeat(level));
        let Some(end) = self.rest().find(&close) else {
            return Err(self.error("unterminated long string", line, offset));
        };
        let content = self.rest()[..end].to_string();
        for _ in 0..content.chars().count() + close.len() {
            self.advance();
        }
        Ok(content)
    }

    fn quoted_string(&mut self, quote: char, line: u32, offset: usize) -> Result<String, Error> {
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string", line, offset)),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.peek_char() {
                    Some(next @ ('"' | '\'')) => {
                        self.advance();
                        out.push(next);
                    }
                    _ => out.push('\\'),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn numeral(&mut self) -> TokenKind<'src> {
        let start = self.position;
        let is_hex = self.rest().starts_with("0x") || self.rest().starts_with("0X");
        while let Some(c) = self.peek_char() {
            let exponent_sign = (c == '+' || c == '-')
                && !is_hex
                && matches!(self.source[start..self.position].chars().last(), Some('e' | 'E'));
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.position];
        match parse_numeral(text) {
            Some(number) => TokenKind::Number(number),
            None => TokenKind::Malformed(text),
        }
    }

    fn name(&mut self) -> TokenKind<'src> {
        let start = self.position;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Name(&self.source[start..self.position])
    }
}

fn parse_numeral(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|value| value as f64);
    }
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::{TokenKind, tokenize};
    use crate::core::error::ErrorKind;

    fn kinds(source: &str) -> Vec<TokenKind<'_>> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn assignment_header_tokens() {
        assert_eq!(
            kinds("_G.Pokemon = {}"),
            vec![
                TokenKind::Name("_G"),
                TokenKind::Dot,
                TokenKind::Name("Pokemon"),
                TokenKind::Assign,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numerals_cover_decimal_hex_and_exponent() {
        assert_eq!(
            kinds("35 0.5 .25 0x1F 1e3 2E-1"),
            vec![
                TokenKind::Number(35.0),
                TokenKind::Number(0.5),
                TokenKind::Number(0.25),
                TokenKind::Number(31.0),
                TokenKind::Number(1000.0),
                TokenKind::Number(0.2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn malformed_numerals_are_tokens_not_errors() {
        assert_eq!(
            kinds("1.2.3 12abc"),
            vec![
                TokenKind::Malformed("1.2.3"),
                TokenKind::Malformed("12abc"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_unescape_only_quotes() {
        assert_eq!(
            kinds(r#""say \"hi\"" 'it\'s' "a\nb\\c""#),
            vec![
                TokenKind::Str("say \"hi\"".to_string()),
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("a\\nb\\\\c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn long_strings_and_comments() {
        let source = "-- line comment\n--[[ block\ncomment ]] [==[\nraw ]] text]==] x";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Str("raw ]] text".to_string()),
                TokenKind::Name("x"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lines_and_offsets_are_tracked() {
        let tokens = tokenize("a =\n  {").expect("tokenize");
        let brace = &tokens[2];
        assert_eq!(brace.kind, TokenKind::LBrace);
        assert_eq!(brace.line, 2);
        assert_eq!(brace.offset, 6);
    }

    #[test]
    fn unterminated_string_is_a_parse_error() {
        let err = tokenize("x = \"open").expect_err("unterminated");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.line(), Some(1));
        assert_eq!(err.offset(), Some(4));
    }

    #[test]
    fn unknown_characters_are_tolerated() {
        assert_eq!(
            kinds("@ #"),
            vec![TokenKind::Other('@'), TokenKind::Other('#'), TokenKind::Eof]
        );
    }
}

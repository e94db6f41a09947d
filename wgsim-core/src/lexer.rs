use crate::bail_syntax;
use crate::error::Result;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, hex_digit0, hex_digit1, one_of},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{pair, tuple},
};

/// How many tokens back the scanner looks for a template-opening `<` when
/// deciding whether `>>` closes two nested templates.
const TEMPLATE_LOOKBACK: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Alias,
    Break,
    Case,
    Const,
    ConstAssert,
    Continue,
    Continuing,
    Default,
    Diagnostic,
    Discard,
    Else,
    Enable,
    False,
    Fn,
    For,
    If,
    Let,
    Loop,
    Override,
    Requires,
    Return,
    Struct,
    Switch,
    True,
    Var,
    While,

    // Identifiers and literals
    Identifier,
    IntLiteral,
    FloatLiteral,

    // Punctuation
    And,
    AndAnd,
    Arrow,
    At,
    Slash,
    Bang,
    BracketLeft,
    BracketRight,
    BraceLeft,
    BraceRight,
    Colon,
    Comma,
    Equal,
    EqualEqual,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    ShiftRight,
    LessThan,
    LessThanEqual,
    ShiftLeft,
    Percent,
    Minus,
    MinusMinus,
    Period,
    Plus,
    PlusPlus,
    Or,
    OrOr,
    ParenLeft,
    ParenRight,
    Semicolon,
    Star,
    Tilde,
    Underscore,
    Xor,

    // Compound assignment
    PlusEqual,
    MinusEqual,
    TimesEqual,
    DivisionEqual,
    ModuloEqual,
    AndEqual,
    OrEqual,
    XorEqual,
    ShiftRightEqual,
    ShiftLeftEqual,

    Eof,
}

impl TokenKind {
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::TimesEqual
                | TokenKind::DivisionEqual
                | TokenKind::ModuloEqual
                | TokenKind::AndEqual
                | TokenKind::OrEqual
                | TokenKind::XorEqual
                | TokenKind::ShiftRightEqual
                | TokenKind::ShiftLeftEqual
        )
    }

    /// Tokens after which a `-` can only be a binary minus.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Identifier
                | TokenKind::IntLiteral
                | TokenKind::FloatLiteral
                | TokenKind::True
                | TokenKind::False
                | TokenKind::ParenRight
                | TokenKind::BracketRight
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} '{}' (line {})", self.kind, self.lexeme, self.line)
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "alias" => TokenKind::Alias,
        "break" => TokenKind::Break,
        "case" => TokenKind::Case,
        "const" => TokenKind::Const,
        "const_assert" => TokenKind::ConstAssert,
        "continue" => TokenKind::Continue,
        "continuing" => TokenKind::Continuing,
        "default" => TokenKind::Default,
        "diagnostic" => TokenKind::Diagnostic,
        "discard" => TokenKind::Discard,
        "else" => TokenKind::Else,
        "enable" => TokenKind::Enable,
        "false" => TokenKind::False,
        "fn" => TokenKind::Fn,
        "for" => TokenKind::For,
        "if" => TokenKind::If,
        "let" => TokenKind::Let,
        "loop" => TokenKind::Loop,
        "override" => TokenKind::Override,
        "requires" => TokenKind::Requires,
        "return" => TokenKind::Return,
        "struct" => TokenKind::Struct,
        "switch" => TokenKind::Switch,
        "true" => TokenKind::True,
        "var" => TokenKind::Var,
        "while" => TokenKind::While,
        _ => return None,
    };
    Some(kind)
}

// Longest first, so a prefix never shadows a longer operator.
const OPERATORS: &[(&str, TokenKind)] = &[
    (">>=", TokenKind::ShiftRightEqual),
    ("<<=", TokenKind::ShiftLeftEqual),
    ("->", TokenKind::Arrow),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("==", TokenKind::EqualEqual),
    ("!=", TokenKind::NotEqual),
    (">=", TokenKind::GreaterThanEqual),
    ("<=", TokenKind::LessThanEqual),
    (">>", TokenKind::ShiftRight),
    ("<<", TokenKind::ShiftLeft),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("+=", TokenKind::PlusEqual),
    ("-=", TokenKind::MinusEqual),
    ("*=", TokenKind::TimesEqual),
    ("/=", TokenKind::DivisionEqual),
    ("%=", TokenKind::ModuloEqual),
    ("&=", TokenKind::AndEqual),
    ("|=", TokenKind::OrEqual),
    ("^=", TokenKind::XorEqual),
    ("&", TokenKind::And),
    ("@", TokenKind::At),
    ("/", TokenKind::Slash),
    ("!", TokenKind::Bang),
    ("[", TokenKind::BracketLeft),
    ("]", TokenKind::BracketRight),
    ("{", TokenKind::BraceLeft),
    ("}", TokenKind::BraceRight),
    (":", TokenKind::Colon),
    (",", TokenKind::Comma),
    ("=", TokenKind::Equal),
    (">", TokenKind::GreaterThan),
    ("<", TokenKind::LessThan),
    ("%", TokenKind::Percent),
    ("-", TokenKind::Minus),
    (".", TokenKind::Period),
    ("+", TokenKind::Plus),
    ("|", TokenKind::Or),
    ("(", TokenKind::ParenLeft),
    (")", TokenKind::ParenRight),
    (";", TokenKind::Semicolon),
    ("*", TokenKind::Star),
    ("~", TokenKind::Tilde),
    ("^", TokenKind::Xor),
];

/// Type generators whose `<` opens a template parameter list.
pub fn is_template_name(name: &str) -> bool {
    matches!(
        name,
        "array"
            | "atomic"
            | "ptr"
            | "binding_array"
            | "vec2"
            | "vec3"
            | "vec4"
            | "mat2x2"
            | "mat2x3"
            | "mat2x4"
            | "mat3x2"
            | "mat3x3"
            | "mat3x4"
            | "mat4x2"
            | "mat4x3"
            | "mat4x4"
    ) || name.starts_with("texture_")
}

fn float_suffix(input: &str) -> IResult<&str, char> {
    one_of("fh")(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn hex_exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("pP"), opt(one_of("+-")), digit1)))(input)
}

fn decimal_float(input: &str) -> IResult<&str, &str> {
    alt((
        // .5  1.5  1.5e3
        recognize(tuple((digit0, char('.'), digit1, opt(exponent), opt(float_suffix)))),
        // 1.  1.e3
        recognize(tuple((digit1, char('.'), digit0, opt(exponent), opt(float_suffix)))),
        // 1e3
        recognize(tuple((digit1, exponent, opt(float_suffix)))),
        // 1f
        recognize(pair(digit1, float_suffix)),
    ))(input)
}

fn hex_float(input: &str) -> IResult<&str, &str> {
    alt((
        // 0x.8  0x1.8p3
        recognize(tuple((
            tag_no_case("0x"),
            hex_digit0,
            char('.'),
            hex_digit1,
            opt(pair(hex_exponent, opt(float_suffix))),
        ))),
        // 0x1.  0x1.p2
        recognize(tuple((
            tag_no_case("0x"),
            hex_digit1,
            char('.'),
            hex_digit0,
            opt(pair(hex_exponent, opt(float_suffix))),
        ))),
        // 0x1p4
        recognize(tuple((tag_no_case("0x"), hex_digit1, hex_exponent, opt(float_suffix)))),
    ))(input)
}

fn hex_int(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag_no_case("0x"), hex_digit1, opt(one_of("iu")))))(input)
}

fn decimal_int(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(one_of("iu"))))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((alpha1, recognize(char('_')))), many0(alt((alphanumeric1, recognize(char('_')))))))(
        input,
    )
}

/// Longest numeric literal at the start of `input`. Floats win ties.
fn scan_number(input: &str) -> Option<(TokenKind, usize)> {
    let mut best: Option<(TokenKind, usize)> = None;
    let candidates: [(TokenKind, fn(&str) -> IResult<&str, &str>); 4] = [
        (TokenKind::FloatLiteral, hex_float),
        (TokenKind::FloatLiteral, decimal_float),
        (TokenKind::IntLiteral, hex_int),
        (TokenKind::IntLiteral, decimal_int),
    ];
    for (kind, recognizer) in candidates {
        if let Ok((_, matched)) = recognizer(input) {
            if best.map_or(true, |(_, len)| matched.len() > len) {
                best = Some((kind, matched.len()));
            }
        }
    }
    best
}

struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Scanner {
            source,
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn push(&mut self, kind: TokenKind, len: usize) {
        let lexeme = &self.source[self.pos..self.pos + len];
        self.tokens.push(Token::new(kind, lexeme, self.line));
        self.pos += len;
    }

    fn scan(mut self) -> Result<Vec<Token>> {
        while self.pos < self.source.len() {
            if self.skip_trivia()? {
                continue;
            }
            self.scan_token()?;
        }
        self.tokens.push(Token::new(TokenKind::Eof, "", self.line));
        Ok(self.tokens)
    }

    /// Skips whitespace and comments. Returns true when anything was skipped.
    fn skip_trivia(&mut self) -> Result<bool> {
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(false);
        };

        if c.is_whitespace() {
            if c == '\n' {
                self.line += 1;
            }
            self.pos += c.len_utf8();
            return Ok(true);
        }

        if rest.starts_with("//") {
            let len = rest.find('\n').unwrap_or(rest.len());
            self.pos += len;
            return Ok(true);
        }

        if rest.starts_with("/*") {
            let start_line = self.line;
            let mut depth = 0usize;
            let bytes = rest.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i..].starts_with(b"/*") {
                    depth += 1;
                    i += 2;
                } else if bytes[i..].starts_with(b"*/") {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    if bytes[i] == b'\n' {
                        self.line += 1;
                    }
                    i += 1;
                }
            }
            if depth != 0 {
                bail_syntax!(start_line, "invalid syntax at line {}: unterminated block comment", start_line);
            }
            self.pos += i;
            return Ok(true);
        }

        Ok(false)
    }

    fn scan_token(&mut self) -> Result<()> {
        let rest = self.rest();
        let mut chars = rest.chars();
        let c = chars.next().unwrap_or('\0');
        let next = chars.next().unwrap_or('\0');
        let after = chars.next().unwrap_or('\0');

        let starts_number = c.is_ascii_digit() || (c == '.' && next.is_ascii_digit());
        let previous_ends_operand = self.tokens.last().map_or(false, |t| t.kind.ends_operand());

        if starts_number {
            if let Some((kind, len)) = scan_number(rest) {
                self.push(kind, len);
                return Ok(());
            }
        }

        // A '-' glued to a number is a negative literal unless the previous
        // token closes an operand, in which case it is a binary minus.
        if c == '-' && !previous_ends_operand && (next.is_ascii_digit() || (next == '.' && after.is_ascii_digit())) {
            if let Some((kind, len)) = scan_number(&rest[1..]) {
                self.push(kind, len + 1);
                return Ok(());
            }
        }

        if c.is_alphabetic() || c == '_' {
            if let Ok((_, word)) = identifier(rest) {
                let kind = if word == "_" {
                    TokenKind::Underscore
                } else {
                    keyword(word).unwrap_or(TokenKind::Identifier)
                };
                self.push(kind, word.len());
                return Ok(());
            }
        }

        if c == '>' && (next == '>' || next == '=') && self.closes_template() {
            self.push(TokenKind::GreaterThan, 1);
            return Ok(());
        }

        for (text, kind) in OPERATORS {
            if rest.starts_with(text) {
                self.push(*kind, text.len());
                return Ok(());
            }
        }

        bail_syntax!(self.line, "invalid syntax at line {}: unexpected character '{}'", self.line, c)
    }

    /// True when a recent `<` opened a template list, so a following `>` must
    /// close it instead of starting `>>` or `>=`.
    fn closes_template(&self) -> bool {
        let len = self.tokens.len();
        for i in (len.saturating_sub(TEMPLATE_LOOKBACK)..len).rev() {
            let token = &self.tokens[i];
            if token.kind.is_assignment() {
                return false;
            }
            if token.kind == TokenKind::LessThan {
                return i > 0
                    && self.tokens[i - 1].kind == TokenKind::Identifier
                    && is_template_name(&self.tokens[i - 1].lexeme);
            }
        }
        false
    }
}

/// Converts shader source into tokens, ending with an `Eof` sentinel.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Scanner::new(source).scan()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        tokens[..tokens.len() - 1].iter().map(|t| t.kind).collect()
    }

    fn lexemes(input: &str) -> Vec<String> {
        let tokens = tokenize(input).unwrap();
        tokens[..tokens.len() - 1].iter().map(|t| t.lexeme.clone()).collect()
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            kinds("fn var let const override struct alias"),
            vec![
                TokenKind::Fn,
                TokenKind::Var,
                TokenKind::Let,
                TokenKind::Const,
                TokenKind::Override,
                TokenKind::Struct,
                TokenKind::Alias,
            ]
        );
    }

    #[test]
    fn test_types_are_identifiers() {
        assert_eq!(lexemes("f32 vec3 texture_2d"), vec!["f32", "vec3", "texture_2d"]);
        assert_eq!(
            kinds("f32 vec3 texture_2d"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Identifier]
        );
    }

    #[test]
    fn test_shift_right_between_literals() {
        assert_eq!(
            kinds("1>>2"),
            vec![TokenKind::IntLiteral, TokenKind::ShiftRight, TokenKind::IntLiteral]
        );
    }

    #[test]
    fn test_nested_template_closes_split() {
        assert_eq!(
            kinds("array<vec4<f32>>"),
            vec![
                TokenKind::Identifier,
                TokenKind::LessThan,
                TokenKind::Identifier,
                TokenKind::LessThan,
                TokenKind::Identifier,
                TokenKind::GreaterThan,
                TokenKind::GreaterThan,
            ]
        );
    }

    #[test]
    fn test_shift_after_comparison_is_not_split() {
        // `<` here is a comparison, not a template opener.
        let k = kinds("a < b >> 1");
        assert!(k.contains(&TokenKind::ShiftRight));
    }

    #[test]
    fn test_assignment_stops_template_lookback() {
        let k = kinds("x = a >>= 1");
        assert_eq!(k[3], TokenKind::ShiftRightEqual);
    }

    #[test]
    fn test_template_followed_by_initializer() {
        let k = kinds("var v: vec2<f32>= a;");
        assert_eq!(k[5], TokenKind::Identifier);
        assert_eq!(k[6], TokenKind::GreaterThan);
        assert_eq!(k[7], TokenKind::Equal);
    }

    #[test]
    fn test_hex_float_without_exponent() {
        assert_eq!(kinds("0x.5"), vec![TokenKind::FloatLiteral]);
        assert_eq!(lexemes("0x.5"), vec!["0x.5"]);
    }

    #[test]
    fn test_float_literal_formats() {
        let input = "1.0 .5 2. 1e3 1.5e-3f 3f 2h 0x1.8p3 0X1p-2";
        assert!(kinds(input).iter().all(|k| *k == TokenKind::FloatLiteral));
        assert_eq!(
            lexemes(input),
            vec!["1.0", ".5", "2.", "1e3", "1.5e-3f", "3f", "2h", "0x1.8p3", "0X1p-2"]
        );
    }

    #[test]
    fn test_integer_literal_formats() {
        let input = "0 42 7u 3i 0xFF 0x1Fu";
        assert!(kinds(input).iter().all(|k| *k == TokenKind::IntLiteral));
        assert_eq!(lexemes(input), vec!["0", "42", "7u", "3i", "0xFF", "0x1Fu"]);
    }

    #[test]
    fn test_minus_after_operand_is_binary() {
        assert_eq!(
            kinds("a-1"),
            vec![TokenKind::Identifier, TokenKind::Minus, TokenKind::IntLiteral]
        );
        assert_eq!(
            kinds("(a)-1"),
            vec![
                TokenKind::ParenLeft,
                TokenKind::Identifier,
                TokenKind::ParenRight,
                TokenKind::Minus,
                TokenKind::IntLiteral
            ]
        );
    }

    #[test]
    fn test_negative_literal() {
        assert_eq!(lexemes("x = -1.5;"), vec!["x", "=", "-1.5", ";"]);
    }

    #[test]
    fn test_arrow_and_decrement() {
        assert_eq!(
            kinds("fn f() -> i32 { i--; }"),
            vec![
                TokenKind::Fn,
                TokenKind::Identifier,
                TokenKind::ParenLeft,
                TokenKind::ParenRight,
                TokenKind::Arrow,
                TokenKind::Identifier,
                TokenKind::BraceLeft,
                TokenKind::Identifier,
                TokenKind::MinusMinus,
                TokenKind::Semicolon,
                TokenKind::BraceRight,
            ]
        );
    }

    #[test]
    fn test_compound_assignment_operators() {
        assert_eq!(
            kinds("+= -= *= /= %= &= |= ^= <<= >>="),
            vec![
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
                TokenKind::TimesEqual,
                TokenKind::DivisionEqual,
                TokenKind::ModuloEqual,
                TokenKind::AndEqual,
                TokenKind::OrEqual,
                TokenKind::XorEqual,
                TokenKind::ShiftLeftEqual,
                TokenKind::ShiftRightEqual,
            ]
        );
    }

    #[test]
    fn test_comments_and_line_numbers() {
        let tokens = tokenize("// line comment\nvar /* block /* nested */ still\n comment */ x;").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].lexeme, "x");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_underscore_and_identifiers() {
        assert_eq!(
            kinds("_ = _foo;"),
            vec![
                TokenKind::Underscore,
                TokenKind::Equal,
                TokenKind::Identifier,
                TokenKind::Semicolon
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("var x = 1;\nvar y = $;").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(err.to_string().contains("invalid syntax at line 2"));
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(tokenize("/* never closed").is_err());
    }

    #[test]
    fn test_empty_source_is_just_eof() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }
}

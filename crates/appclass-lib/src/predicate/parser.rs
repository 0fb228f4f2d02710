//! Tokenizer and recursive-descent parser for predicate expressions
//!
//! # Syntax
//!
//! ```text
//! predicate   = or_expr [ "score" operand ]
//! or_expr     = and_expr { ("||" | "or") and_expr }
//! and_expr    = not_expr { ("&&" | "and") not_expr }
//! not_expr    = ("!" | "not") not_expr | primary
//! primary     = "(" or_expr ")" | "exists" "(" ident ")" | comparison | operand
//! comparison  = operand cmp_op operand | operand "in" "[" literal { "," literal } "]"
//! cmp_op      = "==" | "!=" | "<" | "<=" | ">" | ">="
//! operand     = ident | literal
//! literal     = string | number | "true" | "false" | "absent"
//! ```
//!
//! # Examples
//!
//! ```text
//! region == "us-east"
//! tier in ["gold", "platinum"] and cpu >= 4
//! !exists(spot) score priority
//! ```

use crate::models::AttributeValue;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Either an attribute lookup or a literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Attribute(String),
    Literal(AttributeValue),
}

/// Boolean expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    In {
        operand: Operand,
        values: Vec<AttributeValue>,
    },
    Exists(String),
    Truthy(Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// A fully parsed predicate: condition plus optional affinity score
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub condition: Expr,
    pub score: Option<Operand>,
}

/// Parse failure, located by the offending fragment of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub fragment: String,
    pub reason: String,
}

impl ParseError {
    fn new(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

const END_OF_INPUT: &str = "<end of expression>";

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    Cmp(CmpOp),
    And,
    Or,
    Not,
    In,
    Exists,
    Score,
    True,
    False,
    Absent,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.pos..].chars().nth(1)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn fragment_from(&self, start: usize) -> &'a str {
        &self.input[start..self.pos]
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let start = self.pos;

        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => return Ok(self.token(TokenKind::Eof, start)),
        };

        // Single-character punctuation
        let punct = match ch {
            '(' => Some(TokenKind::OpenParen),
            ')' => Some(TokenKind::CloseParen),
            '[' => Some(TokenKind::OpenBracket),
            ']' => Some(TokenKind::CloseBracket),
            ',' => Some(TokenKind::Comma),
            _ => None,
        };
        if let Some(kind) = punct {
            self.pos += 1;
            return Ok(self.token(kind, start));
        }

        // Operators
        let next = self.peek_second();
        let operator = match (ch, next) {
            ('=', Some('=')) => Some((TokenKind::Cmp(CmpOp::Eq), 2)),
            ('!', Some('=')) => Some((TokenKind::Cmp(CmpOp::Ne), 2)),
            ('<', Some('=')) => Some((TokenKind::Cmp(CmpOp::Le), 2)),
            ('>', Some('=')) => Some((TokenKind::Cmp(CmpOp::Ge), 2)),
            ('&', Some('&')) => Some((TokenKind::And, 2)),
            ('|', Some('|')) => Some((TokenKind::Or, 2)),
            ('<', _) => Some((TokenKind::Cmp(CmpOp::Lt), 1)),
            ('>', _) => Some((TokenKind::Cmp(CmpOp::Gt), 1)),
            ('!', _) => Some((TokenKind::Not, 1)),
            _ => None,
        };
        if let Some((kind, len)) = operator {
            self.pos += len;
            return Ok(self.token(kind, start));
        }

        // Quoted strings
        if ch == '"' || ch == '\'' {
            return self.quoted_string(ch, start);
        }

        // Numbers, including a leading minus sign
        if ch.is_ascii_digit() || (ch == '-' && next.is_some_and(|c| c.is_ascii_digit())) {
            return self.number(start);
        }

        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.word(start));
        }

        self.pos += ch.len_utf8();
        Err(ParseError::new(
            self.fragment_from(start),
            format!("unexpected character '{}'", ch),
        ))
    }

    fn quoted_string(&mut self, quote: char, start: usize) -> Result<Token, ParseError> {
        self.pos += quote.len_utf8();
        let body_start = self.pos;

        while let Some(c) = self.peek_char() {
            if c == quote {
                let value = self.input[body_start..self.pos].to_string();
                self.pos += c.len_utf8();
                return Ok(self.token(TokenKind::Str(value), start));
            }
            self.pos += c.len_utf8();
        }

        Err(ParseError::new(
            self.fragment_from(start),
            "unterminated string literal",
        ))
    }

    fn number(&mut self, start: usize) -> Result<Token, ParseError> {
        self.pos += 1;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text = self.fragment_from(start);
        text.parse::<f64>()
            .map(|n| self.token(TokenKind::Number(n), start))
            .map_err(|_| ParseError::new(text, "invalid number literal"))
    }

    fn word(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '/') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let kind = match self.fragment_from(start) {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "exists" => TokenKind::Exists,
            "score" => TokenKind::Score,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "absent" => TokenKind::Absent,
            word => TokenKind::Ident(word.to_string()),
        };
        self.token(kind, start)
    }
}

/// Parser over the token stream, one token of lookahead
/// Deepest expression tree a predicate may build. Evaluation and drop
/// recurse along the tree, so this bounds their stack use too.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            depth: 0,
        })
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    fn fragment(&self) -> &'a str {
        if self.current.kind == TokenKind::Eof {
            END_OF_INPUT
        } else {
            &self.tokenizer.input[self.current.start..self.current.end]
        }
    }

    fn error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.fragment(), reason)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.current.kind != kind {
            return Err(self.error(format!("expected {}", what)));
        }
        self.advance()
    }

    fn parse_predicate(&mut self) -> Result<Ast, ParseError> {
        if self.current.kind == TokenKind::Eof {
            return Err(self.error("empty expression"));
        }

        let condition = self.parse_or()?;

        let score = if self.current.kind == TokenKind::Score {
            self.advance()?;
            Some(self.parse_operand()?)
        } else {
            None
        };

        if self.current.kind != TokenKind::Eof {
            return Err(self.error("unexpected trailing input"));
        }

        Ok(Ast { condition, score })
    }

    /// OR binds loosest
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let entered = self.depth;
        let mut left = self.parse_and()?;

        // Each chained operator adds a level above the previous terms
        while self.current.kind == TokenKind::Or {
            self.descend()?;
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }

        self.depth = entered;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let entered = self.depth;
        let mut left = self.parse_not()?;

        while self.current.kind == TokenKind::And {
            self.descend()?;
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }

        self.depth = entered;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.current.kind == TokenKind::Not {
            self.descend()?;
            self.advance()?;
            let expr = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(expr)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.current.kind {
            TokenKind::OpenParen => {
                self.descend()?;
                self.advance()?;
                let expr = self.parse_or()?;
                self.expect(TokenKind::CloseParen, "')'")?;
                self.depth -= 1;
                return Ok(expr);
            }
            TokenKind::Exists => {
                self.advance()?;
                self.expect(TokenKind::OpenParen, "'(' after exists")?;
                let name = match &self.current.kind {
                    TokenKind::Ident(name) => name.clone(),
                    _ => return Err(self.error("expected attribute name")),
                };
                self.advance()?;
                self.expect(TokenKind::CloseParen, "')'")?;
                return Ok(Expr::Exists(name));
            }
            _ => {}
        }

        let lhs = self.parse_operand()?;

        match self.current.kind {
            TokenKind::Cmp(op) => {
                self.advance()?;
                let rhs = self.parse_operand()?;
                Ok(Expr::Compare { lhs, op, rhs })
            }
            TokenKind::In => {
                self.advance()?;
                let values = self.parse_list()?;
                Ok(Expr::In {
                    operand: lhs,
                    values,
                })
            }
            _ => Ok(Expr::Truthy(lhs)),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<AttributeValue>, ParseError> {
        self.expect(TokenKind::OpenBracket, "'[' after in")?;

        let mut values = Vec::new();
        loop {
            if matches!(self.current.kind, TokenKind::Ident(_)) {
                return Err(self.error("list elements must be literals"));
            }
            if let Operand::Literal(value) = self.parse_operand()? {
                values.push(value);
            }

            match self.current.kind {
                TokenKind::Comma => self.advance()?,
                TokenKind::CloseBracket => {
                    self.advance()?;
                    return Ok(values);
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        let operand = match &self.current.kind {
            TokenKind::Ident(name) => Operand::Attribute(name.clone()),
            TokenKind::Str(s) => Operand::Literal(AttributeValue::String(s.clone())),
            TokenKind::Number(n) => Operand::Literal(AttributeValue::Number(*n)),
            TokenKind::True => Operand::Literal(AttributeValue::Bool(true)),
            TokenKind::False => Operand::Literal(AttributeValue::Bool(false)),
            TokenKind::Absent => Operand::Literal(AttributeValue::Absent),
            _ => return Err(self.error("expected attribute or literal")),
        };
        self.advance()?;
        Ok(operand)
    }
}

/// Parse a predicate expression
pub fn parse(input: &str) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(input)?;
    parser.parse_predicate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str) -> Operand {
        Operand::Attribute(name.to_string())
    }

    #[test]
    fn test_parse_simple_comparison() {
        let ast = parse(r#"region == "us-east""#).unwrap();
        assert_eq!(
            ast.condition,
            Expr::Compare {
                lhs: attr("region"),
                op: CmpOp::Eq,
                rhs: Operand::Literal(AttributeValue::from("us-east")),
            }
        );
        assert!(ast.score.is_none());
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let ast = parse("a or b and c").unwrap();
        match ast.condition {
            Expr::Or(left, right) => {
                assert_eq!(*left, Expr::Truthy(attr("a")));
                assert!(matches!(*right, Expr::And(_, _)));
            }
            other => panic!("expected OR at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_symbolic_and_keyword_operators_agree() {
        let symbolic = parse("!(a == 1 && b != 2) || c").unwrap();
        let keyword = parse("not (a == 1 and b != 2) or c").unwrap();
        assert_eq!(symbolic, keyword);
    }

    #[test]
    fn test_parse_in_list_and_score() {
        let ast = parse(r#"tier in ["gold", 'silver', 3] score priority"#).unwrap();
        assert_eq!(
            ast.condition,
            Expr::In {
                operand: attr("tier"),
                values: vec![
                    AttributeValue::from("gold"),
                    AttributeValue::from("silver"),
                    AttributeValue::Number(3.0),
                ],
            }
        );
        assert_eq!(ast.score, Some(attr("priority")));
    }

    #[test]
    fn test_parse_exists_and_absent() {
        let ast = parse("!exists(spot) and zone == absent").unwrap();
        match ast.condition {
            Expr::And(left, right) => {
                assert_eq!(*left, Expr::Not(Box::new(Expr::Exists("spot".to_string()))));
                assert_eq!(
                    *right,
                    Expr::Compare {
                        lhs: attr("zone"),
                        op: CmpOp::Eq,
                        rhs: Operand::Literal(AttributeValue::Absent),
                    }
                );
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_label_style_identifiers() {
        let ast = parse("app.kubernetes.io/tier == \"web\" and cpu >= -1.5").unwrap();
        match ast.condition {
            Expr::And(left, right) => {
                assert!(matches!(*left, Expr::Compare { lhs: Operand::Attribute(ref n), .. } if n == "app.kubernetes.io/tier"));
                assert!(matches!(
                    *right,
                    Expr::Compare { rhs: Operand::Literal(AttributeValue::Number(n)), op: CmpOp::Ge, .. } if n == -1.5
                ));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_errors_name_offending_fragment() {
        let err = parse("region = \"us-east\"").unwrap_err();
        assert_eq!(err.fragment, "=");

        let err = parse("region == ").unwrap_err();
        assert_eq!(err.fragment, END_OF_INPUT);

        let err = parse("(a == 1").unwrap_err();
        assert_eq!(err.reason, "expected ')'");

        let err = parse("a == 1 b").unwrap_err();
        assert_eq!(err.fragment, "b");

        let err = parse("name == \"open").unwrap_err();
        assert_eq!(err.reason, "unterminated string literal");

        let err = parse("   ").unwrap_err();
        assert_eq!(err.reason, "empty expression");

        let err = parse("x in [a]").unwrap_err();
        assert_eq!(err.fragment, "a");
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}a{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = parse(&parens).unwrap_err();
        assert_eq!(err.reason, "expression nested too deeply");

        let err = parse(&format!("{}a", "!".repeat(100_000))).unwrap_err();
        assert_eq!(err.reason, "expression nested too deeply");

        let chain = vec!["a"; 100_000].join(" || ");
        let err = parse(&chain).unwrap_err();
        assert_eq!(err.reason, "expression nested too deeply");
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let nested = format!("{}a == 1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse(&nested).is_ok());

        let chain = vec!["a"; 100].join(" && ");
        assert!(parse(&chain).is_ok());
    }
}

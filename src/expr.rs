//! Rule expression syntax.
//!
//! ```text
//! expr    := or
//! or      := and (("||" | OR) and)*
//! and     := unary (("&&" | AND) unary)*
//! unary   := ("!" | NOT) unary | primary
//! primary := "(" expr ")" | NAME "(" [string ("," string)*] ")"
//! ```
//!
//! Strings are delimited by backticks, double or single quotes. Keywords and
//! function names are case-insensitive. Negation is pushed down to the
//! terminals while parsing, so a parsed [`Expr`] has no `NOT` node.
//!
//! Parentheses may nest at most [`MAX_DEPTH`] levels and the parsed tree may
//! be at most [`MAX_DEPTH`] operators deep. Longer chains are rejected with
//! [`ParseError::TooDeep`].

use crate::matcher::MatcherKind;
use std::iter::Peekable;
use std::str::CharIndices;

/// Deepest nesting accepted by [`Expr::parse`].
pub const MAX_DEPTH: usize = 256;

/// Error raised while parsing a rule expression.
///
/// Offsets are byte positions in the expression string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The expression is empty or only whitespace.
    #[error("empty expression")]
    Empty,
    /// A character that starts no token.
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar {
        /// The character.
        ch: char,
        /// Where it was found.
        offset: usize,
    },
    /// A string literal without its closing quote.
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    /// A token that is not valid at this position.
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken {
        /// Description of the token.
        found: String,
        /// Where it was found.
        offset: usize,
    },
    /// The expression ended too early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// A function name that no matcher is registered under.
    #[error("unknown matcher function {name:?} at offset {offset}")]
    UnknownFunction {
        /// The name as written.
        name: String,
        /// Where it was found.
        offset: usize,
    },
    /// A function name not followed by an argument list.
    #[error("expected '(' after {name:?} at offset {offset}")]
    ExpectedCall {
        /// The name as written.
        name: String,
        /// Where the name was found.
        offset: usize,
    },
    /// Parentheses or operators nested deeper than [`MAX_DEPTH`].
    #[error("expression nested deeper than {max} levels at offset {offset}", max = MAX_DEPTH)]
    TooDeep {
        /// Where the limit was exceeded.
        offset: usize,
    },
}

/// A call of one matcher function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    /// The matcher function.
    pub function: MatcherKind,
    /// Arguments in call order.
    pub args: Vec<String>,
    /// Whether the result is inverted.
    pub negated: bool,
}

/// A parsed rule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A matcher function call.
    Terminal(Terminal),
    /// Both sides must match.
    And(Box<Expr>, Box<Expr>),
    /// Either side must match.
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse a rule expression.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::{Expr, MatcherKind};
    ///
    /// let expr = Expr::parse("!(Method(`GET`) && Path(`/a`))").unwrap();
    /// match expr {
    ///     Expr::Or(left, _) => match *left {
    ///         Expr::Terminal(t) => {
    ///             assert_eq!(t.function, MatcherKind::Method);
    ///             assert!(t.negated);
    ///         }
    ///         _ => unreachable!(),
    ///     },
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }
        Parser {
            tokens,
            pos: 0,
            nesting: 0,
        }
        .parse()
    }

    /// Build a terminal.
    pub fn terminal(function: MatcherKind, args: Vec<String>) -> Self {
        Expr::Terminal(Terminal {
            function,
            args,
            negated: false,
        })
    }

    /// Conjunction of two expressions.
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    /// Disjunction of two expressions.
    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// Logical negation, pushed down to the terminals.
    ///
    /// `!(a && b)` becomes `!a || !b` and `!(a || b)` becomes `!a && !b`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Expr::Terminal(mut terminal) => {
                terminal.negated = !terminal.negated;
                Expr::Terminal(terminal)
            }
            Expr::And(left, right) => Expr::or(left.not(), right.not()),
            Expr::Or(left, right) => Expr::and(left.not(), right.not()),
        }
    }

    /// Iterate over the terminals, left to right.
    pub fn terminals(&self) -> Vec<&Terminal> {
        let mut out = Vec::new();
        self.collect_terminals(&mut out);
        out
    }

    fn collect_terminals<'a>(&'a self, out: &mut Vec<&'a Terminal>) {
        match self {
            Expr::Terminal(terminal) => out.push(terminal),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_terminals(out);
                right.collect_terminals(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier {name:?}"),
            Token::Str(value) => format!("string {value:?}"),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Not => "NOT".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '!' => {
                chars.next();
                Token::Not
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(ParseError::UnexpectedChar { ch: c, offset });
                }
                if c == '&' {
                    Token::And
                } else {
                    Token::Or
                }
            }
            '`' | '"' | '\'' => read_string(&mut chars, offset)?,
            c if c.is_ascii_alphabetic() || c == '_' => read_word(&mut chars),
            _ => return Err(ParseError::UnexpectedChar { ch: c, offset }),
        };
        tokens.push((token, offset));
    }

    Ok(tokens)
}

fn read_string(chars: &mut Peekable<CharIndices<'_>>, start: usize) -> Result<Token, ParseError> {
    let Some((_, quote)) = chars.next() else {
        return Err(ParseError::UnexpectedEnd);
    };
    let mut value = String::new();

    loop {
        match chars.next() {
            Some((_, c)) if c == quote => return Ok(Token::Str(value)),
            // Backticks are raw, so regular expressions need no double escaping
            Some((_, '\\')) if quote != '`' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ParseError::UnterminatedString(start)),
            },
            Some((_, c)) => value.push(c),
            None => return Err(ParseError::UnterminatedString(start)),
        }
    }
}

fn read_word(chars: &mut Peekable<CharIndices<'_>>) -> Token {
    let mut word = String::new();
    while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_ascii_alphanumeric() || c == '_') {
        word.push(c);
    }

    if word.eq_ignore_ascii_case("and") {
        Token::And
    } else if word.eq_ignore_ascii_case("or") {
        Token::Or
    } else if word.eq_ignore_ascii_case("not") {
        Token::Not
    } else {
        Token::Ident(word)
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    // Open parentheses around the current position
    nesting: usize,
}

/// An expression with the depth of its tree.
type Parsed = (Expr, usize);

fn combine(
    left: Parsed,
    right: Parsed,
    offset: usize,
    op: fn(Expr, Expr) -> Expr,
) -> Result<Parsed, ParseError> {
    let depth = left.1.max(right.1) + 1;
    if depth > MAX_DEPTH {
        return Err(ParseError::TooDeep { offset });
    }
    Ok((op(left.0, right.0), depth))
}

impl Parser {
    fn parse(mut self) -> Result<Expr, ParseError> {
        let (expr, _) = self.parse_or()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some((token, offset)) => Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset: *offset,
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Result<(Token, usize), ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let (token, offset) = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset,
            })
        }
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |(_, offset)| *offset)
    }

    fn parse_or(&mut self) -> Result<Parsed, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            let offset = self.offset();
            self.pos += 1;
            let right = self.parse_and()?;
            left = combine(left, right, offset, Expr::or)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Parsed, ParseError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            let offset = self.offset();
            self.pos += 1;
            let right = self.parse_unary()?;
            left = combine(left, right, offset, Expr::and)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Parsed, ParseError> {
        // A run of NOTs collapses to its parity
        let mut negated = false;
        while self.peek() == Some(&Token::Not) {
            self.pos += 1;
            negated = !negated;
        }

        let (expr, depth) = self.parse_primary()?;
        Ok((if negated { expr.not() } else { expr }, depth))
    }

    fn parse_primary(&mut self) -> Result<Parsed, ParseError> {
        match self.next()? {
            (Token::LParen, offset) => {
                if self.nesting == MAX_DEPTH {
                    return Err(ParseError::TooDeep { offset });
                }
                self.nesting += 1;
                let parsed = self.parse_or()?;
                self.nesting -= 1;
                self.expect(Token::RParen)?;
                Ok(parsed)
            }
            (Token::Ident(name), offset) => self.parse_call(name, offset),
            (token, offset) => Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset,
            }),
        }
    }

    fn parse_call(&mut self, name: String, offset: usize) -> Result<Parsed, ParseError> {
        let Some(function) = MatcherKind::lookup(&name) else {
            return Err(ParseError::UnknownFunction { name, offset });
        };

        if self.peek() != Some(&Token::LParen) {
            return Err(ParseError::ExpectedCall { name, offset });
        }
        self.pos += 1;

        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok((Expr::terminal(function, args), 1));
        }

        loop {
            match self.next()? {
                (Token::Str(value), _) => args.push(value),
                (token, offset) => {
                    return Err(ParseError::UnexpectedToken {
                        found: token.describe(),
                        offset,
                    })
                }
            }

            match self.next()? {
                (Token::Comma, _) => continue,
                (Token::RParen, _) => break,
                (token, offset) => {
                    return Err(ParseError::UnexpectedToken {
                        found: token.describe(),
                        offset,
                    })
                }
            }
        }

        Ok((Expr::terminal(function, args), 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(function: MatcherKind, arg: &str, negated: bool) -> Expr {
        Expr::Terminal(Terminal {
            function,
            args: vec![arg.to_string()],
            negated,
        })
    }

    #[test]
    fn test_parse_single_call() {
        let expr = Expr::parse("PathPrefix(`/admin`, \"/ops\")").unwrap();
        assert_eq!(
            expr,
            Expr::terminal(
                MatcherKind::PathPrefix,
                vec!["/admin".to_string(), "/ops".to_string()]
            )
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = Expr::parse("Path(`/a`) || Path(`/b`) && Method(`GET`)").unwrap();
        assert_eq!(
            expr,
            Expr::or(
                term(MatcherKind::Path, "/a", false),
                Expr::and(
                    term(MatcherKind::Path, "/b", false),
                    term(MatcherKind::Method, "GET", false)
                )
            )
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let expr = Expr::parse("(Path(`/a`) OR Path(`/b`)) AND Method(`GET`)").unwrap();
        assert_eq!(
            expr,
            Expr::and(
                Expr::or(
                    term(MatcherKind::Path, "/a", false),
                    term(MatcherKind::Path, "/b", false)
                ),
                term(MatcherKind::Method, "GET", false)
            )
        );
    }

    #[test]
    fn test_keywords_and_names_ignore_case() {
        let symbols = Expr::parse("!host(`a`) && PATH(`/b`) || Method(`GET`)").unwrap();
        let words = Expr::parse("not Host('a') AND path(\"/b\") or METHOD(`GET`)").unwrap();
        assert_eq!(symbols, words);
    }

    #[test]
    fn test_not_pushed_to_terminals() {
        let expr = Expr::parse("!(Path(`/a`) && (Host(`h`) || !Method(`GET`)))").unwrap();
        assert_eq!(
            expr,
            Expr::or(
                term(MatcherKind::Path, "/a", true),
                Expr::and(
                    term(MatcherKind::Host, "h", true),
                    term(MatcherKind::Method, "GET", false)
                )
            )
        );
        assert_eq!(expr.terminals().len(), 3);
    }

    #[test]
    fn test_double_negation() {
        let expr = Expr::parse("!!Path(`/a`)").unwrap();
        assert_eq!(expr, term(MatcherKind::Path, "/a", false));
    }

    #[test]
    fn test_escapes() {
        let expr = Expr::parse(r#"HeadersRegexp("X-Id", "\"q\"", `a\d+`)"#).unwrap();
        match expr {
            Expr::Terminal(t) => assert_eq!(t.args, vec!["X-Id", "\"q\"", "a\\d+"]),
            _ => panic!("Expected terminal"),
        }
    }

    #[test]
    fn test_empty_call_and_empty_string() {
        let expr = Expr::parse("Path()").unwrap();
        assert_eq!(expr, Expr::terminal(MatcherKind::Path, vec![]));

        let expr = Expr::parse("Path(``)").unwrap();
        assert_eq!(expr, term(MatcherKind::Path, "", false));
    }

    #[test]
    fn test_errors() {
        assert_eq!(Expr::parse("   "), Err(ParseError::Empty));
        assert_eq!(
            Expr::parse("Cookie(`a`)"),
            Err(ParseError::UnknownFunction {
                name: "Cookie".to_string(),
                offset: 0
            })
        );
        assert_eq!(
            Expr::parse("Path(`/a`) & Host(`b`)"),
            Err(ParseError::UnexpectedChar { ch: '&', offset: 11 })
        );
        assert_eq!(
            Expr::parse("Path(`/a"),
            Err(ParseError::UnterminatedString(5))
        );
        assert_eq!(Expr::parse("(Path(`/a`)"), Err(ParseError::UnexpectedEnd));
        assert_eq!(Expr::parse("Path(`/a`) &&"), Err(ParseError::UnexpectedEnd));
        assert_eq!(
            Expr::parse("Host Path(`/a`)"),
            Err(ParseError::ExpectedCall {
                name: "Host".to_string(),
                offset: 0
            })
        );
        assert!(matches!(
            Expr::parse("Path(`/a`) Path(`/b`)"),
            Err(ParseError::UnexpectedToken { offset: 11, .. })
        ));
        assert!(matches!(
            Expr::parse("Path(/a)"),
            Err(ParseError::UnexpectedChar { ch: '/', offset: 5 })
        ));
        assert!(matches!(
            Expr::parse("Path(`/a` `/b`)"),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    fn chain(terms: usize, op: &str) -> String {
        (0..terms)
            .map(|i| format!("Path(`/{i}`)"))
            .collect::<Vec<_>>()
            .join(op)
    }

    #[test]
    fn test_parenthesis_nesting_limit() {
        let nested = |depth: usize| {
            format!("{}Path(`/a`){}", "(".repeat(depth), ")".repeat(depth))
        };

        assert_eq!(
            Expr::parse(&nested(MAX_DEPTH)).unwrap(),
            term(MatcherKind::Path, "/a", false)
        );
        assert_eq!(
            Expr::parse(&nested(MAX_DEPTH + 1)),
            Err(ParseError::TooDeep { offset: MAX_DEPTH })
        );
        assert_eq!(
            Expr::parse(&nested(100_000)),
            Err(ParseError::TooDeep { offset: MAX_DEPTH })
        );
    }

    #[test]
    fn test_long_not_runs_collapse() {
        let odd = format!("{}Path(`/a`)", "!".repeat(200_001));
        let even = format!("{}Path(`/a`)", "NOT ".repeat(200_000));

        assert_eq!(Expr::parse(&odd).unwrap(), term(MatcherKind::Path, "/a", true));
        assert_eq!(Expr::parse(&even).unwrap(), term(MatcherKind::Path, "/a", false));
    }

    #[test]
    fn test_operator_chain_limit() {
        let longest = Expr::parse(&format!("!({})", chain(MAX_DEPTH, " && "))).unwrap();
        assert_eq!(longest.terminals().len(), MAX_DEPTH);
        assert!(longest.terminals().iter().all(|t| t.negated));

        assert!(matches!(
            Expr::parse(&chain(MAX_DEPTH + 1, " || ")),
            Err(ParseError::TooDeep { .. })
        ));
        assert!(matches!(
            Expr::parse(&chain(100_000, " && ")),
            Err(ParseError::TooDeep { .. })
        ));
    }
}

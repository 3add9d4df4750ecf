// liberty boolean functions; binding from loosest: `| +`, `^`, `& *`, then
// prefix `!` and postfix `'`
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected ')'")]
    Unbalanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Const(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Const(bool),
    LParen,
    RParen,
    Not,
    Postfix,
    And,
    Or,
    Xor,
}

fn tokenize(s: &str) -> Result<Vec<Tok>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        let tok = match c {
            ' ' | '\t' | '\r' | '\n' | '"' => {
                chars.next();
                continue;
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c2) = chars.peek() {
                    if c2.is_ascii_alphanumeric() || matches!(c2, '_' | '[' | ']' | '.') {
                        ident.push(c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Ident(ident));
                continue;
            }
            '0' => Tok::Const(false),
            '1' => Tok::Const(true),
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '!' => Tok::Not,
            '\'' => Tok::Postfix,
            '&' | '*' => Tok::And,
            '|' | '+' => Tok::Or,
            '^' => Tok::Xor,
            _ => return Err(ParseError::UnexpectedChar(c)),
        };
        chars.next();
        tokens.push(tok);
    }
    Ok(tokens)
}

fn parse_or(tokens: &[Tok]) -> Result<(Expr, &[Tok]), ParseError> {
    let (mut lhs, mut rest) = parse_xor(tokens)?;
    while let Some(Tok::Or) = rest.first() {
        let (rhs, rest2) = parse_xor(&rest[1..])?;
        lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        rest = rest2;
    }
    Ok((lhs, rest))
}

fn parse_xor(tokens: &[Tok]) -> Result<(Expr, &[Tok]), ParseError> {
    let (mut lhs, mut rest) = parse_and(tokens)?;
    while let Some(Tok::Xor) = rest.first() {
        let (rhs, rest2) = parse_and(&rest[1..])?;
        lhs = Expr::Xor(Box::new(lhs), Box::new(rhs));
        rest = rest2;
    }
    Ok((lhs, rest))
}

fn parse_and(tokens: &[Tok]) -> Result<(Expr, &[Tok]), ParseError> {
    let (mut lhs, mut rest) = parse_not(tokens)?;
    while let Some(Tok::And) = rest.first() {
        let (rhs, rest2) = parse_not(&rest[1..])?;
        lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        rest = rest2;
    }
    Ok((lhs, rest))
}

fn parse_not(tokens: &[Tok]) -> Result<(Expr, &[Tok]), ParseError> {
    if let Some(Tok::Not) = tokens.first() {
        let (expr, rest) = parse_not(&tokens[1..])?;
        Ok((Expr::Not(Box::new(expr)), rest))
    } else {
        let (mut expr, mut rest) = parse_atom(tokens)?;
        while let Some(Tok::Postfix) = rest.first() {
            expr = Expr::Not(Box::new(expr));
            rest = &rest[1..];
        }
        Ok((expr, rest))
    }
}

fn parse_atom(tokens: &[Tok]) -> Result<(Expr, &[Tok]), ParseError> {
    match tokens.first() {
        Some(Tok::Ident(s)) => Ok((Expr::Var(s.clone()), &tokens[1..])),
        Some(Tok::Const(b)) => Ok((Expr::Const(*b), &tokens[1..])),
        Some(Tok::LParen) => {
            let (expr, rest) = parse_or(&tokens[1..])?;
            match rest.first() {
                Some(Tok::RParen) => Ok((expr, &rest[1..])),
                _ => Err(ParseError::Unbalanced),
            }
        }
        Some(tok) => Err(ParseError::UnexpectedToken(format!("{:?}", tok))),
        None => Err(ParseError::UnexpectedEnd),
    }
}

impl Expr {
    pub fn parse(text: &str) -> Result<Expr, ParseError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }
        let (expr, rest) = parse_or(&tokens)?;
        if let Some(tok) = rest.first() {
            return Err(ParseError::UnexpectedToken(format!("{:?}", tok)));
        }
        Ok(expr)
    }

    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Expr::Var(name) => {
                vars.insert(name.clone());
            }
            Expr::Const(_) => {}
            Expr::Not(inner) => inner.collect_variables(vars),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Xor(a, b) => {
                a.collect_variables(vars);
                b.collect_variables(vars);
            }
        }
    }

    /// Evaluates the expression. Every free variable must be assigned.
    pub fn eval(&self, values: &HashMap<&str, bool>) -> bool {
        match self {
            Expr::Var(name) => match values.get(name.as_str()) {
                Some(&value) => value,
                None => panic!("variable {name} has no assigned value"),
            },
            Expr::Const(value) => *value,
            Expr::Not(inner) => !inner.eval(values),
            Expr::And(a, b) => a.eval(values) & b.eval(values),
            Expr::Or(a, b) => a.eval(values) | b.eval(values),
            Expr::Xor(a, b) => a.eval(values) ^ b.eval(values),
        }
    }
}

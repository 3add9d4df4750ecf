// liberty library reader
use regex::Regex;
use std::collections::HashMap;
use std::iter::Peekable;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LibertyError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error at {line}:{col}: {message}")]
    Syntax {
        line: usize,
        col: usize,
        message: String,
    },
    #[error("bad library: {0}")]
    Structure(String),
}

struct Scanner<I>
where
    I: Iterator<Item = char>,
{
    iter: Peekable<I>,
    staging: String,
    lineno: usize,
    colno: usize,
    keyword_re: Regex,
    inject: Option<Token>,
}

#[derive(Debug, PartialEq)]
enum Token {
    Punctuation(char),
    Id(String),
    String(String),
    EOF,
}

impl<I: Iterator<Item = char>> Scanner<I> {
    fn wrap(iter: I) -> Self {
        Self {
            iter: iter.peekable(),
            staging: String::new(),
            lineno: 1,
            colno: 1,
            keyword_re: Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap(),
            inject: None,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.iter.peek().copied()
    }

    fn error(&self, arg: &str) -> LibertyError {
        LibertyError::Syntax {
            line: self.lineno,
            col: self.colno,
            message: arg.to_owned(),
        }
    }

    fn error_eof(&self) -> LibertyError {
        self.error("unexpected EOF")
    }

    fn next_char(&mut self) -> Option<char> {
        let ret = self.iter.next();
        if let Some(ch) = ret {
            self.staging.push(ch);
            match ch {
                '\n' => {
                    self.lineno += 1;
                    self.colno = 1;
                }
                _ => {
                    self.colno += 1;
                }
            }
        }
        ret
    }

    fn expect_char(&mut self, expect: char) -> Result<(), LibertyError> {
        let Some(found) = self.next_char() else {
            return Err(self.error_eof());
        };
        if found != expect {
            return Err(self.error(&format!("expected character {expect}; found {found}")));
        }
        Ok(())
    }

    fn flush(&mut self) -> String {
        std::mem::take(&mut self.staging)
    }

    fn push_back(&mut self, tok: Token) {
        assert!(self.inject.is_none());
        self.inject = Some(tok);
    }

    fn next(&mut self) -> Result<Token, LibertyError> {
        if let Some(tok) = self.inject.take() {
            return Ok(tok);
        };
        'outer: loop {
            self.flush();
            let Some(ch) = self.next_char() else {
                return Ok(Token::EOF);
            };
            match ch {
                '/' => {
                    self.expect_char('*')?;
                    while let Some(ch) = self.next_char() {
                        if ch == '*' && self.peek_char() == Some('/') {
                            self.next_char();
                            continue 'outer;
                        }
                    }
                    return Err(self.error_eof());
                }
                ' ' | '\r' | '\n' | '\t' => {}
                '\\' if matches!(self.peek_char(), Some('\r') | Some('\n')) => {}
                '"' => {
                    let mut content = String::new();
                    while let Some(ch) = self.next_char() {
                        match ch {
                            '\\' => {
                                let Some(ch) = self.next_char() else {
                                    return Err(self.error_eof());
                                };
                                match ch {
                                    '\r' | '\n' => {
                                        if ch == '\r' && self.peek_char() == Some('\n') {
                                            self.next_char();
                                        }
                                    }
                                    _ => {
                                        content.push(ch);
                                    }
                                }
                            }
                            '"' => return Ok(Token::String(content)),
                            '\n' => return Err(self.error("unterminated string")),
                            ch => content.push(ch),
                        }
                    }
                    return Err(self.error_eof());
                }
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => {
                    while let Some(ch) = self.peek_char() {
                        if matches!(
                            ch,
                            ',' | ':'
                                | ';'
                                | '|'
                                | '('
                                | ')'
                                | '{'
                                | '}'
                                | '*'
                                | '&'
                                | '\''
                                | '='
                                | '"'
                                | ' '
                                | '\t'
                                | '\r'
                                | '\n'
                        ) {
                            break;
                        }
                        self.next_char();
                    }
                    let text = self.flush();
                    if self.keyword_re.is_match(&text) {
                        return Ok(Token::Id(text));
                    } else {
                        return Ok(Token::String(text));
                    }
                }
                ',' | ':' | ';' | '|' | '(' | ')' | '{' | '}' | '*' | '&' | '\'' | '=' => {
                    return Ok(Token::Punctuation(ch))
                }
                _ => {
                    return Err(self.error(&format!("unexpected character '{ch}'")));
                }
            }
        }
    }

    fn consume(&mut self, expected: Token) -> Result<bool, LibertyError> {
        let read = self.next()?;
        if read == expected {
            Ok(true)
        } else {
            self.push_back(read);
            Ok(false)
        }
    }
}

type AttrValue = String;

#[derive(Debug, Clone)]
pub enum Statement {
    SimpleAttr(String, AttrValue),
    ComplexAttr(String, Vec<AttrValue>),
    Group(String, Vec<AttrValue>, Vec<Statement>),
    Variable(String, f64),
}

impl Statement {
    fn key(&self) -> &str {
        match self {
            Statement::SimpleAttr(key, _) => key,
            Statement::ComplexAttr(key, _) => key,
            Statement::Group(key, _, _) => key,
            Statement::Variable(key, _) => key,
        }
    }

    // stable, so same-keyed statements (pins) keep their declaration order
    fn sort(&mut self) {
        if let Statement::Group(_, _, stmts) = self {
            for stmt in &mut *stmts {
                stmt.sort();
            }
            stmts.sort_by(|a, b| a.key().cmp(b.key()));
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Statement> {
        match self.lookup_all(key) {
            [el, ..] => Some(el),
            [] => None,
        }
    }

    pub fn lookup_all(&self, key: &str) -> &[Statement] {
        match self {
            Statement::Group(_, _, ref stmts) => {
                let i = stmts.partition_point(|a| a.key() < key);
                let j = stmts.partition_point(|a| a.key() <= key);
                &stmts[i..j]
            }
            _ => &[],
        }
    }

    pub fn find_attribute(&self, key: &str) -> Option<&str> {
        match self.lookup(key) {
            Some(Statement::SimpleAttr(_, ref s)) => Some(s),
            _ => None,
        }
    }

    pub fn args(&self) -> &[AttrValue] {
        match self {
            Statement::Group(_, args, _) | Statement::ComplexAttr(_, args) => args,
            _ => &[],
        }
    }
}

fn skip_semicolon<I>(scanner: &mut Scanner<I>) -> Result<(), LibertyError>
where
    I: Iterator<Item = char>,
{
    scanner.consume(Token::Punctuation(';'))?;
    Ok(())
}

fn parse_attr_value<I>(scanner: &mut Scanner<I>) -> Result<AttrValue, LibertyError>
where
    I: Iterator<Item = char>,
{
    match scanner.next()? {
        Token::Id(text) | Token::String(text) => Ok(text),
        t => Err(scanner.error(&format!("bad attr value {:?}", t))),
    }
}

fn parse_statement<I>(scanner: &mut Scanner<I>) -> Result<Statement, LibertyError>
where
    I: Iterator<Item = char>,
{
    let Token::Id(label) = scanner.next()? else {
        return Err(scanner.error("expected identifier"));
    };

    match scanner.next()? {
        Token::Punctuation(':') => {
            let value = parse_attr_value(scanner)?;
            skip_semicolon(scanner)?;
            return Ok(Statement::SimpleAttr(label, value));
        }
        Token::Punctuation('=') => {
            let text = parse_attr_value(scanner)?;
            let Ok(value) = text.parse::<f64>() else {
                return Err(scanner.error("expected floating-point number"));
            };
            skip_semicolon(scanner)?;
            return Ok(Statement::Variable(label, value));
        }
        Token::Punctuation('(') => {
            // fall through
        }
        t => {
            return Err(scanner.error(&format!("unexpected token {:?}", t)));
        }
    }

    let mut expecting_value = false;
    let mut attrs: Vec<AttrValue> = Vec::new();
    loop {
        match scanner.next()? {
            Token::EOF => {
                return Err(scanner.error_eof());
            }
            Token::Punctuation(',') if !expecting_value => {
                expecting_value = true;
                continue;
            }
            Token::Punctuation(')') => break,
            t @ (Token::String(_) | Token::Id(_)) => {
                scanner.push_back(t);
                attrs.push(parse_attr_value(scanner)?);
            }
            t => {
                return Err(scanner.error(&format!("unexpected token {:?}", t)));
            }
        }
        expecting_value = false;
    }

    if scanner.consume(Token::Punctuation('{'))? {
        let mut statements: Vec<Statement> = Vec::new();
        while !scanner.consume(Token::Punctuation('}'))? {
            statements.push(parse_statement(scanner)?);
        }
        skip_semicolon(scanner)?;
        Ok(Statement::Group(label, attrs, statements))
    } else {
        skip_semicolon(scanner)?;
        Ok(Statement::ComplexAttr(label, attrs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
    Inout,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryPin {
    pub name: String,
    pub direction: Option<PinDirection>,
    pub function: Option<String>,
}

/// The `ff(IQ, IQN) { ... }` block of a sequential cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FlopBlock {
    /// Internal state variable, the first argument of the block.
    pub state: String,
    /// Inverted internal state variable, the second argument.
    pub state_negated: String,
    pub clocked_on: Option<String>,
    pub next_state: Option<String>,
    pub clear: Option<String>,
    pub preset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LibraryCell {
    pub name: String,
    pub pins: Vec<LibraryPin>,
    pub ff: Option<FlopBlock>,
    pub dont_use: bool,
    pub area: f64,
}

impl LibraryCell {
    pub fn pin(&self, name: &str) -> Option<&LibraryPin> {
        self.pins.iter().find(|pin| pin.name == name)
    }

    pub fn has_pin(&self, name: &str) -> bool {
        self.pin(name).is_some()
    }

    fn from_statement(name: &str, statement: &Statement) -> LibraryCell {
        let mut pins = Vec::new();
        for pin_stmt in statement.lookup_all("pin") {
            let [pin_name] = pin_stmt.args() else {
                log::debug!("skipping multi-name pin group in cell '{name}'");
                continue;
            };
            let direction = match pin_stmt.find_attribute("direction") {
                Some("input") => Some(PinDirection::Input),
                Some("output") => Some(PinDirection::Output),
                Some("inout") => Some(PinDirection::Inout),
                Some("internal") => Some(PinDirection::Internal),
                Some(d) => {
                    log::warn!("unknown direction '{d}' on pin '{pin_name}' of cell '{name}'");
                    None
                }
                None => None,
            };
            pins.push(LibraryPin {
                name: pin_name.clone(),
                direction,
                function: pin_stmt.find_attribute("function").map(str::to_owned),
            });
        }

        let ff = match statement.lookup("ff") {
            Some(ff_ast @ Statement::Group(_, ff_args, _)) => match &ff_args[..] {
                [state, state_negated] => Some(FlopBlock {
                    state: state.clone(),
                    state_negated: state_negated.clone(),
                    clocked_on: ff_ast.find_attribute("clocked_on").map(str::to_owned),
                    next_state: ff_ast.find_attribute("next_state").map(str::to_owned),
                    clear: ff_ast.find_attribute("clear").map(str::to_owned),
                    preset: ff_ast.find_attribute("preset").map(str::to_owned),
                }),
                _ => {
                    log::debug!("ff block of cell '{name}' does not name two state variables");
                    None
                }
            },
            _ => None,
        };

        LibraryCell {
            name: name.to_owned(),
            pins,
            ff,
            dont_use: statement.find_attribute("dont_use") == Some("true"),
            area: statement
                .find_attribute("area")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
        }
    }
}

/// Cells of one or more liberty files, in order of appearance.
#[derive(Debug, Default)]
pub struct Library {
    pub cells: Vec<LibraryCell>,
    index: HashMap<String, usize>,
}

impl Library {
    pub fn new() -> Self {
        Library::default()
    }

    pub fn cell(&self, name: &str) -> Option<&LibraryCell> {
        self.index.get(name).map(|&idx| &self.cells[idx])
    }

    pub fn read_file(&mut self, path: &Path) -> Result<(), LibertyError> {
        let text = std::fs::read_to_string(path).map_err(|source| LibertyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.read_liberty(&text)
    }

    pub fn read_liberty(&mut self, text: &str) -> Result<(), LibertyError> {
        let mut top_group = {
            let mut scanner = Scanner::wrap(text.chars());
            parse_statement(&mut scanner)?
        };
        top_group.sort();

        let Statement::Group(ref text, ref attrs, ref top_statements) = top_group else {
            return Err(LibertyError::Structure("top statement is not a group".into()));
        };
        if text != "library" {
            return Err(LibertyError::Structure(format!(
                "top group is '{text}', expected 'library'"
            )));
        };
        let [ref lib_name] = attrs[..] else {
            return Err(LibertyError::Structure("library group needs one name".into()));
        };
        log::info!("reading library {}", lib_name);
        for statement in top_statements {
            let Statement::Group(ref kind, ref attrs, _) = statement else {
                continue;
            };
            if kind != "cell" {
                continue;
            }
            let [ref name] = attrs[..] else {
                return Err(LibertyError::Structure(format!(
                    "cell group with {} names in library {lib_name}",
                    attrs.len()
                )));
            };
            let cell = LibraryCell::from_statement(name, statement);
            match self.index.get(name) {
                Some(&idx) => {
                    log::warn!("cell '{name}' redefined by library {lib_name}");
                    self.cells[idx] = cell;
                }
                None => {
                    self.index.insert(name.clone(), self.cells.len());
                    self.cells.push(cell);
                }
            }
        }
        Ok(())
    }
}

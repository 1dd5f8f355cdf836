//! Parser for the narrow DML subset the mining view captures.
//!
//! The log source reconstructs SQL with a very simple syntax: single-table
//! INSERT / UPDATE / DELETE, optional table alias, WHERE clauses that are
//! conjunctions of `col = literal` and `col IS NULL`. Anything outside that
//! shape (joins, sub-selects, multi-table statements) is rejected with
//! [`Error::Unsupported`] and the caller drops the single offending row.
//!
//! Parsing is a pure function of the statement text and the table schema:
//! no state leaks between calls.

use crate::error::{Error, Result};
use crate::delta::{ColumnValue, RowChangeDelta};
use crate::schema::{coerce, ColumnType, TableSchema};
use crate::types::{Operation, Value};

/// Parse one captured DML statement against the table's schema, producing the
/// ordered before/after column images.
pub fn parse(sql: &str, schema: &TableSchema) -> Result<RowChangeDelta> {
    let mut text = sql.trim();

    // The source occasionally appends ";null;" to reconstructed statements
    // (seen on CTAS-created tables). Strip it before parsing.
    if let Some(stripped) = text.strip_suffix(";null;") {
        text = stripped.trim_end();
    }
    text = text.trim_end_matches(';').trim_end();

    let tokens = lex(text)?;
    let mut cursor = Cursor::new(tokens);

    match cursor.next_ident()?.as_str() {
        "INSERT" => parse_insert(&mut cursor, schema),
        "UPDATE" => parse_update(&mut cursor, schema),
        "DELETE" => parse_delete(&mut cursor, schema),
        other => Err(Error::Unsupported(format!("{other} statement"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Identifier or keyword, quote-stripped and uppercased.
    Ident(String),
    /// String literal with enclosing apostrophes removed and '' unescaped.
    Str(String),
    /// Numeric literal, kept as text until coercion.
    Num(String),
    Punct(char),
}

fn lex(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        s.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                    None => return Err(Error::Syntax("unterminated string literal".into())),
                }
            }
            tokens.push(Token::Str(s));
        } else if c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        s.push(ch.to_ascii_uppercase());
                        i += 1;
                    }
                    None => return Err(Error::Syntax("unterminated quoted identifier".into())),
                }
            }
            tokens.push(Token::Ident(s));
        } else if c.is_ascii_digit() {
            let mut s = String::new();
            while let Some(&ch) = chars.get(i) {
                if ch.is_ascii_digit() || ch == '.' {
                    s.push(ch);
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Num(s));
        } else if c.is_alphabetic() || c == '_' {
            let mut s = String::new();
            while let Some(&ch) = chars.get(i) {
                if ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#' {
                    s.push(ch.to_ascii_uppercase());
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(s));
        } else if "(),=.-+;*<>!".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(Error::Syntax(format!("unexpected character {c:?}")));
        }
    }

    Ok(tokens)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn next_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(Error::Syntax(format!("expected identifier, got {other:?}"))),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.next() {
            Some(Token::Ident(s)) if s == kw => Ok(()),
            other => Err(Error::Syntax(format!("expected {kw}, got {other:?}"))),
        }
    }

    fn expect_punct(&mut self, p: char) -> Result<()> {
        match self.next() {
            Some(Token::Punct(c)) if c == p => Ok(()),
            other => Err(Error::Syntax(format!("expected {p:?}, got {other:?}"))),
        }
    }

    /// Consume `kw` if it is next; returns whether it was consumed.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: char) -> bool {
        if matches!(self.peek(), Some(Token::Punct(c)) if *c == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_end(&self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "trailing tokens after statement: {:?}",
                self.tokens[self.pos]
            )))
        }
    }
}

/// Per-column slot tracking whether the statement actually touched the
/// column. Unprocessed slots are omitted from the final images.
struct Holder {
    name: String,
    ty: ColumnType,
    value: Value,
    processed: bool,
}

/// Before/after image builders in schema column order.
struct Images {
    new: Vec<Holder>,
    old: Vec<Holder>,
}

impl Images {
    fn for_schema(schema: &TableSchema) -> Self {
        let make = || {
            schema
                .columns
                .iter()
                .map(|c| Holder {
                    name: c.name.clone(),
                    ty: c.ty,
                    value: Value::Null,
                    processed: false,
                })
                .collect::<Vec<_>>()
        };
        Self {
            new: make(),
            old: make(),
        }
    }

    fn set_new(&mut self, table: &str, name: &str, value: Value) -> Result<()> {
        match self.new.iter_mut().find(|h| h.name == name) {
            Some(h) => {
                h.value = value;
                h.processed = true;
                Ok(())
            }
            None => Err(Error::UnknownColumn {
                table: table.to_string(),
                column: name.to_string(),
            }),
        }
    }

    /// Predicate columns not present in the schema are skipped, not an error.
    fn set_old(&mut self, name: &str, value: Value) {
        if let Some(h) = self.old.iter_mut().find(|h| h.name == name) {
            h.value = value;
            h.processed = true;
        }
    }

    /// Carry WHERE-clause columns into the after image unless the SET list
    /// already assigned them.
    fn clone_old_to_new(&mut self) {
        for i in 0..self.old.len() {
            if self.old[i].processed && !self.new[i].processed {
                self.new[i].value = self.old[i].value.clone();
                self.new[i].processed = true;
            }
        }
    }

    fn finish(self, op: Operation, schema: &TableSchema) -> RowChangeDelta {
        let collect = |holders: Vec<Holder>| {
            holders
                .into_iter()
                .filter(|h| h.processed)
                .map(|h| ColumnValue {
                    name: h.name,
                    ty: h.ty,
                    value: h.value,
                })
                .collect::<Vec<_>>()
        };
        let (before, after) = match op {
            Operation::Insert => (Vec::new(), collect(self.new)),
            Operation::Update => (collect(self.old), collect(self.new)),
            Operation::Delete => (collect(self.old), Vec::new()),
        };
        RowChangeDelta {
            op,
            table: schema.id.clone(),
            before,
            after,
        }
    }
}

/// Parsed table reference: validated against the schema, alias remembered for
/// stripping qualified column references.
struct TableRef {
    alias: Option<String>,
    name: String,
}

fn parse_table_ref(cursor: &mut Cursor, schema: &TableSchema) -> Result<TableRef> {
    let first = cursor.next_ident()?;
    let name = if cursor.eat_punct('.') {
        cursor.next_ident()?
    } else {
        first
    };

    if name != schema.id.name {
        return Err(Error::UnknownTable(name));
    }

    // A bare identifier following the table reference is an alias.
    let alias = match cursor.peek() {
        Some(Token::Ident(s)) if !is_clause_keyword(s) => {
            let alias = s.clone();
            cursor.pos += 1;
            Some(alias)
        }
        _ => None,
    };

    Ok(TableRef { alias, name })
}

fn is_clause_keyword(s: &str) -> bool {
    matches!(s, "SET" | "WHERE" | "VALUES" | "SELECT" | "RETURNING")
}

/// Column reference, optionally qualified by the table name or alias. Any
/// other qualifier is kept, which makes the name fail schema lookup later.
fn parse_column_ref(cursor: &mut Cursor, table: &TableRef) -> Result<String> {
    let first = cursor.next_ident()?;
    if cursor.eat_punct('.') {
        let column = cursor.next_ident()?;
        let qualifier_known = first == table.name
            || table
                .alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(&first));
        if qualifier_known {
            Ok(column)
        } else {
            Ok(format!("{first}.{column}"))
        }
    } else {
        Ok(first)
    }
}

/// A literal value expression. `None` means an explicit NULL.
fn parse_literal(cursor: &mut Cursor) -> Result<Option<String>> {
    match cursor.next() {
        Some(Token::Str(s)) => Ok(Some(s)),
        Some(Token::Num(n)) => Ok(Some(n)),
        Some(Token::Punct('-')) => match cursor.next() {
            Some(Token::Num(n)) => Ok(Some(format!("-{n}"))),
            other => Err(Error::Syntax(format!("expected number after '-', got {other:?}"))),
        },
        Some(Token::Punct('+')) => match cursor.next() {
            Some(Token::Num(n)) => Ok(Some(n)),
            other => Err(Error::Syntax(format!("expected number after '+', got {other:?}"))),
        },
        Some(Token::Ident(kw)) if kw == "NULL" => Ok(None),
        // The source wraps temporal literals in conversion functions; the
        // first argument is the literal we want, the format mask is implied
        // by the session parameters the miner configures.
        Some(Token::Ident(kw)) if kw == "TO_DATE" || kw == "TO_TIMESTAMP" => {
            cursor.expect_punct('(')?;
            let raw = match cursor.next() {
                Some(Token::Str(s)) => s,
                other => {
                    return Err(Error::Syntax(format!(
                        "expected string argument to {kw}, got {other:?}"
                    )))
                }
            };
            if cursor.eat_punct(',') {
                match cursor.next() {
                    Some(Token::Str(_)) => {}
                    other => {
                        return Err(Error::Syntax(format!(
                            "expected format mask in {kw}, got {other:?}"
                        )))
                    }
                }
            }
            cursor.expect_punct(')')?;
            Ok(Some(raw))
        }
        other => Err(Error::Unsupported(format!("value expression {other:?}"))),
    }
}

fn coerce_literal(raw: Option<String>, ty: ColumnType) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(r) => coerce(&r, ty),
    }
}

fn column_type(schema: &TableSchema, name: &str) -> Option<ColumnType> {
    schema.column(name).map(|c| c.ty)
}

fn parse_insert(cursor: &mut Cursor, schema: &TableSchema) -> Result<RowChangeDelta> {
    cursor.expect_keyword("INTO")?;
    let table = parse_table_ref(cursor, schema)?;
    let mut images = Images::for_schema(schema);

    cursor.expect_punct('(')?;
    let mut columns = Vec::new();
    loop {
        columns.push(parse_column_ref(cursor, &table)?);
        if !cursor.eat_punct(',') {
            break;
        }
    }
    cursor.expect_punct(')')?;

    if cursor.eat_keyword("SELECT") {
        return Err(Error::Unsupported("INSERT ... SELECT".into()));
    }
    cursor.expect_keyword("VALUES")?;
    cursor.expect_punct('(')?;
    let mut values = Vec::new();
    loop {
        values.push(parse_literal(cursor)?);
        if !cursor.eat_punct(',') {
            break;
        }
    }
    cursor.expect_punct(')')?;
    if cursor.eat_punct(',') {
        return Err(Error::Unsupported("multi-row INSERT".into()));
    }
    cursor.expect_end()?;

    if values.len() != columns.len() {
        return Err(Error::ColumnCountMismatch {
            values: values.len(),
            columns: columns.len(),
        });
    }

    for (name, raw) in columns.into_iter().zip(values) {
        let ty = column_type(schema, &name).ok_or_else(|| Error::UnknownColumn {
            table: table.name.clone(),
            column: name.clone(),
        })?;
        images.set_new(&table.name, &name, coerce_literal(raw, ty)?)?;
    }

    Ok(images.finish(Operation::Insert, schema))
}

fn parse_update(cursor: &mut Cursor, schema: &TableSchema) -> Result<RowChangeDelta> {
    let table = parse_table_ref(cursor, schema)?;
    if cursor.eat_punct(',') {
        return Err(Error::Unsupported("multi-table UPDATE".into()));
    }
    let mut images = Images::for_schema(schema);

    cursor.expect_keyword("SET")?;
    loop {
        let name = parse_column_ref(cursor, &table)?;
        cursor.expect_punct('=')?;
        let raw = parse_literal(cursor)?;
        let ty = column_type(schema, &name).ok_or_else(|| Error::UnknownColumn {
            table: table.name.clone(),
            column: name.clone(),
        })?;
        images.set_new(&table.name, &name, coerce_literal(raw, ty)?)?;
        if !cursor.eat_punct(',') {
            break;
        }
    }

    if cursor.eat_keyword("WHERE") {
        parse_where(cursor, schema, &table, &mut images)?;
        images.clone_old_to_new();
    }
    cursor.expect_end()?;

    Ok(images.finish(Operation::Update, schema))
}

fn parse_delete(cursor: &mut Cursor, schema: &TableSchema) -> Result<RowChangeDelta> {
    cursor.eat_keyword("FROM");
    let table = parse_table_ref(cursor, schema)?;
    let mut images = Images::for_schema(schema);

    if cursor.eat_keyword("WHERE") {
        parse_where(cursor, schema, &table, &mut images)?;
    }
    cursor.expect_end()?;

    Ok(images.finish(Operation::Delete, schema))
}

/// WHERE clause: a conjunction over exactly two predicate shapes, `col =
/// literal` and `col IS NULL`. Everything else is unsupported.
fn parse_where(
    cursor: &mut Cursor,
    schema: &TableSchema,
    table: &TableRef,
    images: &mut Images,
) -> Result<()> {
    loop {
        let name = parse_column_ref(cursor, table)?;
        match cursor.next() {
            Some(Token::Punct('=')) => {
                let raw = parse_literal(cursor)?;
                if let Some(ty) = column_type(schema, &name) {
                    images.set_old(&name, coerce_literal(raw, ty)?);
                }
            }
            Some(Token::Ident(kw)) if kw == "IS" => {
                if cursor.eat_keyword("NOT") {
                    return Err(Error::Unsupported("IS NOT NULL predicate".into()));
                }
                cursor.expect_keyword("NULL")?;
                if column_type(schema, &name).is_some() {
                    images.set_old(&name, Value::Null);
                }
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "predicate operator {other:?} on column {name}"
                )))
            }
        }

        if cursor.eat_keyword("AND") {
            continue;
        }
        if matches!(cursor.peek(), Some(Token::Ident(s)) if s == "OR") {
            return Err(Error::Unsupported("OR predicate".into()));
        }
        return Ok(());
    }
}

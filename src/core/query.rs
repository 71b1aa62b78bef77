// Statement text plus positional parameters, compiled into a row plan per table.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Record, Value};

const GRAMMAR_HINT: &str =
    "Use `SELECT <* | col, ...> FROM <table> [WHERE col <op> <?|literal> [AND ...]]`.";

/// A statement and its positional parameters, bound to `?` placeholders in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    text: String,
    params: Vec<Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn select_all(table: &str) -> Self {
        Self::new(format!("SELECT * FROM {table}"))
    }

    pub fn select_column(table: &str, column: &str) -> Self {
        Self::new(format!("SELECT {column} FROM {table}"))
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn compile(&self) -> Result<Select, Error> {
        let tokens = tokenize(&self.text)?;
        let mut parser = Parser::new(tokens, &self.params);
        let select = parser.select()?;
        parser.finish()?;
        Ok(select)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    fn test(self, left: &Value, right: &Value) -> bool {
        left.compare(right).is_some_and(|ordering| self.holds(ordering))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub operand: Value,
}

impl Condition {
    /// Parses a standalone condition such as `age > 25`. Placeholders are not allowed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let tokens = tokenize(text)?;
        let mut parser = Parser::new(tokens, &[]);
        let condition = parser.condition()?;
        parser.finish()?;
        Ok(condition)
    }

    pub fn evaluate(&self, record: &Record) -> Result<bool, Error> {
        let value = record.get(&self.column).ok_or_else(|| {
            query_error(format!("filter column `{}` is not in the row", self.column))
        })?;
        Ok(self.op.test(value, &self.operand))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select {
    pub table: String,
    pub projection: Projection,
    pub conditions: Vec<Condition>,
}

impl Select {
    /// Resolves column names against a table's columns.
    pub fn plan(&self, table_columns: &[String]) -> Result<RowPlan, Error> {
        let resolve = |column: &str| {
            table_columns
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| {
                    query_error(format!("unknown column `{column}`"))
                        .with_table(self.table.clone())
                })
        };

        let (columns, indexes): (Vec<String>, Vec<usize>) = match &self.projection {
            Projection::All => table_columns.iter().cloned().zip(0..).unzip(),
            Projection::Columns(names) => {
                let mut pairs = Vec::with_capacity(names.len());
                for name in names {
                    pairs.push((name.clone(), resolve(name)?));
                }
                pairs.into_iter().unzip()
            }
        };

        let mut filters = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            filters.push((resolve(&condition.column)?, condition.op, condition.operand.clone()));
        }

        Ok(RowPlan {
            columns: columns.into(),
            indexes,
            filters,
            width: table_columns.len(),
        })
    }
}

/// Filter and projection for one query over one table layout.
#[derive(Clone, Debug)]
pub struct RowPlan {
    columns: Arc<[String]>,
    indexes: Vec<usize>,
    filters: Vec<(usize, CompareOp, Value)>,
    width: usize,
}

impl RowPlan {
    fn matches(&self, row: &[Value]) -> bool {
        self.filters
            .iter()
            .all(|(index, op, operand)| op.test(&row[*index], operand))
    }

    /// Returns the projected record, or `None` when the row is filtered out.
    pub fn apply(&self, row: &[Value]) -> Result<Option<Record>, Error> {
        if row.len() != self.width {
            return Err(query_error(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.width
            ))
            .with_hint("The table file may be corrupt."));
        }
        if !self.matches(row) {
            return Ok(None);
        }
        let values = self.indexes.iter().map(|index| row[*index].clone()).collect();
        Record::new(Arc::clone(&self.columns), values).map(Some)
    }
}

fn query_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Query).with_message(message)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Param,
    Star,
    Comma,
    Op(CompareOp),
}

fn tokenize(text: &str) -> Result<Vec<Token>, Error> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            ';' if chars[i + 1..].iter().all(|c| c.is_whitespace()) => break,
            '?' => {
                tokens.push(Token::Param);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(query_error("unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            literal.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            literal.push(*c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let digits = chars[start..i].iter().collect::<String>();
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| query_error(format!("integer literal {digits} is out of range")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(query_error(format!("unexpected character `{other}`"))
                    .with_hint(GRAMMAR_HINT));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    params: &'a [Value],
    next_param: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, params: &'a [Value]) -> Self {
        Self {
            tokens,
            pos: 0,
            params,
            next_param: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), Error> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            return Ok(());
        }
        Err(query_error(format!("expected {keyword}")).with_hint(GRAMMAR_HINT))
    }

    fn identifier(&mut self, what: &str) -> Result<String, Error> {
        match self.advance() {
            Some(Token::Ident(name)) if !is_reserved(&name) => Ok(name),
            _ => Err(query_error(format!("expected {what} name")).with_hint(GRAMMAR_HINT)),
        }
    }

    fn select(&mut self) -> Result<Select, Error> {
        self.keyword("SELECT")?;
        let projection = if self.peek() == Some(&Token::Star) {
            self.pos += 1;
            Projection::All
        } else {
            let mut columns = vec![self.identifier("column")?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                columns.push(self.identifier("column")?);
            }
            Projection::Columns(columns)
        };

        self.keyword("FROM")?;
        let table = self.identifier("table")?;

        let mut conditions = Vec::new();
        if self.peek_keyword("WHERE") {
            self.pos += 1;
            conditions.push(self.condition()?);
            while self.peek_keyword("AND") {
                self.pos += 1;
                conditions.push(self.condition()?);
            }
        }

        Ok(Select {
            table,
            projection,
            conditions,
        })
    }

    fn condition(&mut self) -> Result<Condition, Error> {
        let column = self.identifier("column")?;
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            _ => {
                return Err(query_error(format!("expected comparison after `{column}`"))
                    .with_hint("Operators: = != <> < <= > >="));
            }
        };
        let operand = match self.advance() {
            Some(Token::Param) => self.take_param()?,
            Some(Token::Int(value)) => Value::Int(value),
            Some(Token::Str(value)) => Value::Str(value),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NULL") => Value::Null,
            _ => {
                return Err(query_error(format!("expected operand after `{column}`"))
                    .with_hint("Operands: ?, integer, 'string', NULL"));
            }
        };
        Ok(Condition {
            column,
            op,
            operand,
        })
    }

    fn take_param(&mut self) -> Result<Value, Error> {
        let index = self.next_param;
        self.next_param += 1;
        self.params.get(index).cloned().ok_or_else(|| {
            query_error(format!(
                "placeholder {} has no parameter ({} supplied)",
                index + 1,
                self.params.len()
            ))
        })
    }

    fn finish(&self) -> Result<(), Error> {
        if let Some(token) = self.peek() {
            return Err(query_error(format!("unexpected trailing input at {token:?}"))
                .with_hint(GRAMMAR_HINT));
        }
        if self.next_param != self.params.len() {
            return Err(query_error(format!(
                "{} parameters supplied for {} placeholders",
                self.params.len(),
                self.next_param
            )));
        }
        Ok(())
    }
}

fn is_reserved(word: &str) -> bool {
    ["SELECT", "FROM", "WHERE", "AND", "NULL"]
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::{CompareOp, Condition, Projection, Query};
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;

    fn user_columns() -> Vec<String> {
        ["user_id", "name", "email", "age"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn parses_projection_and_bound_conditions() {
        let select = Query::new("select name, age from user_data where age >= ? and name != 'x'")
            .bind(25_i64)
            .compile()
            .expect("compile");
        assert_eq!(select.table, "user_data");
        assert_eq!(
            select.projection,
            Projection::Columns(vec!["name".to_string(), "age".to_string()])
        );
        assert_eq!(select.conditions.len(), 2);
        assert_eq!(select.conditions[0].op, CompareOp::Ge);
        assert_eq!(select.conditions[0].operand, Value::Int(25));
        assert_eq!(select.conditions[1].operand, Value::from("x"));
    }

    #[test]
    fn parameter_count_must_match_placeholders() {
        let missing = Query::new("SELECT * FROM t WHERE a = ?").compile();
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::Query);

        let extra = Query::new("SELECT * FROM t").bind(1_i64).compile();
        assert_eq!(extra.unwrap_err().kind(), ErrorKind::Query);
    }

    #[test]
    fn malformed_statements_are_query_errors() {
        for text in [
            "",
            "DELETE FROM t",
            "SELECT FROM t",
            "SELECT * t",
            "SELECT * FROM t WHERE",
            "SELECT * FROM t LIMIT 5",
            "SELECT * FROM 'unterminated",
        ] {
            let err = Query::new(text).compile().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Query, "{text}");
        }
    }

    #[test]
    fn plan_projects_and_filters_rows() {
        let plan = Query::new("SELECT age, name FROM user_data WHERE age > 25")
            .compile()
            .expect("compile")
            .plan(&user_columns())
            .expect("plan");
        let young = vec!["u1".into(), "Ann".into(), "a@x".into(), Value::Int(20)];
        let older = vec!["u2".into(), "Bob".into(), "b@x".into(), Value::Int(40)];
        assert!(plan.apply(&young).expect("apply").is_none());
        let record = plan.apply(&older).expect("apply").expect("match");
        assert_eq!(record.columns(), ["age".to_string(), "name".to_string()]);
        assert_eq!(record.values(), [Value::Int(40), Value::from("Bob")]);
    }

    #[test]
    fn short_rows_are_rejected_before_filtering() {
        let plan = Query::new("SELECT name FROM user_data WHERE age > 25")
            .compile()
            .expect("compile")
            .plan(&user_columns())
            .expect("plan");
        let err = plan.apply(&[Value::from("u1")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn unknown_columns_fail_planning() {
        let err = Query::new("SELECT salary FROM user_data")
            .compile()
            .expect("compile")
            .plan(&user_columns())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.table(), Some("user_data"));
    }

    #[test]
    fn null_comparisons_never_match() {
        let plan = Query::new("SELECT * FROM t WHERE a = NULL")
            .compile()
            .expect("compile")
            .plan(&["a".to_string()])
            .expect("plan");
        assert!(!plan.matches(&[Value::Null]));
    }

    #[test]
    fn standalone_condition_rejects_placeholders() {
        let condition = Condition::parse("age > 25").expect("parse");
        assert_eq!(condition.operand, Value::Int(25));
        assert!(Condition::parse("age > ?").is_err());
    }
}

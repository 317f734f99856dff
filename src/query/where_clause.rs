//! Shared WHERE / HAVING clause
//!
//! Accumulates conditions and renders them as `$n`-parameterized SQL. Used
//! by the select, update, and delete builders.

use crate::value::DbValue;

use super::types::QueryOperator;

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub operator: QueryOperator,
    pub value: Option<DbValue>,
    /// Operand list for IN / NOT IN / BETWEEN
    pub values: Vec<DbValue>,
}

/// An AND-combined condition list, with optional parenthesized OR groups
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    conditions: Vec<Condition>,
    or_groups: Vec<WhereClause>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.or_groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len() + self.or_groups.len()
    }

    /// Add a group whose conditions combine with OR: `(a OR b)` ANDed with
    /// the rest of the clause.
    pub fn any(&mut self, build: impl FnOnce(&mut WhereClause)) -> &mut Self {
        let mut group = WhereClause::new();
        build(&mut group);
        if !group.is_empty() {
            self.or_groups.push(group);
        }
        self
    }

    fn push(&mut self, column: &str, operator: QueryOperator, value: Option<DbValue>) {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator,
            value,
            values: Vec::new(),
        });
    }

    pub fn eq(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        let value = value.into();
        if value.is_null() {
            self.push(column, QueryOperator::IsNull, None);
        } else {
            self.push(column, QueryOperator::Equal, Some(value));
        }
        self
    }

    pub fn ne(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        self.push(column, QueryOperator::NotEqual, Some(value.into()));
        self
    }

    pub fn gt(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        self.push(column, QueryOperator::GreaterThan, Some(value.into()));
        self
    }

    pub fn gte(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        self.push(column, QueryOperator::GreaterThanOrEqual, Some(value.into()));
        self
    }

    pub fn lt(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        self.push(column, QueryOperator::LessThan, Some(value.into()));
        self
    }

    pub fn lte(&mut self, column: &str, value: impl Into<DbValue>) -> &mut Self {
        self.push(column, QueryOperator::LessThanOrEqual, Some(value.into()));
        self
    }

    pub fn like(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.push(column, QueryOperator::Like, Some(DbValue::Text(pattern.to_string())));
        self
    }

    pub fn is_null(&mut self, column: &str) -> &mut Self {
        self.push(column, QueryOperator::IsNull, None);
        self
    }

    pub fn is_not_null(&mut self, column: &str) -> &mut Self {
        self.push(column, QueryOperator::IsNotNull, None);
        self
    }

    pub fn in_values(&mut self, column: &str, values: Vec<DbValue>) -> &mut Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator: QueryOperator::In,
            value: None,
            values,
        });
        self
    }

    pub fn not_in(&mut self, column: &str, values: Vec<DbValue>) -> &mut Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator: QueryOperator::NotIn,
            value: None,
            values,
        });
        self
    }

    pub fn between(
        &mut self,
        column: &str,
        low: impl Into<DbValue>,
        high: impl Into<DbValue>,
    ) -> &mut Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator: QueryOperator::Between,
            value: None,
            values: vec![low.into(), high.into()],
        });
        self
    }

    /// Equality conditions for a (column, value) map; null means IS NULL
    pub fn append_map(&mut self, pairs: impl IntoIterator<Item = (String, DbValue)>) -> &mut Self {
        for (column, value) in pairs {
            self.eq(&column, value);
        }
        self
    }

    /// Render into `sql`, appending parameters and advancing the placeholder
    /// counter. Nothing is written when the clause is empty.
    pub fn render(
        &self,
        keyword: &str,
        sql: &mut String,
        params: &mut Vec<DbValue>,
        counter: &mut usize,
    ) {
        if self.is_empty() {
            return;
        }
        sql.push(' ');
        sql.push_str(keyword);
        sql.push(' ');
        self.render_body(" AND ", sql, params, counter);
        let mut first = self.conditions.is_empty();
        for group in &self.or_groups {
            if !first {
                sql.push_str(" AND ");
            }
            first = false;
            sql.push('(');
            group.render_body(" OR ", sql, params, counter);
            sql.push(')');
        }
    }

    fn render_body(
        &self,
        joiner: &str,
        sql: &mut String,
        params: &mut Vec<DbValue>,
        counter: &mut usize,
    ) {
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                sql.push_str(joiner);
            }
            sql.push_str(&condition.column);
            match condition.operator {
                QueryOperator::IsNull | QueryOperator::IsNotNull => {
                    sql.push(' ');
                    sql.push_str(&condition.operator.to_string());
                }
                QueryOperator::In | QueryOperator::NotIn => {
                    sql.push(' ');
                    sql.push_str(&condition.operator.to_string());
                    sql.push_str(" (");
                    for (j, value) in condition.values.iter().enumerate() {
                        if j > 0 {
                            sql.push_str(", ");
                        }
                        sql.push_str(&format!("${}", counter));
                        params.push(value.clone());
                        *counter += 1;
                    }
                    sql.push(')');
                }
                QueryOperator::Between => {
                    sql.push_str(&format!(" BETWEEN ${} AND ${}", counter, *counter + 1));
                    params.extend(condition.values.iter().cloned());
                    *counter += 2;
                }
                _ => {
                    sql.push_str(&format!(" {} ${}", condition.operator, counter));
                    if let Some(value) = &condition.value {
                        params.push(value.clone());
                    }
                    *counter += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(clause: &WhereClause) -> (String, Vec<DbValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        let mut counter = 1;
        clause.render("WHERE", &mut sql, &mut params, &mut counter);
        (sql, params)
    }

    #[test]
    fn renders_nothing_when_empty() {
        let (sql, params) = render(&WhereClause::new());
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let mut clause = WhereClause::new();
        clause.eq("pid", DbValue::Null).eq("code", "startup");
        let (sql, params) = render(&clause);
        assert_eq!(sql, " WHERE pid IS NULL AND code = $1");
        assert_eq!(params, vec![DbValue::Text("startup".into())]);
    }

    #[test]
    fn in_and_between_consume_multiple_placeholders() {
        let mut clause = WhereClause::new();
        clause.in_values("id", vec![DbValue::Int(1), DbValue::Int(2)]);
        clause.between("age", 18, 65);
        let (sql, params) = render(&clause);
        assert_eq!(sql, " WHERE id IN ($1, $2) AND age BETWEEN $3 AND $4");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn or_groups_parenthesize() {
        let mut clause = WhereClause::new();
        clause.eq("active", true).any(|w| {
            w.eq("role", "admin").eq("role", "owner");
        });
        let (sql, params) = render(&clause);
        assert_eq!(
            sql,
            " WHERE active = $1 AND (role = $2 OR role = $3)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn empty_or_groups_are_dropped() {
        let mut clause = WhereClause::new();
        clause.eq("active", true).any(|_| {});
        let (sql, _) = render(&clause);
        assert_eq!(sql, " WHERE active = $1");
    }
}

//! In-memory reference executor. Exists to exercise the engine in tests and
//! demos; it is deliberately not a database.

use std::collections::HashMap;

use crate::errors::OrmError;
use crate::runtime::executor::{
    Aggregate, AggregateFn, BindValue, CmpOp, Condition, DeleteStatement, InsertStatement, Join,
    JoinKind, Row, SelectStatement, SortOrder, SqlExecutor, SqlValue, UpdateStatement, WriteOutcome,
    WriteValue,
};

#[derive(Debug, Default)]
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
    snapshot: Option<HashMap<String, Vec<Row>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table with pre-built rows, bypassing the insert path.
    pub fn seed(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(table.into(), rows);
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn next_id(&mut self, table: &str) -> i64 {
        let seq = self.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn matching(&self, stmt: &SelectStatement) -> Result<Vec<Row>, OrmError> {
        let base = self.rows(&stmt.table).to_vec();
        let mut joined = Vec::new();
        for row in base {
            match self.join_rows(row, &stmt.joins)? {
                Some(row) => joined.push(row),
                None => {}
            }
        }

        let mut selected = Vec::new();
        for row in joined {
            if conditions_match(&row, &stmt.wheres)? {
                selected.push(row);
            }
        }

        if !stmt.orders.is_empty() {
            selected.sort_by(|left, right| {
                for (target, order) in &stmt.orders {
                    let column = unqualified(target);
                    let ordering = compare_values(left.get(column), right.get(column));
                    let ordering = match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = stmt.offset.unwrap_or(0) as usize;
        let mut selected: Vec<Row> = selected.into_iter().skip(offset).collect();
        if let Some(limit) = stmt.limit {
            selected.truncate(limit as usize);
        }
        Ok(selected)
    }

    fn join_rows(&self, base: Row, joins: &[Join]) -> Result<Option<Row>, OrmError> {
        let mut current = base;
        for join in joins {
            let candidates = self.rows(&join.table);
            let mut matched = None;
            for candidate in candidates {
                // Evaluate the ON condition against the merged view so both
                // sides of a column comparison are visible.
                let mut view = current.clone();
                for (column, value) in candidate {
                    view.entry(column.clone()).or_insert_with(|| value.clone());
                }
                if condition_matches(&view, &join.on)? {
                    matched = Some(view);
                    break;
                }
            }
            match (matched, join.kind) {
                (Some(view), _) => current = view,
                (None, JoinKind::Left) => {}
                (None, JoinKind::Inner) => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

fn unqualified(target: &str) -> &str {
    target.rsplit('.').next().unwrap_or(target)
}

fn loose_eq(left: &SqlValue, right: &SqlValue) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        (SqlValue::Text(a), SqlValue::Text(b)) => a == b,
        // Numeric and boolean storage forms compare loosely: 1 == 1.0 == true.
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare_values(left: Option<&SqlValue>, right: Option<&SqlValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(SqlValue::Text(a)), Some(SqlValue::Text(b))) => a.cmp(b),
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn like_match(candidate: &str, pattern: &str) -> bool {
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%');
    let needle = pattern.trim_matches('%');
    match (starts, ends) {
        (true, true) => candidate.contains(needle),
        (true, false) => candidate.ends_with(needle),
        (false, true) => candidate.starts_with(needle),
        (false, false) => candidate == needle,
    }
}

fn condition_matches(row: &Row, condition: &Condition) -> Result<bool, OrmError> {
    let column = unqualified(&condition.target);
    let current = row.get(column);

    match condition.op {
        CmpOp::IsNull => {
            return Ok(current.map(SqlValue::is_null).unwrap_or(true));
        }
        CmpOp::IsNotNull => {
            return Ok(current.map(|value| !value.is_null()).unwrap_or(false));
        }
        _ => {}
    }

    let current = match current {
        Some(value) => value,
        None => return Ok(false),
    };

    let rhs = match &condition.value {
        BindValue::Literal(value) => value.clone(),
        BindValue::Column(other) => match row.get(unqualified(other)) {
            Some(value) => value.clone(),
            None => return Ok(false),
        },
        BindValue::List(values) => {
            let found = values.iter().any(|value| loose_eq(current, value));
            return Ok(match condition.op {
                CmpOp::In => found,
                CmpOp::NotIn => !found,
                _ => {
                    return Err(OrmError::executor(
                        "list values require IN or NOT IN in the memory executor",
                    ));
                }
            });
        }
        BindValue::Raw(_) => {
            return Err(OrmError::executor(
                "raw SQL conditions are not supported by the memory executor",
            ));
        }
        BindValue::None => return Ok(false),
    };

    let ordering = compare_values(Some(current), Some(&rhs));
    Ok(match condition.op {
        CmpOp::Eq => loose_eq(current, &rhs),
        CmpOp::Ne => !loose_eq(current, &rhs),
        CmpOp::Gt => ordering == std::cmp::Ordering::Greater,
        CmpOp::Ge => ordering != std::cmp::Ordering::Less,
        CmpOp::Lt => ordering == std::cmp::Ordering::Less,
        CmpOp::Le => ordering != std::cmp::Ordering::Greater,
        CmpOp::Like | CmpOp::NotLike => {
            let matched = match (current, &rhs) {
                (SqlValue::Text(candidate), SqlValue::Text(pattern)) => like_match(candidate, pattern),
                _ => false,
            };
            if condition.op == CmpOp::Like { matched } else { !matched }
        }
        CmpOp::In | CmpOp::NotIn => {
            return Err(OrmError::executor("IN requires a value list"));
        }
        CmpOp::IsNull | CmpOp::IsNotNull => unreachable!("handled above"),
    })
}

fn conditions_match(row: &Row, conditions: &[Condition]) -> Result<bool, OrmError> {
    for condition in conditions {
        if !condition_matches(row, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn resolve_write(value: &WriteValue) -> Result<SqlValue, OrmError> {
    match value {
        WriteValue::Value(value) => Ok(value.clone()),
        WriteValue::Expr(_) => Err(OrmError::executor(
            "raw SQL write expressions are not supported by the memory executor",
        )),
    }
}

impl SqlExecutor for MemoryExecutor {
    fn select(&mut self, stmt: &SelectStatement) -> Result<Vec<Row>, OrmError> {
        self.matching(stmt)
    }

    fn scalar(&mut self, stmt: &SelectStatement) -> Result<Option<SqlValue>, OrmError> {
        let aggregate = match &stmt.aggregate {
            Some(aggregate) => aggregate.clone(),
            None => Aggregate {
                func: AggregateFn::Count,
                target: "*".to_string(),
            },
        };
        let rows = self.matching(stmt)?;

        if aggregate.func == AggregateFn::Count {
            return Ok(Some(SqlValue::Int(rows.len() as i64)));
        }

        let column = unqualified(&aggregate.target);
        let numbers: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(SqlValue::as_f64)
            .collect();
        if numbers.is_empty() {
            return Ok(None);
        }
        let result = match aggregate.func {
            AggregateFn::Sum => numbers.iter().sum(),
            AggregateFn::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
            AggregateFn::Max => numbers.iter().cloned().fold(f64::MIN, f64::max),
            AggregateFn::Min => numbers.iter().cloned().fold(f64::MAX, f64::min),
            AggregateFn::Count => unreachable!("handled above"),
        };
        if result.fract() == 0.0 {
            Ok(Some(SqlValue::Int(result as i64)))
        } else {
            Ok(Some(SqlValue::Float(result)))
        }
    }

    fn insert(&mut self, stmt: &InsertStatement) -> Result<WriteOutcome, OrmError> {
        let mut row = Row::new();
        for (column, value) in &stmt.values {
            row.insert(column.clone(), resolve_write(value)?);
        }

        let mut last_insert_id = None;
        if let Some(primary) = &stmt.primary {
            let missing = row.get(primary).map(SqlValue::is_null).unwrap_or(true);
            if missing {
                let id = self.next_id(&stmt.table);
                row.insert(primary.clone(), SqlValue::Int(id));
                last_insert_id = Some(id);
            } else if let Some(SqlValue::Int(id)) = row.get(primary) {
                last_insert_id = Some(*id);
            }
        }

        self.tables.entry(stmt.table.clone()).or_default().push(row);
        Ok(WriteOutcome {
            affected: 1,
            last_insert_id,
        })
    }

    fn update(&mut self, stmt: &UpdateStatement) -> Result<u64, OrmError> {
        let mut resolved = Vec::with_capacity(stmt.values.len());
        for (column, value) in &stmt.values {
            resolved.push((column.clone(), resolve_write(value)?));
        }

        let rows = self.tables.entry(stmt.table.clone()).or_default();
        let mut affected = 0;
        for row in rows.iter_mut() {
            if conditions_match(row, &stmt.wheres)? {
                for (column, value) in &resolved {
                    row.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, OrmError> {
        let rows = self.tables.entry(stmt.table.clone()).or_default();
        let before = rows.len();
        let mut failed = None;
        rows.retain(|row| match conditions_match(row, &stmt.wheres) {
            Ok(matched) => !matched,
            Err(err) => {
                failed.get_or_insert(err);
                true
            }
        });
        if let Some(err) = failed {
            return Err(err);
        }
        Ok((before - rows.len()) as u64)
    }

    fn begin(&mut self) -> Result<(), OrmError> {
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), OrmError> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), OrmError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn insert_assigns_sequence_ids() {
        let mut executor = MemoryExecutor::new();
        let stmt = InsertStatement {
            table: "user".to_string(),
            values: vec![("name".to_string(), WriteValue::Value(SqlValue::Text("Ann".into())))],
            primary: Some("id".to_string()),
        };
        let outcome = executor.insert(&stmt).unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(outcome.last_insert_id, Some(1));
        let outcome = executor.insert(&stmt).unwrap();
        assert_eq!(outcome.last_insert_id, Some(2));
    }

    #[test]
    fn conditions_filter_rows() {
        let mut executor = MemoryExecutor::new();
        executor.seed(
            "user",
            vec![
                row(&[("id", SqlValue::Int(1)), ("age", SqlValue::Int(30))]),
                row(&[("id", SqlValue::Int(2)), ("age", SqlValue::Int(17))]),
            ],
        );
        let stmt = SelectStatement {
            table: "user".to_string(),
            wheres: vec![Condition {
                target: "age".to_string(),
                op: CmpOp::Ge,
                value: BindValue::Literal(SqlValue::Int(18)),
            }],
            ..Default::default()
        };
        let rows = executor.select(&stmt).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Int(1)));
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut executor = MemoryExecutor::new();
        executor.seed("user", vec![row(&[("id", SqlValue::Int(1))])]);
        executor.begin().unwrap();
        executor
            .delete(&DeleteStatement {
                table: "user".to_string(),
                wheres: Vec::new(),
            })
            .unwrap();
        assert!(executor.rows("user").is_empty());
        executor.rollback().unwrap();
        assert_eq!(executor.rows("user").len(), 1);
    }

    #[test]
    fn like_matches_prefix_and_substring() {
        assert!(like_match("hello world", "hello%"));
        assert!(like_match("hello world", "%world"));
        assert!(like_match("hello world", "%lo wo%"));
        assert!(!like_match("hello world", "world%"));
    }
}

use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertUser {
        id: Ulid,
        tutor_approved: bool,
        verified: bool,
        deactivated: bool,
    },
    InsertSubject {
        id: Ulid,
        name: String,
    },
    LinkTutorSubject {
        tutor_id: Ulid,
        subject_id: Ulid,
    },
    UnlinkTutorSubject {
        tutor_id: Ulid,
        subject_id: Ulid,
    },
    DeclareAvailability {
        tutor_id: Ulid,
        weekly_json: String,
    },
    SelectAvailability {
        tutor_id: Ulid,
    },
    InsertSession {
        student_id: Ulid,
        subject_id: Ulid,
        start: Ms,
        end: Ms,
        tutor_id: Option<Ulid>,
    },
    SelectSlots {
        subject_id: Ulid,
        duration_min: i64,
        window_start: Option<Ms>,
        window_days: i64,
        step_min: i64,
    },
    SelectSessionById {
        id: Ulid,
    },
    SelectSessionsByUser {
        user_id: Ulid,
    },
    AcceptSession {
        id: Ulid,
        user_id: Ulid,
    },
    CancelSession {
        id: Ulid,
        user_id: Ulid,
        reason: Option<String>,
    },
    CompleteSession {
        id: Ulid,
        user_id: Ulid,
    },
    InsertProposal {
        session_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        note: Option<String>,
    },
    AcceptProposal {
        session_id: Ulid,
        user_id: Ulid,
    },
    RejectProposal {
        session_id: Ulid,
        user_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("users", 1, 0));
            }
            Ok(Command::UpsertUser {
                id: parse_ulid(&values[0])?,
                tutor_approved: values.get(1).map(parse_bool).transpose()?.unwrap_or(false),
                verified: values.get(2).map(parse_bool).transpose()?.unwrap_or(false),
                deactivated: values.get(3).map(parse_bool).transpose()?.unwrap_or(false),
            })
        }
        "subjects" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("subjects", 2, values.len()));
            }
            Ok(Command::InsertSubject {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
            })
        }
        "tutor_subjects" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("tutor_subjects", 2, values.len()));
            }
            Ok(Command::LinkTutorSubject {
                tutor_id: parse_ulid(&values[0])?,
                subject_id: parse_ulid(&values[1])?,
            })
        }
        "availability" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("availability", 2, values.len()));
            }
            Ok(Command::DeclareAvailability {
                tutor_id: parse_ulid(&values[0])?,
                weekly_json: parse_string(&values[1])?,
            })
        }
        "sessions" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("sessions", 4, values.len()));
            }
            let tutor_id = if values.len() >= 5 {
                parse_ulid_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertSession {
                student_id: parse_ulid(&values[0])?,
                subject_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                tutor_id,
            })
        }
        "proposals" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("proposals", 4, values.len()));
            }
            let note = if values.len() >= 5 {
                parse_string_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertProposal {
                session_id: parse_ulid(&values[0])?,
                user_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                note,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "tutor_subjects" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_eq_filters(&delete.selection)?;
    Ok(Command::UnlinkTutorSubject {
        tutor_id: required_ulid(&filters, "tutor_id")?,
        subject_id: required_ulid(&filters, "subject_id")?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_filters(&select.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            subject_id: required_ulid_f(&filters, "subject_id")?,
            duration_min: optional_i64_f(&filters, "duration")?.unwrap_or(60),
            window_start: filters
                .iter()
                .find(|f| f.column == "start" && matches!(f.op, FilterOp::GtEq))
                .map(|f| parse_i64(&f.value))
                .transpose()?,
            window_days: optional_i64_f(&filters, "days")?.unwrap_or(7),
            step_min: optional_i64_f(&filters, "step")?.unwrap_or(30),
        }),
        "sessions" => {
            if let Some(f) = filters.iter().find(|f| f.column == "id") {
                Ok(Command::SelectSessionById {
                    id: parse_ulid(&f.value)?,
                })
            } else if let Some(f) = filters.iter().find(|f| f.column == "user_id") {
                Ok(Command::SelectSessionsByUser {
                    user_id: parse_ulid(&f.value)?,
                })
            } else {
                Err(SqlError::MissingFilter("id or user_id"))
            }
        }
        "availability" => Ok(Command::SelectAvailability {
            tutor_id: required_ulid_f(&filters, "tutor_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let filters = collect_eq_filters(selection)?;
    let user_id = required_ulid(&filters, "user_id")?;

    let status = assignment_string(assignments, "status")?
        .ok_or(SqlError::MissingFilter("status"))?
        .to_lowercase();

    match table.as_str() {
        "sessions" => {
            let id = required_ulid(&filters, "id")?;
            match status.as_str() {
                "accepted" => Ok(Command::AcceptSession { id, user_id }),
                "cancelled" => Ok(Command::CancelSession {
                    id,
                    user_id,
                    reason: assignment_string(assignments, "reason")?,
                }),
                "completed" => Ok(Command::CompleteSession { id, user_id }),
                other => Err(SqlError::Parse(format!("unknown session status: {other}"))),
            }
        }
        "proposals" => {
            let session_id = required_ulid(&filters, "session_id")?;
            match status.as_str() {
                "accepted" => Ok(Command::AcceptProposal {
                    session_id,
                    user_id,
                }),
                "rejected" => Ok(Command::RejectProposal {
                    session_id,
                    user_id,
                }),
                other => Err(SqlError::Parse(format!("unknown proposal status: {other}"))),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause helpers ──────────────────────────────────────

#[derive(Debug, PartialEq)]
enum FilterOp {
    Eq,
    GtEq,
}

struct Filter {
    column: String,
    op: FilterOp,
    value: Expr,
}

/// Flatten a conjunction of simple comparisons into column filters.
fn collect_filters(selection: &Option<Expr>) -> Result<Vec<Filter>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk_filters(expr, &mut out)?;
    }
    Ok(out)
}

fn walk_filters(expr: &Expr, out: &mut Vec<Filter>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_filters(left, out)?;
                walk_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(column) = expr_column_name(left) {
                    out.push(Filter {
                        column,
                        op: FilterOp::Eq,
                        value: (**right).clone(),
                    });
                }
            }
            ast::BinaryOperator::GtEq => {
                if let Some(column) = expr_column_name(left) {
                    out.push(Filter {
                        column,
                        op: FilterOp::GtEq,
                        value: (**right).clone(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn collect_eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    Ok(collect_filters(selection)?
        .into_iter()
        .filter(|f| f.op == FilterOp::Eq)
        .map(|f| (f.column, f.value))
        .collect())
}

fn required_ulid(filters: &[(String, Expr)], column: &'static str) -> Result<Ulid, SqlError> {
    let (_, expr) = filters
        .iter()
        .find(|(c, _)| c == column)
        .ok_or(SqlError::MissingFilter(column))?;
    parse_ulid(expr)
}

fn required_ulid_f(filters: &[Filter], column: &'static str) -> Result<Ulid, SqlError> {
    let f = filters
        .iter()
        .find(|f| f.column == column && f.op == FilterOp::Eq)
        .ok_or(SqlError::MissingFilter(column))?;
    parse_ulid(&f.value)
}

fn optional_i64_f(filters: &[Filter], column: &str) -> Result<Option<i64>, SqlError> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == FilterOp::Eq)
        .map(|f| parse_i64(&f.value))
        .transpose()
}

fn assignment_string(
    assignments: &[ast::Assignment],
    column: &str,
) -> Result<Option<String>, SqlError> {
    for a in assignments {
        let name = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        if name.as_deref() == Some(column) {
            return Ok(Some(parse_string(&a.value)?));
        }
    }
    Ok(None)
}

// ── Expression helpers ────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_upsert_user_defaults() {
        let cmd = parse_sql(&format!("INSERT INTO users (id) VALUES ('{U}')")).unwrap();
        match cmd {
            Command::UpsertUser {
                id,
                tutor_approved,
                verified,
                deactivated,
            } => {
                assert_eq!(id.to_string(), U);
                assert!(!tutor_approved && !verified && !deactivated);
            }
            _ => panic!("expected UpsertUser, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_upsert_user_flags() {
        let cmd = parse_sql(&format!(
            "INSERT INTO users (id, tutor_approved, verified, deactivated) VALUES ('{U}', true, true, false)"
        ))
        .unwrap();
        match cmd {
            Command::UpsertUser {
                tutor_approved,
                verified,
                deactivated,
                ..
            } => {
                assert!(tutor_approved && verified && !deactivated);
            }
            _ => panic!("expected UpsertUser, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_subject() {
        let cmd =
            parse_sql(&format!("INSERT INTO subjects (id, name) VALUES ('{U}', 'algebra')"))
                .unwrap();
        match cmd {
            Command::InsertSubject { name, .. } => assert_eq!(name, "algebra"),
            _ => panic!("expected InsertSubject, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_link_and_unlink() {
        let cmd = parse_sql(&format!(
            "INSERT INTO tutor_subjects (tutor_id, subject_id) VALUES ('{U}', '{U}')"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::LinkTutorSubject { .. }));

        let cmd = parse_sql(&format!(
            "DELETE FROM tutor_subjects WHERE tutor_id = '{U}' AND subject_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::UnlinkTutorSubject { .. }));
    }

    #[test]
    fn parse_declare_availability() {
        let weekly = r#"[{"day":"MON","off":false,"slots":[{"start":"14:00","end":"16:00"}]}]"#;
        let sql = format!(
            "INSERT INTO availability (tutor_id, weekly) VALUES ('{U}', '{}')",
            weekly.replace('\'', "''")
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::DeclareAvailability { weekly_json, .. } => assert_eq!(weekly_json, weekly),
            _ => panic!("expected DeclareAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_session() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO sessions (student_id, subject_id, start, "end") VALUES ('{U}', '{U}', 1000, 2000)"#
        ))
        .unwrap();
        match cmd {
            Command::InsertSession {
                start,
                end,
                tutor_id,
                ..
            } => {
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(tutor_id, None);
            }
            _ => panic!("expected InsertSession, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_session_with_preferred_tutor() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO sessions (student_id, subject_id, start, "end", tutor_id) VALUES ('{U}', '{U}', 1000, 2000, '{U}')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertSession { tutor_id, .. } => {
                assert_eq!(tutor_id.map(|t| t.to_string()).as_deref(), Some(U));
            }
            _ => panic!("expected InsertSession, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slots_with_defaults() {
        let cmd = parse_sql(&format!("SELECT * FROM slots WHERE subject_id = '{U}'")).unwrap();
        match cmd {
            Command::SelectSlots {
                duration_min,
                window_start,
                window_days,
                step_min,
                ..
            } => {
                assert_eq!(duration_min, 60);
                assert_eq!(window_start, None);
                assert_eq!(window_days, 7);
                assert_eq!(step_min, 30);
            }
            _ => panic!("expected SelectSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slots_full() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM slots WHERE subject_id = '{U}' AND duration = 90 AND start >= 345600000 AND days = 1 AND step = 15"
        ))
        .unwrap();
        match cmd {
            Command::SelectSlots {
                duration_min,
                window_start,
                window_days,
                step_min,
                ..
            } => {
                assert_eq!(duration_min, 90);
                assert_eq!(window_start, Some(345_600_000));
                assert_eq!(window_days, 1);
                assert_eq!(step_min, 15);
            }
            _ => panic!("expected SelectSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_sessions() {
        let cmd = parse_sql(&format!("SELECT * FROM sessions WHERE id = '{U}'")).unwrap();
        assert!(matches!(cmd, Command::SelectSessionById { .. }));

        let cmd = parse_sql(&format!("SELECT * FROM sessions WHERE user_id = '{U}'")).unwrap();
        assert!(matches!(cmd, Command::SelectSessionsByUser { .. }));

        assert!(matches!(
            parse_sql("SELECT * FROM sessions"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_session_status_updates() {
        let cmd = parse_sql(&format!(
            "UPDATE sessions SET status = 'accepted' WHERE id = '{U}' AND user_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::AcceptSession { .. }));

        let cmd = parse_sql(&format!(
            "UPDATE sessions SET status = 'cancelled', reason = 'sick' WHERE id = '{U}' AND user_id = '{U}'"
        ))
        .unwrap();
        match cmd {
            Command::CancelSession { reason, .. } => assert_eq!(reason.as_deref(), Some("sick")),
            _ => panic!("expected CancelSession, got {cmd:?}"),
        }

        let cmd = parse_sql(&format!(
            "UPDATE sessions SET status = 'completed' WHERE id = '{U}' AND user_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::CompleteSession { .. }));
    }

    #[test]
    fn parse_update_requires_acting_user() {
        let result = parse_sql(&format!(
            "UPDATE sessions SET status = 'accepted' WHERE id = '{U}'"
        ));
        assert!(matches!(result, Err(SqlError::MissingFilter("user_id"))));
    }

    #[test]
    fn parse_insert_proposal() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO proposals (session_id, user_id, start, "end", note) VALUES ('{U}', '{U}', 1000, 2000, 'after class')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertProposal { note, start, .. } => {
                assert_eq!(note.as_deref(), Some("after class"));
                assert_eq!(start, 1000);
            }
            _ => panic!("expected InsertProposal, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_proposal_verdicts() {
        let cmd = parse_sql(&format!(
            "UPDATE proposals SET status = 'accepted' WHERE session_id = '{U}' AND user_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::AcceptProposal { .. }));

        let cmd = parse_sql(&format!(
            "UPDATE proposals SET status = 'rejected' WHERE session_id = '{U}' AND user_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::RejectProposal { .. }));
    }

    #[test]
    fn parse_listen() {
        let cmd = parse_sql(&format!("LISTEN user_{U}")).unwrap();
        match cmd {
            Command::Listen { channel } => assert_eq!(channel, format!("user_{U}")),
            _ => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM availability WHERE tutor_id = '{U}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::SelectAvailability { .. }));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{U}')")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}

use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

const ROOM_COLUMNS: &[&str] = &["id", "room_type", "price", "description", "photo_url"];
const USER_COLUMNS: &[&str] = &["id", "email", "name", "phone_number", "password", "role"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "user_id",
    "check_in",
    "check_out",
    "adults",
    "children",
];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        room_type: String,
        price_cents: i64,
        description: Option<String>,
        photo_url: Option<String>,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        filter: RoomFilter,
    },
    SelectRoomTypes,
    SelectAvailableRooms {
        check_in: Date,
        check_out: Date,
        room_type: Option<String>,
    },
    SelectRoomsFreeOn {
        date: Date,
    },
    InsertUser {
        id: Ulid,
        email: String,
        name: String,
        phone_number: Option<String>,
        password: String,
        role: Role,
    },
    DeleteUser {
        id: Ulid,
    },
    SelectUsers {
        filter: UserFilter,
    },
    Login {
        email: String,
        password: String,
    },
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        check_in: Date,
        check_out: Date,
        adults: u32,
        children: u32,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
}

#[derive(Debug, PartialEq)]
pub enum RoomFilter {
    All,
    Id(Ulid),
    RoomType(String),
}

#[derive(Debug, PartialEq)]
pub enum UserFilter {
    All,
    Id(Ulid),
    Email(String),
}

#[derive(Debug, PartialEq)]
pub enum BookingFilter {
    All,
    Id(Ulid),
    ConfirmationCode(String),
    User(Ulid),
    Room(Ulid),
}

/// Row layout a statement answers with, if it returns rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Rooms,
    RoomTypes,
    Users,
    Bookings,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match first_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row layout of `sql` without binding any parameters. Used to describe
/// prepared statements whose `$N` placeholders are still unfilled.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    match first_statement(sql).ok()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let table = table_factor_name(&select.from.first()?.relation).ok()?;
                match table.as_str() {
                    "rooms" | "available_rooms" => Some(ResultShape::Rooms),
                    "room_types" => Some(ResultShape::RoomTypes),
                    "users" | "login" => Some(ResultShape::Users),
                    "bookings" => Some(ResultShape::Bookings),
                    _ => None,
                }
            }
            _ => None,
        },
        Statement::Insert(insert) => match insert_table_name(&insert).ok()?.as_str() {
            "bookings" => Some(ResultShape::Bookings),
            _ => None,
        },
        _ => None,
    }
}

fn first_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "rooms" => {
            let row = insert_row(insert, "rooms", ROOM_COLUMNS)?;
            Ok(Command::InsertRoom {
                id: parse_ulid(row.require("id")?)?,
                room_type: parse_text(row.require("room_type")?)?,
                price_cents: parse_price_cents(row.require("price")?)?,
                description: row.optional("description", parse_text_or_null)?,
                photo_url: row.optional("photo_url", parse_text_or_null)?,
            })
        }
        "users" => {
            let row = insert_row(insert, "users", USER_COLUMNS)?;
            let role = match row.get("role") {
                Some(expr) => parse_role(expr)?,
                None => Role::User,
            };
            Ok(Command::InsertUser {
                id: parse_ulid(row.require("id")?)?,
                email: parse_text(row.require("email")?)?,
                name: parse_text(row.require("name")?)?,
                phone_number: row.optional("phone_number", parse_text_or_null)?,
                password: parse_text(row.require("password")?)?,
                role,
            })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                id: parse_ulid(row.require("id")?)?,
                room_id: parse_ulid(row.require("room_id")?)?,
                user_id: parse_ulid(row.require("user_id")?)?,
                check_in: parse_date(row.require("check_in")?)?,
                check_out: parse_date(row.require("check_out")?)?,
                adults: parse_u32(row.require("adults")?)?,
                children: match row.get("children") {
                    Some(expr) => parse_u32_or_null(expr)?.unwrap_or(0),
                    None => 0,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column → value pairs of a single-row INSERT. Without an explicit column
/// list the values are taken in `defaults` order.
struct InsertRow {
    table: &'static str,
    values: Vec<(String, Expr)>,
}

impl InsertRow {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn optional<T>(
        &self,
        column: &str,
        parse: impl Fn(&Expr) -> Result<Option<T>, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.get(column) {
            Some(expr) => parse(expr),
            None => Ok(None),
        }
    }
}

fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    defaults: &[&str],
) -> Result<InsertRow, SqlError> {
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("{table}: multi-row INSERT")));
    }
    let values = rows.into_iter().next().unwrap_or_default();

    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() > defaults.len() {
            return Err(SqlError::WrongArity(table, defaults.len(), values.len()));
        }
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }

    Ok(InsertRow {
        table,
        values: columns.into_iter().zip(values).collect(),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "rooms" {
        return Err(SqlError::Unsupported(format!("UPDATE {name}")));
    }
    let id = extract_where_id(selection)?;

    let mut patch = RoomPatch::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        let value = &assignment.value;
        match column.as_str() {
            "room_type" => patch.room_type = Some(parse_text(value)?),
            "price" => patch.price_cents = Some(parse_price_cents(value)?),
            "description" => patch.description = parse_text_or_null(value)?,
            "photo_url" => patch.photo_url = parse_text_or_null(value)?,
            _ => return Err(SqlError::UnknownColumn("rooms", column)),
        }
    }
    Ok(Command::UpdateRoom { id, patch })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "users" => Ok(Command::DeleteUser { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let filters = Filters(filters);

    match table.as_str() {
        "rooms" => {
            let filter = if let Some(id) = filters.eq("id") {
                RoomFilter::Id(parse_ulid(id)?)
            } else if let Some(t) = filters.eq("room_type") {
                RoomFilter::RoomType(parse_text(t)?)
            } else {
                RoomFilter::All
            };
            Ok(Command::SelectRooms { filter })
        }
        "room_types" => Ok(Command::SelectRoomTypes),
        "available_rooms" => {
            if let Some(date) = filters.eq("date") {
                return Ok(Command::SelectRoomsFreeOn {
                    date: parse_date(date)?,
                });
            }
            let check_in = filters
                .find("check_in", &[BinaryOperator::Eq, BinaryOperator::GtEq])
                .ok_or(SqlError::MissingFilter("check_in"))?;
            let check_out = filters
                .find("check_out", &[BinaryOperator::Eq, BinaryOperator::LtEq])
                .ok_or(SqlError::MissingFilter("check_out"))?;
            Ok(Command::SelectAvailableRooms {
                check_in: parse_date(check_in)?,
                check_out: parse_date(check_out)?,
                room_type: filters.eq("room_type").map(parse_text).transpose()?,
            })
        }
        "users" => {
            let filter = if let Some(id) = filters.eq("id") {
                UserFilter::Id(parse_ulid(id)?)
            } else if let Some(email) = filters.eq("email") {
                UserFilter::Email(parse_text(email)?)
            } else {
                UserFilter::All
            };
            Ok(Command::SelectUsers { filter })
        }
        "login" => Ok(Command::Login {
            email: parse_text(filters.eq("email").ok_or(SqlError::MissingFilter("email"))?)?,
            password: parse_text(
                filters
                    .eq("password")
                    .ok_or(SqlError::MissingFilter("password"))?,
            )?,
        }),
        "bookings" => {
            let filter = if let Some(id) = filters.eq("id") {
                BookingFilter::Id(parse_ulid(id)?)
            } else if let Some(code) = filters.eq("confirmation_code") {
                BookingFilter::ConfirmationCode(parse_text(code)?)
            } else if let Some(user) = filters.eq("user_id") {
                BookingFilter::User(parse_ulid(user)?)
            } else if let Some(room) = filters.eq("room_id") {
                BookingFilter::Room(parse_ulid(room)?)
            } else {
                BookingFilter::All
            };
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column op value` comparisons joined by AND.
struct Filters(Vec<(String, BinaryOperator, Expr)>);

impl Filters {
    fn find(&self, column: &str, ops: &[BinaryOperator]) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, op, _)| c == column && ops.contains(op))
            .map(|(_, _, e)| e)
    }

    fn eq(&self, column: &str) -> Option<&Expr> {
        self.find(column, &[BinaryOperator::Eq])
    }
}

fn collect_filters(
    expr: &Expr,
    out: &mut Vec<(String, BinaryOperator, Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((column, op.clone(), (**right).clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_filters(sel, &mut filters)?;
    let id = Filters(filters)
        .eq("id")
        .ok_or(SqlError::MissingFilter("id"))
        .and_then(parse_ulid)?;
    Ok(id)
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

/// ISO `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<Date, SqlError> {
    let s = parse_text(expr)?;
    Date::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        let v = parse_i64(expr)?;
        return v
            .checked_neg()
            .ok_or_else(|| SqlError::Parse(format!("integer -({v}) out of range")));
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    if is_null(expr) {
        return Ok(Role::User);
    }
    let s = parse_text(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role {s:?}")))
}

/// Exact decimal → cents. At most two fractional digits.
fn parse_price_cents(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        let cents = parse_price_cents(expr)?;
        return cents
            .checked_neg()
            .ok_or_else(|| SqlError::Parse(format!("price -({cents}) out of range")));
    }
    let s = parse_text(expr)?;
    decimal_to_cents(s.trim()).ok_or_else(|| SqlError::Parse(format!("bad price {s:?}")))
}

pub fn decimal_to_cents(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 2 || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

/// Cents → `"150.00"`.
pub fn cents_to_decimal(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

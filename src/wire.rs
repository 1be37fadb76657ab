use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::StaybookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::property::PropertyManager;
use crate::sql::{self, BookingFilter, Command, ResultShape, RoomFilter, SqlError, UserFilter};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    properties: Arc<PropertyManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(StaybookFactory::new(properties, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct StaybookHandler {
    properties: Arc<PropertyManager>,
    query_parser: Arc<StaybookQueryParser>,
}

impl StaybookHandler {
    pub fn new(properties: Arc<PropertyManager>) -> Self {
        Self {
            properties,
            query_parser: Arc::new(StaybookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties.get_or_create(&db).map_err(|e| {
            user_error("08006", format!("property error: {e}"))
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRoom {
                id,
                room_type,
                price_cents,
                description,
                photo_url,
            } => {
                engine
                    .create_room(id, room_type, price_cents, description, photo_url)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { filter } => {
                let rooms = match filter {
                    RoomFilter::All => engine.list_rooms().await,
                    RoomFilter::Id(id) => engine.get_room(&id).await.map(|(r, _)| r).into_iter().collect(),
                    RoomFilter::RoomType(t) => engine
                        .list_rooms()
                        .await
                        .into_iter()
                        .filter(|r| r.room_type.eq_ignore_ascii_case(&t))
                        .collect(),
                };
                room_rows(&rooms)
            }
            Command::SelectRoomTypes => {
                let schema = Arc::new(schema_for(ResultShape::RoomTypes));
                let rows: Vec<PgWireResult<_>> = engine
                    .room_types()
                    .await
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailableRooms {
                check_in,
                check_out,
                room_type,
            } => {
                let rooms = engine
                    .available_rooms(check_in, check_out, room_type.as_deref())
                    .await
                    .map_err(engine_err)?;
                room_rows(&rooms)
            }
            Command::SelectRoomsFreeOn { date } => room_rows(&engine.rooms_free_on(date).await),
            Command::InsertUser {
                id,
                email,
                name,
                phone_number,
                password,
                role,
            } => {
                engine
                    .register_user(id, &email, name, phone_number, &password, role)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteUser { id } => {
                engine.delete_user(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUsers { filter } => {
                let users = match filter {
                    UserFilter::All => engine.list_users(),
                    UserFilter::Id(id) => engine.get_user(&id).into_iter().collect(),
                    UserFilter::Email(email) => {
                        engine.get_user_by_email(&email).into_iter().collect()
                    }
                };
                user_rows(&users)
            }
            Command::Login { email, password } => {
                let user = engine.login(&email, &password).map_err(|e| {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    engine_err(e)
                })?;
                user_rows(&[user])
            }
            Command::InsertBooking {
                id,
                room_id,
                user_id,
                check_in,
                check_out,
                adults,
                children,
            } => {
                // Built directly: ordering is validated by the engine.
                let stay = Stay { check_in, check_out };
                let booking = engine
                    .confirm_booking(id, room_id, user_id, stay, adults, children)
                    .await
                    .map_err(engine_err)?;
                booking_rows(&[booking])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::All => engine.list_bookings().await,
                    BookingFilter::Id(id) => engine.get_booking(&id).await.into_iter().collect(),
                    BookingFilter::ConfirmationCode(code) => {
                        vec![engine.find_booking_by_code(&code).await.map_err(engine_err)?]
                    }
                    BookingFilter::User(user_id) => {
                        engine.user_bookings(&user_id).await.map_err(engine_err)?
                    }
                    BookingFilter::Room(room_id) => {
                        engine.room_bookings(&room_id).await.map_err(engine_err)?
                    }
                };
                booking_rows(&bookings)
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────
// Every column is sent as VARCHAR text; prices are decimals, dates ISO.

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    let columns: &[&str] = match shape {
        ResultShape::Rooms => &["id", "room_type", "price", "description", "photo_url"],
        ResultShape::RoomTypes => &["room_type"],
        ResultShape::Users => &["id", "email", "name", "phone_number", "role"],
        ResultShape::Bookings => &[
            "id",
            "room_id",
            "user_id",
            "check_in",
            "check_out",
            "adults",
            "children",
            "total_guests",
            "nights",
            "confirmation_code",
        ],
    };
    columns.iter().map(|c| text_field(c)).collect()
}

fn room_rows(rooms: &[RoomInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(schema_for(ResultShape::Rooms));
    let rows: Vec<PgWireResult<_>> = rooms
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.room_type)?;
            encoder.encode_field(&sql::cents_to_decimal(r.price_cents))?;
            encoder.encode_field(&r.description)?;
            encoder.encode_field(&r.photo_url)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn user_rows(users: &[UserInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(schema_for(ResultShape::Users));
    let rows: Vec<PgWireResult<_>> = users
        .iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.email)?;
            encoder.encode_field(&u.name)?;
            encoder.encode_field(&u.phone_number)?;
            encoder.encode_field(&u.role.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: &[BookingInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(schema_for(ResultShape::Bookings));
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.room_id.to_string())?;
            encoder.encode_field(&b.user_id.to_string())?;
            encoder.encode_field(&b.check_in.to_string())?;
            encoder.encode_field(&b.check_out.to_string())?;
            encoder.encode_field(&b.adults.to_string())?;
            encoder.encode_field(&b.children.to_string())?;
            encoder.encode_field(&b.total_guests().to_string())?;
            encoder.encode_field(&b.nights().to_string())?;
            encoder.encode_field(&b.confirmation_code)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn schema_of_statement(sql: &str) -> Vec<FieldInfo> {
    sql::result_shape(sql).map(schema_for).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for StaybookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaybookQueryParser;

#[async_trait]
impl QueryParser for StaybookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_of_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaybookHandler {
    type Statement = String;
    type QueryParser = StaybookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_of_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_of_statement(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement, outside quoted literals.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    max = max.max(n);
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    max
}

/// Inline bound text parameters as quoted literals. One pass over the
/// statement: inlined values are never rescanned, and `$N` inside a quoted
/// literal of the statement is left alone.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            result.push(c);
            continue;
        }
        if c != '$' || in_literal {
            result.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match param {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&sql[i..end]),
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaybookFactory {
    handler: Arc<StaybookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<StaybookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl StaybookFactory {
    pub fn new(properties: Arc<PropertyManager>, password: String) -> Self {
        Self {
            handler: Arc::new(StaybookHandler::new(properties)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                StaybookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaybookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidArgument(_) => "22023",
        EngineError::NotFound(_) | EngineError::CodeNotFound(_) => "02000",
        EngineError::AlreadyExists(_) | EngineError::EmailTaken(_) => "23505",
        EngineError::InvalidCredentials => "28P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

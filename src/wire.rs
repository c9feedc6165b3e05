use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use ulid::Ulid;

use crate::auth::TutordAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct TutordHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TutordQueryParser>,
}

impl TutordHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TutordQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::UpsertUser {
                id,
                tutor_approved,
                verified,
                deactivated,
            } => {
                engine
                    .upsert_user(id, tutor_approved, verified, deactivated)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertSubject { id, name } => {
                engine.create_subject(id, &name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::LinkTutorSubject {
                tutor_id,
                subject_id,
            } => {
                engine
                    .link_tutor_subject(tutor_id, subject_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UnlinkTutorSubject {
                tutor_id,
                subject_id,
            } => {
                engine
                    .unlink_tutor_subject(tutor_id, subject_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::DeclareAvailability {
                tutor_id,
                weekly_json,
            } => {
                engine
                    .declare_availability(tutor_id, &weekly_json)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectAvailability { tutor_id } => {
                let weekly = engine
                    .availability_json(tutor_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let tid = tutor_id.to_string();
                let rows: Vec<PgWireResult<_>> = weekly
                    .into_iter()
                    .map(|json| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&tid)?;
                        encoder.encode_field(&json)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertSession {
                student_id,
                subject_id,
                start,
                end,
                tutor_id,
            } => {
                let session = engine
                    .book_session(student_id, subject_id, span_arg(start, end)?, tutor_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::SelectSlots {
                subject_id,
                duration_min,
                window_start,
                window_days,
                step_min,
            } => {
                let slots = engine
                    .compute_available_slots(
                        subject_id,
                        duration_min,
                        window_start,
                        window_days,
                        step_min,
                    )
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let ids = slot
                            .tutor_ids
                            .iter()
                            .map(Ulid::to_string)
                            .collect::<Vec<_>>()
                            .join(",");
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.span.start)?;
                        encoder.encode_field(&slot.span.end)?;
                        encoder.encode_field(&(slot.tutor_ids.len() as i64))?;
                        encoder.encode_field(&ids)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSessionById { id } => {
                let session = engine.get_session(id).map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::SelectSessionsByUser { user_id } => {
                Ok(vec![session_rows(engine.sessions_for_user(user_id))])
            }
            Command::AcceptSession { id, user_id } => {
                let session = engine.accept_session(id, user_id).await.map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::CancelSession {
                id,
                user_id,
                reason,
            } => {
                let session = engine
                    .cancel_session(id, user_id, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::CompleteSession { id, user_id } => {
                let session = engine
                    .complete_session(id, user_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::InsertProposal {
                session_id,
                user_id,
                start,
                end,
                note,
            } => {
                let session = engine
                    .propose_reschedule(session_id, user_id, span_arg(start, end)?, note)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::AcceptProposal {
                session_id,
                user_id,
            } => {
                let session = engine
                    .accept_proposal(session_id, user_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::RejectProposal {
                session_id,
                user_id,
            } => {
                let session = engine
                    .reject_proposal(session_id, user_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![session_rows(vec![session])])
            }
            Command::Listen { channel } => {
                let user_id_str = channel.strip_prefix("user_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected user_{{id}})"),
                    )))
                })?;
                let user_id = Ulid::from_string(user_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                // creates the channel so events queue up for this user
                let _rx = engine.notify.subscribe(user_id);
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "tutor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("weekly".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new(
            "tutor_count".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "tutor_ids".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
    ]
}

fn sessions_schema() -> Vec<FieldInfo> {
    let varchar = |name: &str| {
        FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
    };
    let int8 =
        |name: &str| FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text);
    vec![
        varchar("id"),
        varchar("student_id"),
        varchar("tutor_id"),
        varchar("subject_id"),
        int8("start"),
        int8("end"),
        int8("duration_min"),
        varchar("status"),
        varchar("cancel_reason"),
        int8("proposal_start"),
        int8("proposal_end"),
        varchar("proposal_by"),
    ]
}

/// Render sessions as a query response; mutations echo the updated row.
fn session_rows(sessions: Vec<Session>) -> Response {
    let schema = Arc::new(sessions_schema());
    let rows: Vec<PgWireResult<_>> = sessions
        .into_iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.id.to_string())?;
            encoder.encode_field(&s.student_id.to_string())?;
            encoder.encode_field(&s.tutor_id.to_string())?;
            encoder.encode_field(&s.subject_id.to_string())?;
            encoder.encode_field(&s.span.start)?;
            encoder.encode_field(&s.span.end)?;
            encoder.encode_field(&s.duration_min)?;
            encoder.encode_field(&s.status.as_str())?;
            encoder.encode_field(&s.cancel_reason)?;
            match &s.proposal {
                Some(p) => {
                    encoder.encode_field(&p.span.start)?;
                    encoder.encode_field(&p.span.end)?;
                    encoder.encode_field(&p.proposed_by.to_string())?;
                }
                None => {
                    encoder.encode_field(&None::<i64>)?;
                    encoder.encode_field(&None::<i64>)?;
                    encoder.encode_field(&None::<String>)?;
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for TutordHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TutordQueryParser;

#[async_trait]
impl QueryParser for TutordQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

/// Result schema by statement shape: slot and session reads return rows, as
/// do the session mutations (they echo the updated row).
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("SESSIONS") || upper.contains("PROPOSALS") {
        sessions_schema()
    } else if upper.contains("SELECT") && upper.contains("AVAILABILITY") {
        availability_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for TutordHandler {
    type Statement = String;
    type QueryParser = TutordQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TutordFactory {
    handler: Arc<TutordHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TutordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TutordFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = TutordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TutordHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TutordFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(TutordFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Client-supplied span endpoints; an inverted pair never reaches `Span`.
fn span_arg(start: Ms, end: Ms) -> PgWireResult<Span> {
    if start >= end {
        return Err(engine_err(EngineError::Validation(
            "start must be before end",
        )));
    }
    Ok(Span::new(start, end))
}

fn engine_err(e: EngineError) -> PgWireError {
    // calendar conflicts are 23P01, commit-time races are retryable 40001
    let code = match &e {
        EngineError::StudentConflict(_) | EngineError::TutorConflict(_) => "23P01",
        EngineError::SlotTaken => "40001",
        EngineError::NotFound(_) => "P0002",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

//! Catalog backend that drives the `sqlcmd` command-line client.
//!
//! Each connection is one interactive `sqlcmd` process. Batches are written
//! to its stdin and terminated by a `PRINT` of a unique sentinel in a
//! separate batch, so the reader knows when a batch is complete even if the
//! first batch aborted. Backend errors are recovered from the `Msg N, Level
//! L, State S` lines sqlcmd prints.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use uuid::Uuid;

use super::{
    CatalogConnection, CatalogTarget, Connector, ParamSpec, ProcedureCall, ProcedureOutcome,
    SqlType, SqlValue,
};
use crate::defaults::CatalogConfig;
use crate::error::{Error, Result};
use crate::log_status;

/// Backend number reported for a client-side timeout.
pub const TIMEOUT_ERROR: i32 = -2;
/// Backend number for a session that died without a recognizable cause.
pub const UNKNOWN_ERROR: i32 = -1;

const NETWORK_ERROR: i32 = 53;
const LOGIN_FAILED: i32 = 18456;
const CONNECTION_RESET: i32 = 10054;

const FIELD_SEPARATOR: char = '\u{1f}';
const NULL_MARKER: char = '\u{1e}';
const BINARY_CHUNK: usize = 32 * 1024;
const OPEN_GRACE: Duration = Duration::from_secs(15);
const QUIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqlcmdSettings {
    pub program: String,
    pub username: Option<String>,
    pub trust_server_certificate: bool,
    pub login_timeout: Duration,
}

impl SqlcmdSettings {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            program: config.sqlcmd_path.clone(),
            username: config.username.clone(),
            trust_server_certificate: config.trust_server_certificate,
            login_timeout: Duration::from_secs(30),
        }
    }
}

pub struct SqlcmdConnector {
    target: CatalogTarget,
    settings: SqlcmdSettings,
}

impl SqlcmdConnector {
    pub fn new(target: CatalogTarget, settings: SqlcmdSettings) -> Self {
        Self { target, settings }
    }
}

impl Connector for SqlcmdConnector {
    fn target(&self) -> &CatalogTarget {
        &self.target
    }

    fn connect(&self) -> Result<Box<dyn CatalogConnection>> {
        Ok(Box::new(SqlcmdConnection::new(
            self.target.clone(),
            self.settings.clone(),
        )))
    }
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

pub struct SqlcmdConnection {
    target: CatalogTarget,
    settings: SqlcmdSettings,
    session: Option<Session>,
}

impl SqlcmdConnection {
    pub fn new(target: CatalogTarget, settings: SqlcmdSettings) -> Self {
        Self {
            target,
            settings,
            session: None,
        }
    }

    fn spawn(&self) -> Result<Session> {
        let mut child = Command::new(&self.settings.program)
            .args(session_args(&self.target, &self.settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::internal_io(
                    format!("Failed to start {}: {}", self.settings.program, e),
                    Some("start sqlcmd".to_string()),
                )
            })?;

        let missing = || Error::internal_unexpected("sqlcmd pipes were not captured");
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let (sender, lines) = mpsc::channel();
        forward_lines(stdout, sender.clone());
        forward_lines(stderr, sender);

        Ok(Session {
            child,
            stdin,
            lines,
        })
    }

    /// Send a batch and collect its output lines up to the sentinel.
    fn run_batch(&mut self, body: &str, timeout: Duration) -> Result<Vec<String>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::catalog_scope_not_open("sqlcmd batch"))?;

        let sentinel = format!("etlpack-done-{}", Uuid::new_v4().simple());
        let script = frame_batch(body, &sentinel);

        let written = session
            .stdin
            .write_all(script.as_bytes())
            .and_then(|_| session.stdin.flush());
        if let Err(e) = written {
            self.abort();
            return Err(Error::catalog_backend(
                CONNECTION_RESET,
                format!("Connection to sqlcmd lost: {}", e),
            ));
        }

        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match session.lines.recv_timeout(remaining) {
                Ok(line) if line.trim() == sentinel => return Ok(collected),
                Ok(line) => collected.push(line),
                Err(RecvTimeoutError::Timeout) => {
                    self.abort();
                    return Err(Error::catalog_backend(
                        TIMEOUT_ERROR,
                        format!("Execution timeout expired after {:?}", timeout),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.abort();
                    let number = classify_failure(&collected);
                    return Err(Error::catalog_backend(number, failure_summary(&collected)));
                }
            }
        }
    }

    fn run_statement(&mut self, statement: &str, timeout: Duration) -> Result<()> {
        let lines = self.run_batch(statement, timeout)?;
        match backend_error(&lines) {
            Some((number, message)) => Err(Error::catalog_backend(number, message)),
            None => Ok(()),
        }
    }

    fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.child.kill();
            let _ = session.child.wait();
        }
    }
}

impl CatalogConnection for SqlcmdConnection {
    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        log_status!(
            "catalog",
            "Connecting to {} ({})",
            self.target.server_instance,
            self.target.catalog
        );
        self.session = Some(self.spawn()?);
        let budget = self.settings.login_timeout + OPEN_GRACE;
        if let Err(err) = self.run_statement("SET NOCOUNT ON;", budget) {
            self.abort();
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Session {
            mut child,
            mut stdin,
            lines,
        } = session;

        let _ = stdin.write_all(b"QUIT\n");
        drop(stdin);
        drop(lines);

        let deadline = Instant::now() + QUIT_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => break,
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.run_statement("BEGIN TRANSACTION;", OPEN_GRACE)
    }

    fn commit(&mut self) -> Result<()> {
        self.run_statement("COMMIT TRANSACTION;", OPEN_GRACE)
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_statement("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;", OPEN_GRACE)
    }

    fn transaction_active(&mut self) -> Result<bool> {
        let marker = format!("etlpack-trancount-{}:", Uuid::new_v4().simple());
        let body = format!(
            "PRINT N'{}' + CAST(@@TRANCOUNT AS nvarchar(10));",
            marker
        );
        let lines = self.run_batch(&body, OPEN_GRACE)?;
        parse_trancount(&lines, &marker)
            .map(|count| count > 0)
            .ok_or_else(|| Error::catalog_backend(UNKNOWN_ERROR, failure_summary(&lines)))
    }

    fn call(&mut self, call: &ProcedureCall, timeout: Duration) -> Result<ProcedureOutcome> {
        let marker = format!("etlpack-out-{}:", Uuid::new_v4().simple());
        let body = render_call(call, &marker);
        let lines = self.run_batch(&body, timeout)?;
        parse_outcome(call, &lines, &marker)
    }
}

impl Drop for SqlcmdConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn session_args(target: &CatalogTarget, settings: &SqlcmdSettings) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        target.server_instance.clone(),
        "-d".to_string(),
        target.catalog.clone(),
        "-l".to_string(),
        settings.login_timeout.as_secs().max(1).to_string(),
        "-f".to_string(),
        "i:65001,o:65001".to_string(),
        "-x".to_string(),
        "-I".to_string(),
    ];
    match &settings.username {
        Some(username) => {
            args.push("-U".to_string());
            args.push(username.clone());
        }
        None => args.push("-E".to_string()),
    }
    if settings.trust_server_certificate {
        args.push("-C".to_string());
    }
    args
}

fn forward_lines<R: Read + Send + 'static>(reader: R, sender: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn frame_batch(body: &str, sentinel: &str) -> String {
    format!("{}\nGO\nPRINT N'{}';\nGO\n", body, sentinel)
}

/// Render a procedure call as a batch that prints its outputs after `marker`.
///
/// Every input is bound through a declared variable so values never appear
/// as parameter expressions, and long binary values are appended in chunks.
pub fn render_call(call: &ProcedureCall, marker: &str) -> String {
    let mut script = String::from("SET NOCOUNT ON;\nDECLARE @etlpack_rc int;\n");

    for (spec, value) in call.inputs() {
        let var = input_var(spec);
        let declared = spec.sql_type.declaration();
        match value {
            SqlValue::Binary(bytes) => {
                script.push_str(&format!("DECLARE {} {} = 0x;\n", var, declared));
                for chunk in bytes.chunks(BINARY_CHUNK) {
                    script.push_str(&format!("SET {0} = {0} + 0x{1};\n", var, hex(chunk)));
                }
            }
            other => script.push_str(&format!(
                "DECLARE {} {} = {};\n",
                var,
                declared,
                literal(other, spec.sql_type)
            )),
        }
    }

    let outputs: Vec<&ParamSpec> = call.signature().outputs().collect();
    for spec in &outputs {
        script.push_str(&format!(
            "DECLARE {} {};\n",
            output_var(spec),
            spec.sql_type.declaration()
        ));
    }

    let arguments: Vec<String> = call
        .signature()
        .params
        .iter()
        .map(|spec| match spec.direction {
            super::Direction::Input => format!("{} = {}", spec.name, input_var(spec)),
            super::Direction::Output => format!("{} = {} OUTPUT", spec.name, output_var(spec)),
        })
        .collect();
    script.push_str(&format!(
        "EXEC @etlpack_rc = {} {};\n",
        call.procedure(),
        arguments.join(", ")
    ));

    let mut fields = vec!["ISNULL(CAST(@etlpack_rc AS nvarchar(20)), N'0')".to_string()];
    for spec in &outputs {
        fields.push(format!(
            "ISNULL(CAST({} AS nvarchar(4000)), NCHAR({}))",
            output_var(spec),
            NULL_MARKER as u32
        ));
    }
    let separator = format!(" + NCHAR({}) + ", FIELD_SEPARATOR as u32);
    script.push_str(&format!(
        "PRINT N'{}' + {};",
        marker,
        fields.join(&separator)
    ));

    script
}

/// Transaction count printed after `marker`.
fn parse_trancount(lines: &[String], marker: &str) -> Option<u32> {
    lines
        .iter()
        .find_map(|line| line.trim().strip_prefix(marker))
        .and_then(|count| count.trim().parse().ok())
}

fn input_var(spec: &ParamSpec) -> String {
    format!("@in_{}", spec.bare_name())
}

fn output_var(spec: &ParamSpec) -> String {
    format!("@out_{}", spec.bare_name())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Quote text as a string expression. Line breaks are emitted as `NCHAR`
/// terms so no script line can be mistaken for a `GO` separator.
fn quote_text(text: &str, unicode: bool) -> String {
    let prefix = if unicode { "N" } else { "" };
    let char_fn = if unicode { "NCHAR" } else { "CHAR" };

    let mut parts = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '\r' | '\n' => {
                parts.push(format!("{}'{}'", prefix, current.replace('\'', "''")));
                current.clear();
                parts.push(format!("{}({})", char_fn, c as u32));
            }
            _ => current.push(c),
        }
    }
    parts.push(format!("{}'{}'", prefix, current.replace('\'', "''")));
    parts.join(" + ")
}

/// T-SQL expression for `value` bound to a parameter of `sql_type`.
pub fn literal(value: &SqlValue, sql_type: SqlType) -> String {
    let variant = sql_type == SqlType::SqlVariant;
    let typed = |plain: String, type_name: &str| {
        if variant {
            format!("CAST({} AS {})", plain, type_name)
        } else {
            plain
        }
    };

    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(text) => quote_text(text, !matches!(sql_type, SqlType::Char(_))),
        SqlValue::Bit(flag) => typed(if *flag { "1" } else { "0" }.to_string(), "bit"),
        SqlValue::TinyInt(v) => typed(v.to_string(), "tinyint"),
        SqlValue::SmallInt(v) => typed(v.to_string(), "smallint"),
        SqlValue::Int(v) => typed(v.to_string(), "int"),
        SqlValue::BigInt(v) => typed(v.to_string(), "bigint"),
        SqlValue::Real(v) => typed(format!("{:E}", v), "real"),
        SqlValue::Float(v) => typed(format!("{:E}", v), "float"),
        SqlValue::Decimal(text) => text.clone(),
        SqlValue::DateTime(text) => format!("CAST({} AS datetime)", quote_text(text, true)),
        SqlValue::Binary(bytes) => format!("0x{}", hex(bytes)),
    }
}

fn message_header() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| Regex::new(r"^Msg (-?\d+), Level (\d+), State (\d+)").ok())
        .as_ref()
}

/// First error-severity message in a batch's output.
pub fn backend_error(lines: &[String]) -> Option<(i32, String)> {
    let header = message_header()?;
    lines.iter().enumerate().find_map(|(index, line)| {
        let captures = header.captures(line.trim())?;
        let number: i32 = captures[1].parse().ok()?;
        let level: u32 = captures[2].parse().ok()?;
        if level <= 10 {
            return None;
        }
        let text = lines
            .get(index + 1)
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        Some((number, text))
    })
}

/// Map the output of a session that ended unexpectedly to a backend number.
pub fn classify_failure(lines: &[String]) -> i32 {
    if let Some((number, _)) = backend_error(lines) {
        return number;
    }
    let text = lines.join("\n");
    if text.contains("Login timeout expired") || text.contains("Query timeout expired") {
        TIMEOUT_ERROR
    } else if text.contains("Login failed") {
        LOGIN_FAILED
    } else if text.contains("network-related")
        || text.contains("TCP Provider")
        || text.contains("Named Pipes Provider")
        || text.contains("server was not found")
    {
        NETWORK_ERROR
    } else {
        UNKNOWN_ERROR
    }
}

fn failure_summary(lines: &[String]) -> String {
    let text: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if text.is_empty() {
        "sqlcmd exited unexpectedly".to_string()
    } else {
        text.join(" ")
    }
}

/// Interpret a call's output lines: backend error or printed outputs.
pub fn parse_outcome(call: &ProcedureCall, lines: &[String], marker: &str) -> Result<ProcedureOutcome> {
    if let Some((number, message)) = backend_error(lines) {
        return Err(Error::catalog_backend(number, message));
    }

    let printed = lines
        .iter()
        .find_map(|line| line.trim().strip_prefix(marker))
        .ok_or_else(|| {
            Error::internal_unexpected(format!("{} returned no result line", call.procedure()))
        })?;

    let mut fields = printed.split(FIELD_SEPARATOR);
    let return_code = fields
        .next()
        .and_then(|rc| rc.trim().parse::<i32>().ok())
        .ok_or_else(|| {
            Error::internal_unexpected(format!(
                "{} returned an unreadable return code",
                call.procedure()
            ))
        })?;

    let mut outcome = ProcedureOutcome {
        return_code,
        ..Default::default()
    };
    for spec in call.signature().outputs() {
        let raw = fields.next().unwrap_or_default();
        let value = parse_output(spec, raw).ok_or_else(|| {
            Error::internal_unexpected(format!(
                "{} returned unreadable {} '{}'",
                call.procedure(),
                spec.name,
                raw
            ))
        })?;
        outcome.outputs.insert(spec.name.to_string(), value);
    }

    Ok(outcome)
}

fn parse_output(spec: &ParamSpec, raw: &str) -> Option<SqlValue> {
    if raw.starts_with(NULL_MARKER) {
        return Some(SqlValue::Null);
    }
    let trimmed = raw.trim();
    match spec.sql_type {
        SqlType::BigInt => trimmed.parse().ok().map(SqlValue::BigInt),
        SqlType::Int => trimmed.parse().ok().map(SqlValue::Int),
        SqlType::SmallInt => trimmed.parse().ok().map(SqlValue::SmallInt),
        SqlType::Bit => match trimmed {
            "1" => Some(SqlValue::Bit(true)),
            "0" => Some(SqlValue::Bit(false)),
            _ => None,
        },
        _ => Some(SqlValue::Text(raw.to_string())),
    }
}

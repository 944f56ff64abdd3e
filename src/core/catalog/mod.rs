//! Remote catalog procedures: typed schema, connections, scopes and the
//! retrying executor.
//!
//! - `procedures` - the four catalog procedure signatures and typed wrappers
//! - `scope` - connection plus optional transaction owned by one run
//! - `executor` - generic retrying invocation of any signature
//! - `sqlcmd` - backend that drives the `sqlcmd` client

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

pub mod executor;
pub mod procedures;
pub mod scope;
pub mod sqlcmd;

pub use executor::CatalogExecutor;
pub use scope::ExecutionScope;

/// Default catalog database name.
pub const DEFAULT_CATALOG: &str = "SSISDB";

/// Where catalog connections go. Carried explicitly by each connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTarget {
    pub server_instance: String,
    pub catalog: String,
}

impl CatalogTarget {
    pub fn new(server_instance: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            server_instance: server_instance.into(),
            catalog: catalog.into(),
        }
    }
}

/// Backend column types used by catalog procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    NVarChar(u16),
    Char(u16),
    BigInt,
    Int,
    SmallInt,
    Bit,
    VarBinaryMax,
    SqlVariant,
}

impl SqlType {
    /// Type as written in a variable declaration.
    pub fn declaration(&self) -> String {
        match self {
            SqlType::NVarChar(width) => format!("nvarchar({})", width),
            SqlType::Char(width) => format!("char({})", width),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Int => "int".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Bit => "bit".to_string(),
            SqlType::VarBinaryMax => "varbinary(max)".to_string(),
            SqlType::SqlVariant => "sql_variant".to_string(),
        }
    }

    fn accepts(&self, value: &SqlValue) -> bool {
        match (self, value) {
            (_, SqlValue::Null) => true,
            (SqlType::NVarChar(_) | SqlType::Char(_), SqlValue::Text(_)) => true,
            (SqlType::BigInt, SqlValue::BigInt(_)) => true,
            (SqlType::Int, SqlValue::Int(_)) => true,
            (SqlType::SmallInt, SqlValue::SmallInt(_)) => true,
            (SqlType::Bit, SqlValue::Bit(_)) => true,
            (SqlType::VarBinaryMax, SqlValue::Binary(_)) => true,
            (SqlType::SqlVariant, SqlValue::Binary(_)) => false,
            (SqlType::SqlVariant, _) => true,
            _ => false,
        }
    }

    fn max_chars(&self) -> Option<usize> {
        match self {
            SqlType::NVarChar(width) | SqlType::Char(width) => Some(*width as usize),
            _ => None,
        }
    }
}

/// A value bound to a procedure parameter.
#[derive(Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Bit(bool),
    TinyInt(u8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Float(f64),
    /// Exact numeric kept in its textual form.
    Decimal(String),
    /// ISO-8601 timestamp text.
    DateTime(String),
    Binary(Vec<u8>),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::TinyInt(v) => Some(i64::from(*v)),
            SqlValue::SmallInt(v) => Some(i64::from(*v)),
            SqlValue::Int(v) => Some(i64::from(*v)),
            SqlValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Debug for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("Null"),
            SqlValue::Text(v) => f.debug_tuple("Text").field(v).finish(),
            SqlValue::Bit(v) => f.debug_tuple("Bit").field(v).finish(),
            SqlValue::TinyInt(v) => f.debug_tuple("TinyInt").field(v).finish(),
            SqlValue::SmallInt(v) => f.debug_tuple("SmallInt").field(v).finish(),
            SqlValue::Int(v) => f.debug_tuple("Int").field(v).finish(),
            SqlValue::BigInt(v) => f.debug_tuple("BigInt").field(v).finish(),
            SqlValue::Real(v) => f.debug_tuple("Real").field(v).finish(),
            SqlValue::Float(v) => f.debug_tuple("Float").field(v).finish(),
            SqlValue::Decimal(v) => f.debug_tuple("Decimal").field(v).finish(),
            SqlValue::DateTime(v) => f.debug_tuple("DateTime").field(v).finish(),
            SqlValue::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One declared procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub direction: Direction,
    pub sql_type: SqlType,
}

impl ParamSpec {
    pub const fn input(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            direction: Direction::Input,
            sql_type,
        }
    }

    pub const fn output(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            direction: Direction::Output,
            sql_type,
        }
    }

    /// Parameter name without the leading `@`.
    pub fn bare_name(&self) -> &'static str {
        self.name.trim_start_matches('@')
    }
}

/// Name and ordered parameter list of a stored procedure.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcedureSignature {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
}

impl ProcedureSignature {
    pub fn inputs(&self) -> impl Iterator<Item = &'static ParamSpec> {
        self.params
            .iter()
            .filter(|p| p.direction == Direction::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &'static ParamSpec> {
        self.params
            .iter()
            .filter(|p| p.direction == Direction::Output)
    }
}

/// A signature with every input bound, checked against declared types and widths.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    signature: &'static ProcedureSignature,
    inputs: Vec<(&'static ParamSpec, SqlValue)>,
}

impl ProcedureCall {
    pub fn new(
        signature: &'static ProcedureSignature,
        values: Vec<(&str, SqlValue)>,
    ) -> Result<Self> {
        let mut values: BTreeMap<&str, SqlValue> = values.into_iter().collect();

        let mut inputs = Vec::new();
        for spec in signature.inputs() {
            let value = values.remove(spec.name).ok_or_else(|| {
                Error::internal_unexpected(format!(
                    "{} called without {}",
                    signature.name, spec.name
                ))
            })?;

            if !spec.sql_type.accepts(&value) {
                return Err(Error::internal_unexpected(format!(
                    "{} cannot bind {:?} to {} {}",
                    signature.name,
                    value,
                    spec.name,
                    spec.sql_type.declaration()
                )));
            }

            if let (Some(max), SqlValue::Text(text)) = (spec.sql_type.max_chars(), &value) {
                let len = text.chars().count();
                if len > max {
                    return Err(Error::validation_invalid_argument(
                        spec.bare_name(),
                        format!(
                            "Value for {} is {} characters; the catalog accepts at most {}",
                            spec.name, len, max
                        ),
                        Some(text.clone()),
                        None,
                    ));
                }
            }

            inputs.push((spec, value));
        }

        if let Some(extra) = values.keys().next() {
            return Err(Error::internal_unexpected(format!(
                "{} has no input parameter {}",
                signature.name, extra
            )));
        }

        Ok(Self { signature, inputs })
    }

    pub fn procedure(&self) -> &'static str {
        self.signature.name
    }

    pub fn signature(&self) -> &'static ProcedureSignature {
        self.signature
    }

    /// Bound inputs in declaration order.
    pub fn inputs(&self) -> &[(&'static ParamSpec, SqlValue)] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&SqlValue> {
        self.inputs
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, value)| value)
    }
}

/// Output parameter values and the procedure's return code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureOutcome {
    pub outputs: BTreeMap<String, SqlValue>,
    pub return_code: i32,
}

impl ProcedureOutcome {
    pub fn output_i64(&self, name: &str) -> Option<i64> {
        self.outputs.get(name).and_then(SqlValue::as_i64)
    }
}

/// A session with the catalog database.
pub trait CatalogConnection {
    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether the server still holds an open transaction for this session.
    /// Some failures (deadlock victims, severe errors) roll it back server side.
    fn transaction_active(&mut self) -> Result<bool>;

    fn call(&mut self, call: &ProcedureCall, timeout: Duration) -> Result<ProcedureOutcome>;
}

/// Produces unopened connections to one target.
pub trait Connector {
    fn target(&self) -> &CatalogTarget;

    fn connect(&self) -> Result<Box<dyn CatalogConnection>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend shared by catalog and deploy tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Open,
        Close,
        Begin,
        Commit,
        Rollback,
        Call(String, Vec<(String, SqlValue)>),
    }

    /// What a scripted failure does to the session besides raising an error.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Aftermath {
        /// Statement-level error; the transaction stays open.
        None,
        /// The server rolls the transaction back, as for a deadlock victim.
        AbortTransaction,
        /// The session is gone, as after a timeout or a reset connection.
        Disconnect,
    }

    #[derive(Debug, Default)]
    pub struct Script {
        pub events: Vec<Event>,
        /// Error numbers to fail successive calls with, popped per call.
        pub failures: VecDeque<(String, i32, Aftermath)>,
        pub open_failures: VecDeque<i32>,
        pub next_id: i64,
        /// Server-side `@@TRANCOUNT`.
        pub trancount: u32,
    }

    #[derive(Clone, Default)]
    pub struct FakeBackend {
        pub script: Rc<RefCell<Script>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next call to `procedure` with backend error `number`.
        pub fn fail_next(&self, procedure: &str, number: i32) {
            self.fail_next_with(procedure, number, Aftermath::None);
        }

        pub fn fail_next_with(&self, procedure: &str, number: i32, aftermath: Aftermath) {
            self.script
                .borrow_mut()
                .failures
                .push_back((procedure.to_string(), number, aftermath));
        }

        pub fn fail_next_open(&self, number: i32) {
            self.script.borrow_mut().open_failures.push_back(number);
        }

        pub fn events(&self) -> Vec<Event> {
            self.script.borrow().events.clone()
        }

        pub fn calls_to(&self, procedure: &str) -> Vec<Vec<(String, SqlValue)>> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Call(name, inputs) if name == procedure => Some(inputs),
                    _ => None,
                })
                .collect()
        }

        pub fn connection(&self) -> FakeConnection {
            FakeConnection {
                script: Rc::clone(&self.script),
                open: false,
            }
        }
    }

    pub struct FakeConnection {
        script: Rc<RefCell<Script>>,
        open: bool,
    }

    impl CatalogConnection for FakeConnection {
        fn is_open(&self) -> bool {
            self.open
        }

        fn open(&mut self) -> Result<()> {
            let mut script = self.script.borrow_mut();
            script.events.push(Event::Open);
            if let Some(number) = script.open_failures.pop_front() {
                return Err(Error::catalog_backend(number, "cannot connect"));
            }
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.script.borrow_mut().events.push(Event::Close);
            }
            self.open = false;
        }

        fn begin_transaction(&mut self) -> Result<()> {
            let mut script = self.script.borrow_mut();
            script.events.push(Event::Begin);
            script.trancount += 1;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            let mut script = self.script.borrow_mut();
            script.events.push(Event::Commit);
            if script.trancount == 0 {
                return Err(Error::catalog_backend(
                    3902,
                    "The COMMIT TRANSACTION request has no corresponding BEGIN TRANSACTION.",
                ));
            }
            script.trancount -= 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            let mut script = self.script.borrow_mut();
            script.events.push(Event::Rollback);
            script.trancount = 0;
            Ok(())
        }

        fn transaction_active(&mut self) -> Result<bool> {
            Ok(self.script.borrow().trancount > 0)
        }

        fn call(&mut self, call: &ProcedureCall, _timeout: Duration) -> Result<ProcedureOutcome> {
            let mut script = self.script.borrow_mut();
            let inputs = call
                .inputs()
                .iter()
                .map(|(spec, value)| (spec.name.to_string(), value.clone()))
                .collect();
            script
                .events
                .push(Event::Call(call.procedure().to_string(), inputs));

            let position = script
                .failures
                .iter()
                .position(|(procedure, _, _)| procedure == call.procedure());
            if let Some(index) = position {
                if let Some((_, number, aftermath)) = script.failures.remove(index) {
                    match aftermath {
                        Aftermath::None => {}
                        Aftermath::AbortTransaction => script.trancount = 0,
                        Aftermath::Disconnect => {
                            script.trancount = 0;
                            self.open = false;
                        }
                    }
                    return Err(Error::catalog_backend(number, "scripted failure"));
                }
            }

            script.next_id += 1;
            let outputs = call
                .signature()
                .outputs()
                .map(|spec| (spec.name.to_string(), SqlValue::BigInt(script.next_id)))
                .collect();
            Ok(ProcedureOutcome {
                outputs,
                return_code: 0,
            })
        }
    }

    impl Connector for FakeBackend {
        fn target(&self) -> &CatalogTarget {
            static TARGET: std::sync::OnceLock<CatalogTarget> = std::sync::OnceLock::new();
            TARGET.get_or_init(|| CatalogTarget::new("fake", DEFAULT_CATALOG))
        }

        fn connect(&self) -> Result<Box<dyn CatalogConnection>> {
            Ok(Box::new(self.connection()))
        }
    }
}

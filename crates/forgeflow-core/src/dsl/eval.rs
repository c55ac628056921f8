//! Sandboxed tree-walking evaluator for the workflow dialect.
//!
//! The global namespace is deny-by-default: only the declarative builtins
//! listed in `call_builtin` exist. Context accessors (`file`, `secret`,
//! `input`) return deterministic placeholder tokens that the executor
//! resolves at run time; during planning no real value is ever read.
//! Recognized ambient-authority constructs are rejected by name so the
//! error explains itself; everything else fails as an unknown function.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use forgeflow_types::error::{EvaluationError, ValidationError};
use forgeflow_types::plan::{Plan, StepConfig, StepDefinition, TriggerConfig};
use forgeflow_types::schema::Schema;
use forgeflow_types::worker::SandboxOverrides;

use super::lexer::Span;
use super::parser::{self, Expr, ExprKind, Stmt, WorkflowDecl};
use crate::graph;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to turn one source unit into plans.
#[derive(Debug, thiserror::Error)]
pub enum DslError {
    /// Lexer/parser/interpreter rejection, with source position.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// The registered steps of `workflow` fail DAG-shape validation.
    #[error("workflow '{workflow}': {error}")]
    Validation {
        workflow: String,
        error: ValidationError,
    },
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Runtime values of the dialect. `Schema` is first-class so `inputs`,
/// `outputs`, and per-step `output_schema` compose from the constructors.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
    Schema(Schema),
    Unit,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Schema(_) => "schema",
            Value::Unit => "unit",
        }
    }
}

/// Constructs that exist in general-purpose scripting hosts but are denied
/// here. Named explicitly so the rejection can say what was attempted.
const FORBIDDEN: &[&str] = &[
    "import", "require", "include", "eval", "exec", "spawn", "system", "subprocess", "open",
    "read", "write", "fetch", "http", "request", "connect", "now", "time", "today", "random",
    "rand", "getenv", "env",
];

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Evaluate one source unit into validated plans.
///
/// Every workflow in the unit registers under its own name; a duplicate
/// name is a registration error, not a silent overwrite. All plans from a
/// unit share the content hash of its canonicalized bytes.
pub fn evaluate_source(repository: &str, path: &str, source: &str) -> Result<Vec<Plan>, DslError> {
    let ast = parser::parse(source).map_err(|e| at(path, e.span, e.message))?;
    let hash = super::content_hash(source);

    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut plans = Vec::with_capacity(ast.workflows.len());
    for decl in &ast.workflows {
        if !seen_names.insert(decl.name.as_str()) {
            return Err(at(
                path,
                decl.span,
                format!("workflow '{}' is already registered in this file", decl.name),
            )
            .into());
        }
        let collected = evaluate_workflow(path, decl)?;

        graph::validate(&collected.steps).map_err(|error| DslError::Validation {
            workflow: decl.name.clone(),
            error,
        })?;

        plans.push(Plan {
            content_hash: hash.clone(),
            name: decl.name.clone(),
            repository: repository.to_string(),
            source_path: path.to_string(),
            steps: collected.steps,
            triggers: collected.triggers,
            input_schema: collected.input_schema,
            output_schema: collected.output_schema,
            parsed_at: Utc::now(),
        });
    }
    Ok(plans)
}

fn at(file: &str, span: Span, message: impl Into<String>) -> EvaluationError {
    EvaluationError::new(file, span.line, span.column, message)
}

// ---------------------------------------------------------------------------
// Workflow evaluation
// ---------------------------------------------------------------------------

/// What one workflow body registers.
#[derive(Default)]
struct Collected {
    steps: Vec<StepDefinition>,
    triggers: Vec<TriggerConfig>,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
}

struct Interp<'a> {
    file: &'a str,
    bindings: HashMap<String, Value>,
    collected: Collected,
}

fn evaluate_workflow(file: &str, decl: &WorkflowDecl) -> Result<Collected, EvaluationError> {
    let mut interp = Interp {
        file,
        bindings: HashMap::new(),
        collected: Collected::default(),
    };
    for stmt in &decl.body {
        match stmt {
            Stmt::Let { name, span, value } => {
                if FORBIDDEN.contains(&name.as_str()) {
                    return Err(interp.fail(*span, format!("'{name}' cannot be used as a binding name")));
                }
                let value = interp.eval(value)?;
                interp.bindings.insert(name.clone(), value);
            }
            Stmt::Expr(expr) => {
                interp.eval(expr)?;
            }
        }
    }
    Ok(interp.collected)
}

impl Interp<'_> {
    fn fail(&self, span: Span, message: impl Into<String>) -> EvaluationError {
        at(self.file, span, message)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvaluationError> {
        match &expr.kind {
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Ident(name) => match self.bindings.get(name) {
                Some(value) => Ok(value.clone()),
                None => Err(self.fail(expr.span, format!("unbound identifier '{name}'"))),
            },
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            ExprKind::Map(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                let mut seen = HashSet::new();
                for (key, value) in entries {
                    if !seen.insert(key.as_str()) {
                        return Err(self.fail(value.span, format!("duplicate map key '{key}'")));
                    }
                    values.push((key.clone(), self.eval(value)?));
                }
                Ok(Value::Map(values))
            }
            ExprKind::Call { name, args } => self.call(expr.span, name, args),
        }
    }

    fn call(&mut self, span: Span, name: &str, args: &[Expr]) -> Result<Value, EvaluationError> {
        if FORBIDDEN.contains(&name) {
            return Err(self.fail(
                span,
                format!(
                    "forbidden construct '{name}': workflow definitions are deterministic and perform no I/O"
                ),
            ));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push((self.eval(arg)?, arg.span));
        }

        match name {
            "step" => self.builtin_step(span, &values),
            "parallel" => self.builtin_parallel(span, &values),
            "trigger" => self.builtin_trigger(span, &values),
            "inputs" => self.builtin_io_schema(span, &values, true),
            "outputs" => self.builtin_io_schema(span, &values, false),
            // Schema constructors
            "string" => self.no_args(span, name, &values).map(|_| Value::Schema(Schema::string())),
            "integer" => self.no_args(span, name, &values).map(|_| Value::Schema(Schema::integer())),
            "boolean" => self.no_args(span, name, &values).map(|_| Value::Schema(Schema::boolean())),
            "enum" => self.builtin_enum(span, &values),
            "list" => {
                let inner = self.one_schema_arg(span, name, &values)?;
                Ok(Value::Schema(Schema::list(inner)))
            }
            "optional" => {
                let inner = self.one_schema_arg(span, name, &values)?;
                Ok(Value::Schema(Schema::optional(inner)))
            }
            "object" => {
                let fields = self.schema_map_arg(span, name, &values)?;
                Ok(Value::Schema(Schema::Object { fields }))
            }
            // Context accessors: deterministic placeholder tokens only
            "file" => self.placeholder(span, "file", &values),
            "secret" => self.placeholder(span, "secret", &values),
            "input" => self.placeholder(span, "input", &values),
            other => Err(self.fail(span, format!("unknown function '{other}'"))),
        }
    }

    // -- builtin implementations -------------------------------------------

    fn builtin_step(&mut self, span: Span, args: &[(Value, Span)]) -> Result<Value, EvaluationError> {
        if args.len() < 3 || args.len() > 4 {
            return Err(self.fail(span, "step(id, kind, config, depends_on?) takes 3 or 4 arguments"));
        }
        let id = self.str_arg(&args[0], "step id")?;
        let kind = self.str_arg(&args[1], "step kind")?;
        let mut config = self.map_arg(&args[2], "step config")?;
        let depends_on = match args.get(3) {
            Some(arg) => self.str_list_arg(arg, "depends_on")?,
            None => vec![],
        };

        let timeout_secs = self.take_int_opt(&mut config, "timeout_secs", args[2].1)?;
        let output_schema = self.take_schema_opt(&mut config, "output_schema", args[2].1)?;
        let requires = self.take_str_list_opt(&mut config, "requires", args[2].1)?.unwrap_or_default();
        let sandbox = self.take_sandbox_opt(&mut config, args[2].1)?;

        let step_config = match kind.as_str() {
            "shell" => {
                let command = self.take_str(&mut config, "command", args[2].1)?;
                let env = self
                    .take_str_map_opt(&mut config, "env", args[2].1)?
                    .unwrap_or_default();
                StepConfig::Shell { command, env }
            }
            "llm_agent" => {
                let prompt = self.take_str(&mut config, "prompt", args[2].1)?;
                let model = self.take_str_opt(&mut config, "model", args[2].1)?;
                StepConfig::LlmAgent { prompt, model }
            }
            other => {
                return Err(self.fail(
                    args[1].1,
                    format!("unknown step kind '{other}' (expected \"shell\" or \"llm_agent\")"),
                ));
            }
        };
        self.reject_leftovers(&config, args[2].1, "step config")?;

        let kind = step_config.kind();
        self.collected.steps.push(StepDefinition {
            id,
            kind,
            config: step_config,
            depends_on,
            timeout_secs,
            output_schema,
            requires,
            sandbox,
        });
        Ok(Value::Unit)
    }

    fn builtin_parallel(&mut self, span: Span, args: &[(Value, Span)]) -> Result<Value, EvaluationError> {
        if args.len() < 2 || args.len() > 3 {
            return Err(self.fail(span, "parallel(id, members, options?) takes 2 or 3 arguments"));
        }
        let id = self.str_arg(&args[0], "group id")?;
        let members = self.str_list_arg(&args[1], "group members")?;
        let mut options = match args.get(2) {
            Some(arg) => self.map_arg(arg, "group options")?,
            None => vec![],
        };
        let options_span = args.get(2).map(|a| a.1).unwrap_or(span);

        let max_concurrent = self
            .take_int_opt(&mut options, "max_concurrent", options_span)?
            .map(|n| n as u32);
        let depends_on = self
            .take_str_list_opt(&mut options, "depends_on", options_span)?
            .unwrap_or_default();
        let timeout_secs = self.take_int_opt(&mut options, "timeout_secs", options_span)?;
        self.reject_leftovers(&options, options_span, "group options")?;

        self.collected.steps.push(StepDefinition {
            id,
            kind: forgeflow_types::plan::StepKind::ParallelGroup,
            config: StepConfig::ParallelGroup { members, max_concurrent },
            depends_on,
            timeout_secs,
            output_schema: None,
            requires: vec![],
            sandbox: None,
        });
        Ok(Value::Unit)
    }

    fn builtin_trigger(&mut self, span: Span, args: &[(Value, Span)]) -> Result<Value, EvaluationError> {
        if args.is_empty() || args.len() > 2 {
            return Err(self.fail(span, "trigger(kind, options?) takes 1 or 2 arguments"));
        }
        let kind = self.str_arg(&args[0], "trigger kind")?;
        let mut options = match args.get(1) {
            Some(arg) => self.map_arg(arg, "trigger options")?,
            None => vec![],
        };
        let options_span = args.get(1).map(|a| a.1).unwrap_or(span);

        let trigger = match kind.as_str() {
            "manual" => TriggerConfig::Manual,
            "push" => TriggerConfig::Push {
                branches: self
                    .take_str_list_opt(&mut options, "branches", options_span)?
                    .unwrap_or_default(),
            },
            "cron" => TriggerConfig::Cron {
                schedule: self.take_str(&mut options, "schedule", options_span)?,
            },
            "webhook" => TriggerConfig::Webhook {
                path: self.take_str(&mut options, "path", options_span)?,
            },
            other => {
                return Err(self.fail(args[0].1, format!("unknown trigger kind '{other}'")));
            }
        };
        self.reject_leftovers(&options, options_span, "trigger options")?;
        self.collected.triggers.push(trigger);
        Ok(Value::Unit)
    }

    fn builtin_io_schema(
        &mut self,
        span: Span,
        args: &[(Value, Span)],
        is_input: bool,
    ) -> Result<Value, EvaluationError> {
        let name = if is_input { "inputs" } else { "outputs" };
        if args.len() != 1 {
            return Err(self.fail(span, format!("{name}({{...}}) takes exactly 1 argument")));
        }
        let fields = self.schema_map_arg(span, name, args)?;
        let slot = if is_input {
            &mut self.collected.input_schema
        } else {
            &mut self.collected.output_schema
        };
        if slot.is_some() {
            return Err(self.fail(span, format!("{name} is already declared for this workflow")));
        }
        *slot = Some(Schema::Object { fields });
        Ok(Value::Unit)
    }

    fn builtin_enum(&mut self, span: Span, args: &[(Value, Span)]) -> Result<Value, EvaluationError> {
        if args.is_empty() {
            return Err(self.fail(span, "enum(...) needs at least one variant"));
        }
        let mut variants = Vec::with_capacity(args.len());
        for arg in args {
            variants.push(self.str_arg(arg, "enum variant")?);
        }
        Ok(Value::Schema(Schema::enumeration(variants)))
    }

    fn placeholder(&self, span: Span, kind: &str, args: &[(Value, Span)]) -> Result<Value, EvaluationError> {
        if args.len() != 1 {
            return Err(self.fail(span, format!("{kind}(name) takes exactly 1 argument")));
        }
        let name = self.str_arg(&args[0], "accessor argument")?;
        Ok(Value::Str(format!("${{{{{kind}:{name}}}}}")))
    }

    // -- argument helpers ---------------------------------------------------

    fn no_args(&self, span: Span, name: &str, args: &[(Value, Span)]) -> Result<(), EvaluationError> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(self.fail(span, format!("{name}() takes no arguments")))
        }
    }

    fn str_arg(&self, arg: &(Value, Span), what: &str) -> Result<String, EvaluationError> {
        match &arg.0 {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.fail(arg.1, format!("{what} must be a string, got {}", other.type_name()))),
        }
    }

    fn map_arg(&self, arg: &(Value, Span), what: &str) -> Result<Vec<(String, Value)>, EvaluationError> {
        match &arg.0 {
            Value::Map(entries) => Ok(entries.clone()),
            other => Err(self.fail(arg.1, format!("{what} must be a map, got {}", other.type_name()))),
        }
    }

    fn str_list_arg(&self, arg: &(Value, Span), what: &str) -> Result<Vec<String>, EvaluationError> {
        match &arg.0 {
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s.clone()),
                    other => Err(self.fail(
                        arg.1,
                        format!("{what} must be a list of strings, got {}", other.type_name()),
                    )),
                })
                .collect(),
            other => Err(self.fail(arg.1, format!("{what} must be a list, got {}", other.type_name()))),
        }
    }

    fn one_schema_arg(&self, span: Span, name: &str, args: &[(Value, Span)]) -> Result<Schema, EvaluationError> {
        match args {
            [(Value::Schema(schema), _)] => Ok(schema.clone()),
            [(other, arg_span)] => Err(self.fail(
                *arg_span,
                format!("{name}(...) expects a schema, got {}", other.type_name()),
            )),
            _ => Err(self.fail(span, format!("{name}(...) takes exactly 1 argument"))),
        }
    }

    fn schema_map_arg(
        &self,
        span: Span,
        name: &str,
        args: &[(Value, Span)],
    ) -> Result<BTreeMap<String, Schema>, EvaluationError> {
        let entries = match args {
            [arg] => self.map_arg(arg, name)?,
            _ => return Err(self.fail(span, format!("{name}({{...}}) takes exactly 1 argument"))),
        };
        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            match value {
                Value::Schema(schema) => {
                    fields.insert(key, schema);
                }
                other => {
                    return Err(self.fail(
                        args[0].1,
                        format!("field '{key}' must be a schema, got {}", other.type_name()),
                    ));
                }
            }
        }
        Ok(fields)
    }

    /// Remove `key` from a config map, expecting a string value.
    fn take_str(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<String, EvaluationError> {
        self.take_str_opt(config, key, span)?
            .ok_or_else(|| self.fail(span, format!("missing required key '{key}'")))
    }

    fn take(&self, config: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
        let pos = config.iter().position(|(k, _)| k == key)?;
        Some(config.remove(pos).1)
    }

    fn take_str_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<Option<String>, EvaluationError> {
        match self.take(config, key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(self.fail(span, format!("'{key}' must be a string, got {}", other.type_name()))),
        }
    }

    fn take_int_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<Option<u64>, EvaluationError> {
        match self.take(config, key) {
            None => Ok(None),
            Some(Value::Int(i)) if i > 0 => Ok(Some(i as u64)),
            Some(Value::Int(i)) => Err(self.fail(span, format!("'{key}' must be positive, got {i}"))),
            Some(other) => Err(self.fail(span, format!("'{key}' must be an integer, got {}", other.type_name()))),
        }
    }

    fn take_schema_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<Option<Schema>, EvaluationError> {
        match self.take(config, key) {
            None => Ok(None),
            Some(Value::Schema(schema)) => Ok(Some(schema)),
            Some(other) => Err(self.fail(span, format!("'{key}' must be a schema, got {}", other.type_name()))),
        }
    }

    fn take_str_list_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<Option<Vec<String>>, EvaluationError> {
        match self.take(config, key) {
            None => Ok(None),
            Some(value) => self.str_list_arg(&(value, span), key).map(Some),
        }
    }

    fn take_str_map_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        key: &str,
        span: Span,
    ) -> Result<Option<HashMap<String, String>>, EvaluationError> {
        match self.take(config, key) {
            None => Ok(None),
            Some(Value::Map(entries)) => {
                let mut map = HashMap::with_capacity(entries.len());
                for (k, v) in entries {
                    match v {
                        Value::Str(s) => {
                            map.insert(k, s);
                        }
                        other => {
                            return Err(self.fail(
                                span,
                                format!("'{key}.{k}' must be a string, got {}", other.type_name()),
                            ));
                        }
                    }
                }
                Ok(Some(map))
            }
            Some(other) => Err(self.fail(span, format!("'{key}' must be a map, got {}", other.type_name()))),
        }
    }

    fn take_sandbox_opt(
        &self,
        config: &mut Vec<(String, Value)>,
        span: Span,
    ) -> Result<Option<SandboxOverrides>, EvaluationError> {
        let Some(value) = self.take(config, "sandbox") else {
            return Ok(None);
        };
        let mut entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(self.fail(span, format!("'sandbox' must be a map, got {}", other.type_name())));
            }
        };
        let overrides = SandboxOverrides {
            cpu_millis: self.take_int_opt(&mut entries, "cpu_millis", span)?.map(|n| n as u32),
            memory_mb: self.take_int_opt(&mut entries, "memory_mb", span)?.map(|n| n as u32),
            disk_mb: self.take_int_opt(&mut entries, "disk_mb", span)?.map(|n| n as u32),
            allowed_hosts: self
                .take_str_list_opt(&mut entries, "allowed_hosts", span)?
                .unwrap_or_default(),
        };
        self.reject_leftovers(&entries, span, "sandbox")?;
        Ok(Some(overrides))
    }

    fn reject_leftovers(
        &self,
        config: &[(String, Value)],
        span: Span,
        what: &str,
    ) -> Result<(), EvaluationError> {
        if let Some((key, _)) = config.first() {
            return Err(self.fail(span, format!("unknown {what} key '{key}'")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

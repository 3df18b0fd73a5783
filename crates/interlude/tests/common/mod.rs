//! A small scripted sandbox used by the integration tests.
//!
//! It interprets a modest subset of the sandboxed language directly over the
//! ruff AST: assignments, `print`, imports, functions, `if`/`for`/`while`,
//! `with open(...)` and simple arithmetic. Continuations pause at top-level
//! statement granularity: a statement that hits `__suspend__` is re-evaluated on
//! resume, with the values supplied so far answering the earlier calls and
//! output held back until the replay passes the last of them.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use interlude::{
    Continuation, Environment, Exception, FetchError, FrameRecord, Host, LineEvent, LineTracer, OutputStream,
    Progress, Sandbox, SandboxError, SuspendedFrame, TraceControl, TraceExit, Value, VirtualFile,
};
use ruff_python_ast::{self as ast, CmpOp, Expr, Number, Operator, Stmt, UnaryOp};
use ruff_python_parser::parse_module;
use ruff_text_size::Ranged;

pub const FAKE_FIGURE: &str = "data:image/png;base64,ZmFrZQ==";

const MODULE: &str = "<module>";
const LOOP_LIMIT: usize = 10_000;

/// Shared, clonable event log so tests can inspect a sandbox moved into an engine or worker.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Interpreter state shared by every run: loaded modules, functions, figure, open files.
#[derive(Debug, Default)]
struct Runtime {
    installed: HashSet<String>,
    loaded: HashSet<String>,
    functions: HashMap<String, ast::StmtFunctionDef>,
    figure: bool,
    files: HashMap<u64, VirtualFile>,
    next_file: u64,
    /// Iterations after which a `while` loop fails; `None` lets it spin until interrupted.
    loop_limit: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    runtime: Runtime,
    fetchable: HashSet<String>,
    hanging: HashSet<String>,
    log: EventLog,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        let mut sandbox = Self::default();
        sandbox.runtime.installed.insert("math".to_owned());
        sandbox.runtime.loop_limit = Some(LOOP_LIMIT);
        sandbox
    }

    /// Lets `while` loops run until the engine interrupts them.
    pub fn without_loop_limit(mut self) -> Self {
        self.runtime.loop_limit = None;
        self
    }

    /// Modules that can be fetched on demand.
    pub fn with_fetchable(mut self, names: &[&str]) -> Self {
        self.fetchable.extend(names.iter().map(|name| (*name).to_owned()));
        self
    }

    /// Modules whose fetch never completes.
    pub fn with_hanging(mut self, names: &[&str]) -> Self {
        self.hanging.extend(names.iter().map(|name| (*name).to_owned()));
        self
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn has_figure(&self) -> bool {
        self.runtime.figure
    }

    fn interp<'r, 't>(&'r mut self, source: &str, globals: Environment, host: &'r mut dyn Host) -> Interp<'r, 't> {
        Interp {
            runtime: &mut self.runtime,
            host,
            tracer: None,
            line_starts: line_starts(source),
            globals,
            frames: Vec::new(),
            chain: vec![FrameRecord {
                function: MODULE.to_owned(),
                line: 0,
                depth: 0,
            }],
            supplied: None,
            used: 0,
        }
    }

    fn run_continuation(&mut self, mut state: Paused, host: &mut dyn Host) -> Result<Progress<Paused>, SandboxError> {
        while state.index < state.body.len() {
            let stmt = state.body[state.index].clone();
            let globals = std::mem::take(&mut state.globals);
            let mut interp = self.interp(&state.source, globals, host);
            interp.supplied = Some(std::mem::take(&mut state.supplied));
            let result = interp.exec_stmt(&stmt);
            state.globals = interp.globals;
            let supplied = interp.supplied.unwrap_or_default();
            match result {
                Ok(()) => state.index += 1,
                Err(Flow::Pause(args)) => {
                    state.supplied = supplied;
                    return Ok(Progress::Suspended {
                        args,
                        bindings: state.globals.clone(),
                        paused: state,
                    });
                }
                Err(flow) => return Err(flow.into_error()),
            }
        }
        Ok(Progress::Exhausted { bindings: state.globals })
    }
}

/// A continuation paused inside top-level statement `index`.
#[derive(Debug)]
pub struct Paused {
    source: String,
    body: Vec<Stmt>,
    index: usize,
    /// Values answering the suspension calls of the current statement, in order.
    supplied: Vec<Value>,
    globals: Environment,
}

impl Sandbox for ScriptedSandbox {
    type Paused = Paused;

    fn execute(&mut self, source: &str, env: &mut Environment, host: &mut dyn Host) -> Result<(), SandboxError> {
        let body = parse(source)?;
        let mut interp = self.interp(source, std::mem::take(env), host);
        let result = interp.exec_block(&body);
        *env = interp.globals;
        result.map_err(Flow::into_error)
    }

    fn start(
        &mut self,
        continuation: &Continuation,
        env: &Environment,
        host: &mut dyn Host,
    ) -> Result<Progress<Paused>, SandboxError> {
        let body = parse(continuation.body())?;
        let globals = continuation
            .parameters()
            .iter()
            .filter_map(|name| env.get(name).map(|value| (name.clone(), value.clone())))
            .collect();
        let state = Paused {
            source: continuation.body().to_owned(),
            body,
            index: 0,
            supplied: Vec::new(),
            globals,
        };
        self.run_continuation(state, host)
    }

    fn resume(&mut self, mut paused: Paused, value: Value, host: &mut dyn Host) -> Result<Progress<Paused>, SandboxError> {
        paused.supplied.push(value);
        self.run_continuation(paused, host)
    }

    fn trace(
        &mut self,
        source: &str,
        env: &mut Environment,
        host: &mut dyn Host,
        tracer: &mut dyn LineTracer,
    ) -> Result<TraceExit, SandboxError> {
        let body = parse(source)?;
        let mut interp = self.interp(source, std::mem::take(env), host);
        interp.tracer = Some(tracer);
        let result = interp.exec_block(&body);
        *env = interp.globals;
        match result {
            Ok(()) => Ok(TraceExit::Completed),
            Err(Flow::Halt(frame)) => Ok(TraceExit::Suspended(frame)),
            Err(flow) => Err(flow.into_error()),
        }
    }

    fn evaluate(&mut self, code: &str, bindings: &mut Environment, host: &mut dyn Host) -> Result<(), SandboxError> {
        let body = parse(code)?;
        let mut interp = self.interp(code, std::mem::take(bindings), host);
        let result = match body.split_last() {
            Some((Stmt::Expr(last), rest)) => interp.exec_block(rest).and_then(|()| {
                let value = interp.eval(&last.value)?;
                if value != Value::None {
                    interp.host.write(OutputStream::Stdout, &format!("{}\n", value.repr()));
                }
                Ok(())
            }),
            _ => interp.exec_block(&body),
        };
        *bindings = interp.globals;
        result.map_err(Flow::into_error)
    }

    fn fetch_capability(&mut self, name: &str) -> impl Future<Output = Result<(), FetchError>> + Send {
        let name = name.to_owned();
        async move {
            self.log.push(format!("fetch-start:{name}"));
            if self.hanging.contains(&name) {
                std::future::pending::<()>().await;
            }
            tokio::task::yield_now().await;
            if self.fetchable.contains(&name) {
                self.runtime.loaded.insert(name.clone());
                self.log.push(format!("fetch-end:{name}"));
                Ok(())
            } else {
                self.log.push(format!("fetch-failed:{name}"));
                Err(FetchError {
                    name,
                    reason: "no such package".to_owned(),
                })
            }
        }
    }

    fn capture_figure(&mut self) -> Result<Option<String>, SandboxError> {
        Ok(self.runtime.figure.then(|| FAKE_FIGURE.to_owned()))
    }

    fn clear_figure(&mut self) {
        self.log.push("clear-figure");
        self.runtime.figure = false;
    }

    fn preload(&mut self) -> Result<(), SandboxError> {
        self.log.push("preload");
        Ok(())
    }
}

fn parse(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    parse_module(source)
        .map(|parsed| parsed.into_syntax().body.into_iter().collect())
        .map_err(|error| SandboxError::Runtime(Exception::new("SyntaxError", error.to_string())))
}

fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(offset, _)| offset + 1))
        .collect()
}

/// Non-local exits while interpreting.
#[derive(Debug)]
enum Flow {
    Error(SandboxError),
    /// `__suspend__` was called with no supplied value left.
    Pause(Vec<Value>),
    /// The tracer asked to stop.
    Halt(SuspendedFrame),
    Return(Value),
}

impl Flow {
    fn into_error(self) -> SandboxError {
        match self {
            Self::Error(error) => error,
            Self::Return(_) => SandboxError::Runtime(Exception::new("SyntaxError", "'return' outside function")),
            Self::Pause(_) => SandboxError::Runtime(Exception::new("RuntimeError", "suspension outside a continuation")),
            Self::Halt(_) => SandboxError::Crashed("trace halted outside a traced run".to_owned()),
        }
    }
}

impl From<Exception> for Flow {
    fn from(error: Exception) -> Self {
        Self::Error(SandboxError::Runtime(error))
    }
}

fn raise<T>(exc_type: &str, message: impl Into<String>) -> Result<T, Flow> {
    Err(Exception::new(exc_type, message).into())
}

struct Interp<'r, 't> {
    runtime: &'r mut Runtime,
    host: &'r mut dyn Host,
    tracer: Option<&'t mut dyn LineTracer>,
    line_starts: Vec<usize>,
    globals: Environment,
    /// Local bindings of active function calls, innermost last.
    frames: Vec<Environment>,
    chain: Vec<FrameRecord>,
    /// Values for `__suspend__` calls; `None` outside continuations.
    supplied: Option<Vec<Value>>,
    used: usize,
}

impl Interp<'_, '_> {
    fn line(&self, node: &impl Ranged) -> u32 {
        let offset = usize::from(node.range().start());
        u32::try_from(self.line_starts.partition_point(|start| *start <= offset)).unwrap_or(u32::MAX)
    }

    /// Writes stdout unless the statement is replaying already supplied suspensions.
    fn emit(&mut self, text: &str) {
        let replaying = self.supplied.as_ref().is_some_and(|supplied| self.used < supplied.len());
        if !replaying {
            self.host.write(OutputStream::Stdout, text);
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<(), Flow> {
        for stmt in body {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), Flow> {
        let line = self.line(stmt);
        self.host.check_interrupt().map_err(Flow::Error)?;
        self.trace_line(line)?;
        self.exec_inner(stmt).map_err(|flow| match flow {
            Flow::Error(SandboxError::Runtime(exc)) if exc.line.is_none() => {
                Flow::Error(SandboxError::Runtime(exc.at_line(line)))
            }
            other => other,
        })
    }

    fn trace_line(&mut self, line: u32) -> Result<(), Flow> {
        if let Some(record) = self.chain.last_mut() {
            record.line = line;
        }
        let Some(tracer) = self.tracer.as_mut() else {
            return Ok(());
        };
        let function = self.chain.last().map_or(MODULE, |record| record.function.as_str());
        let event = LineEvent {
            line,
            depth: self.frames.len(),
            function,
        };
        if tracer.on_line(event) == TraceControl::Continue {
            return Ok(());
        }
        let bindings = self.frames.last().unwrap_or(&self.globals).clone();
        let record = self.chain.last().cloned().unwrap_or(FrameRecord {
            function: MODULE.to_owned(),
            line,
            depth: 0,
        });
        Err(Flow::Halt(SuspendedFrame {
            record,
            bindings,
            chain: self.chain.clone(),
        }))
    }

    fn exec_inner(&mut self, stmt: &Stmt) -> Result<(), Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(&expr.value)?;
            }
            Stmt::Assign(assign) => {
                let value = self.eval(&assign.value)?;
                for target in &assign.targets {
                    self.assign(target, value.clone())?;
                }
            }
            Stmt::AugAssign(aug) => {
                let current = self.eval(&aug.target)?;
                let rhs = self.eval(&aug.value)?;
                let value = binop(aug.op, current, rhs)?;
                self.assign(&aug.target, value)?;
            }
            Stmt::If(if_stmt) => {
                if self.eval(&if_stmt.test)?.is_truthy() {
                    return self.exec_block(&if_stmt.body);
                }
                for clause in &if_stmt.elif_else_clauses {
                    let taken = match &clause.test {
                        Some(test) => self.eval(test)?.is_truthy(),
                        None => true,
                    };
                    if taken {
                        return self.exec_block(&clause.body);
                    }
                }
            }
            Stmt::For(for_stmt) => {
                let items = iterate(self.eval(&for_stmt.iter)?)?;
                for item in items {
                    self.assign(&for_stmt.target, item)?;
                    self.exec_block(&for_stmt.body)?;
                }
            }
            Stmt::While(while_stmt) => {
                let mut rounds = 0;
                while self.eval(&while_stmt.test)?.is_truthy() {
                    rounds += 1;
                    if self.runtime.loop_limit.is_some_and(|limit| rounds > limit) {
                        return raise("RuntimeError", "loop limit exceeded");
                    }
                    self.exec_block(&while_stmt.body)?;
                }
            }
            Stmt::With(with) => {
                let mut handles = Vec::new();
                for item in &with.items {
                    let value = self.eval(&item.context_expr)?;
                    if let Some(target) = &item.optional_vars {
                        self.assign(target, value.clone())?;
                    }
                    handles.push(value);
                }
                let result = self.exec_block(&with.body);
                for handle in handles {
                    self.call_method(handle, "close", Vec::new(), None)?;
                }
                result?;
            }
            Stmt::FunctionDef(function) => {
                let name = function.name.id.to_string();
                self.runtime.functions.insert(name.clone(), function.clone());
                self.store(
                    &name,
                    Value::Opaque {
                        type_name: "function".to_owned(),
                        repr: format!("<function {name}>"),
                    },
                );
            }
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(value) => self.eval(value)?,
                    None => Value::None,
                };
                return Err(Flow::Return(value));
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    let full = alias.name.as_str();
                    let top = full.split('.').next().unwrap_or(full);
                    if !self.runtime.installed.contains(top) && !self.runtime.loaded.contains(top) {
                        self.host.request_capability(full);
                        return Err(Flow::Error(SandboxError::MissingCapability { name: top.to_owned() }));
                    }
                    let binding = alias.asname.as_ref().map_or(top, |asname| asname.as_str());
                    self.store(
                        binding,
                        Value::Opaque {
                            type_name: "module".to_owned(),
                            repr: format!("<module '{top}'>"),
                        },
                    );
                }
            }
            Stmt::Pass(_) => {}
            other => return raise("NotImplementedError", format!("statement at line {}", self.line(other))),
        }
        Ok(())
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(locals) => locals.set(name, value),
            None => self.globals.set(name, value),
        };
    }

    fn lookup(&self, name: &str) -> Result<Value, Flow> {
        self.frames
            .last()
            .and_then(|locals| locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| Exception::new("NameError", format!("name '{name}' is not defined")).into())
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), Flow> {
        match target {
            Expr::Name(name) => {
                self.store(name.id.as_str(), value);
                Ok(())
            }
            Expr::Tuple(ast::ExprTuple { elts, .. }) | Expr::List(ast::ExprList { elts, .. }) => {
                let items = iterate(value)?;
                if items.len() != elts.len() {
                    return raise("ValueError", "wrong number of values to unpack");
                }
                for (target, item) in elts.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            _ => raise("NotImplementedError", "unsupported assignment target"),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, Flow> {
        match expr {
            Expr::NumberLiteral(number) => match &number.value {
                Number::Int(int) => int
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| Exception::new("OverflowError", "int too large").into()),
                Number::Float(float) => Ok(Value::Float(*float)),
                Number::Complex { .. } => raise("NotImplementedError", "complex numbers"),
            },
            Expr::StringLiteral(string) => Ok(Value::Str(string.value.to_string())),
            Expr::BooleanLiteral(boolean) => Ok(Value::Bool(boolean.value)),
            Expr::NoneLiteral(_) => Ok(Value::None),
            Expr::Name(name) => self.lookup(name.id.as_str()),
            Expr::List(list) => Ok(Value::List(self.eval_all(&list.elts)?)),
            Expr::Tuple(tuple) => Ok(Value::Tuple(self.eval_all(&tuple.elts)?)),
            Expr::BinOp(bin) => {
                let left = self.eval(&bin.left)?;
                let right = self.eval(&bin.right)?;
                binop(bin.op, left, right)
            }
            Expr::UnaryOp(unary) => {
                let operand = self.eval(&unary.operand)?;
                match (unary.op, operand) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::USub, Value::Int(i)) => Ok(Value::Int(-i)),
                    (UnaryOp::USub, Value::Float(f)) => Ok(Value::Float(-f)),
                    (_, value) => raise("TypeError", format!("bad operand type: '{}'", value.type_name())),
                }
            }
            Expr::BoolOp(bool_op) => {
                let mut last = Value::None;
                for value in &bool_op.values {
                    last = self.eval(value)?;
                    let short_circuit = match bool_op.op {
                        ast::BoolOp::And => !last.is_truthy(),
                        ast::BoolOp::Or => last.is_truthy(),
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Compare(compare) => {
                let mut left = self.eval(&compare.left)?;
                for (op, right) in compare.ops.iter().zip(compare.comparators.iter()) {
                    let right = self.eval(right)?;
                    if !compare_values(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::Attribute(attribute) => {
                raise("AttributeError", format!("attribute '{}' is not supported", attribute.attr.as_str()))
            }
            other => raise("NotImplementedError", format!("expression at line {}", self.line(other))),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Flow> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_call(&mut self, call: &ast::ExprCall) -> Result<Value, Flow> {
        let args = self.eval_all(&call.arguments.args)?;
        let mut keywords = Vec::new();
        for keyword in call.arguments.keywords.iter() {
            let name = keyword.arg.as_ref().map(|arg| arg.as_str().to_owned()).unwrap_or_default();
            keywords.push((name, self.eval(&keyword.value)?));
        }
        match call.func.as_ref() {
            Expr::Name(name) => self.call_function(name.id.as_str(), args, &keywords),
            Expr::Attribute(attribute) => {
                let receiver_name = match attribute.value.as_ref() {
                    Expr::Name(name) => Some(name.id.to_string()),
                    _ => None,
                };
                let receiver = self.eval(&attribute.value)?;
                self.call_method(receiver, attribute.attr.as_str(), args, receiver_name.as_deref())
            }
            _ => raise("TypeError", "object is not callable"),
        }
    }

    fn call_function(&mut self, name: &str, args: Vec<Value>, keywords: &[(String, Value)]) -> Result<Value, Flow> {
        let keyword = |key: &str| keywords.iter().find(|(name, _)| name == key).map(|(_, value)| value);
        match name {
            "print" => {
                let sep = keyword("sep").map_or_else(|| " ".to_owned(), ToString::to_string);
                let end = keyword("end").map_or_else(|| "\n".to_owned(), ToString::to_string);
                let text: Vec<String> = args.iter().map(ToString::to_string).collect();
                self.emit(&format!("{}{end}", text.join(&sep)));
                Ok(Value::None)
            }
            "__suspend__" => self.suspend(args),
            "__display__" => {
                if let Some(value) = args.into_iter().next()
                    && value != Value::None
                {
                    self.emit(&format!("{}\n", value.repr()));
                }
                Ok(Value::None)
            }
            "input" => raise("EOFError", "EOF when reading a line"),
            "str" => Ok(Value::Str(args.first().map(ToString::to_string).unwrap_or_default())),
            "int" => match args.first() {
                Some(Value::Int(i)) => Ok(Value::Int(*i)),
                #[expect(clippy::cast_possible_truncation, reason = "int() truncates")]
                Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Int).or_else(|_| {
                    raise("ValueError", format!("invalid literal for int() with base 10: {}", Value::from(s.as_str()).repr()))
                }),
                _ => raise("TypeError", "int() argument must be a string or a number"),
            },
            "len" => match args.first() {
                Some(Value::Str(s)) => Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
                Some(Value::List(items) | Value::Tuple(items)) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
                _ => raise("TypeError", "object has no len()"),
            },
            "range" => {
                let (start, stop) = match args.as_slice() {
                    [Value::Int(stop)] => (0, *stop),
                    [Value::Int(start), Value::Int(stop)] => (*start, *stop),
                    _ => return raise("TypeError", "range() expects integers"),
                };
                Ok(Value::List((start..stop).map(Value::Int).collect()))
            }
            "open" => {
                let path = args.first().map(ToString::to_string).unwrap_or_default();
                let mode = args.get(1).map_or_else(|| "r".to_owned(), ToString::to_string);
                let file = self.host.open_file(&path, &mode).map_err(Exception::from)?;
                let id = self.runtime.next_file;
                self.runtime.next_file += 1;
                self.runtime.files.insert(id, file);
                Ok(Value::Opaque {
                    type_name: "file".to_owned(),
                    repr: format!("<file {id}>"),
                })
            }
            "listdir" => {
                let names = self.host.list_files().map_err(Exception::from)?;
                Ok(Value::List(names.into_iter().map(Value::Str).collect()))
            }
            "plot" if self.runtime.loaded.contains("matplotlib") => {
                self.runtime.figure = true;
                Ok(Value::None)
            }
            _ => match self.runtime.functions.get(name).cloned() {
                Some(function) => self.call_user(&function, args),
                None => raise("NameError", format!("name '{name}' is not defined")),
            },
        }
    }

    fn suspend(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let Some(supplied) = &self.supplied else {
            return raise("NameError", "name '__suspend__' is not defined");
        };
        let done = args.first().is_some_and(Value::is_truthy);
        if !done && let Some(value) = supplied.get(self.used) {
            self.used += 1;
            return Ok(value.clone());
        }
        Err(Flow::Pause(args))
    }

    fn call_user(&mut self, function: &ast::StmtFunctionDef, args: Vec<Value>) -> Result<Value, Flow> {
        let name = function.name.id.to_string();
        let parameters = &function.parameters.args;
        if args.len() > parameters.len() {
            return raise("TypeError", format!("{name}() takes {} arguments", parameters.len()));
        }
        let mut locals = Environment::new();
        let mut args = args.into_iter();
        for parameter in parameters {
            let value = match (args.next(), &parameter.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(default)?,
                (None, None) => {
                    return raise(
                        "TypeError",
                        format!("{name}() missing argument '{}'", parameter.parameter.name.as_str()),
                    );
                }
            };
            locals.set(parameter.parameter.name.as_str(), value);
        }

        self.frames.push(locals);
        let depth = self.frames.len();
        self.chain.push(FrameRecord {
            function: name.clone(),
            line: 0,
            depth,
        });
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_call(&name, depth);
        }
        let result = self.exec_block(&function.body);
        if matches!(result, Err(Flow::Halt(_))) {
            return result.map(|()| Value::None);
        }
        self.frames.pop();
        self.chain.pop();
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_return(depth - 1);
        }
        match result {
            Ok(()) => Ok(Value::None),
            Err(Flow::Return(value)) => Ok(value),
            Err(flow) => Err(flow),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        receiver_name: Option<&str>,
    ) -> Result<Value, Flow> {
        match receiver {
            Value::Opaque { type_name, repr } if type_name == "file" => self.file_method(&repr, method, &args),
            Value::Str(s) => match method {
                "upper" => Ok(Value::Str(s.to_uppercase())),
                "strip" => Ok(Value::Str(s.trim().to_owned())),
                _ => raise("AttributeError", format!("'str' object has no attribute '{method}'")),
            },
            Value::List(mut items) if method == "append" => {
                items.extend(args);
                if let Some(name) = receiver_name {
                    self.store(name, Value::List(items));
                }
                Ok(Value::None)
            }
            Value::Opaque { type_name, .. } if type_name == "module" && method == "plot" => {
                self.call_function("plot", args, &[])
            }
            other => raise(
                "AttributeError",
                format!("'{}' object has no attribute '{method}'", other.type_name()),
            ),
        }
    }

    fn file_method(&mut self, repr: &str, method: &str, args: &[Value]) -> Result<Value, Flow> {
        let id: u64 = repr
            .strip_prefix("<file ")
            .and_then(|rest| rest.strip_suffix('>'))
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| Flow::from(Exception::new("ValueError", "bad file handle")))?;
        if method == "close" {
            if let Some(mut file) = self.runtime.files.remove(&id) {
                self.host.close_file(&mut file).map_err(Exception::from)?;
            }
            return Ok(Value::None);
        }
        let Some(file) = self.runtime.files.get_mut(&id) else {
            return raise("ValueError", "I/O operation on closed file.");
        };
        let value = match method {
            "read" => Value::Str(file.read(None).map_err(Exception::from)?),
            "readline" => Value::Str(file.readline().map_err(Exception::from)?),
            "write" => {
                let text = args.first().map(ToString::to_string).unwrap_or_default();
                let written = file.write(&text).map_err(Exception::from)?;
                Value::Int(i64::try_from(written).unwrap_or(i64::MAX))
            }
            _ => return raise("AttributeError", format!("'file' object has no attribute '{method}'")),
        };
        Ok(value)
    }
}

fn iterate(value: Value) -> Result<Vec<Value>, Flow> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => raise("TypeError", format!("'{}' object is not iterable", other.type_name())),
    }
}

#[expect(clippy::cast_precision_loss, reason = "mixed int/float arithmetic")]
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn binop(op: Operator, left: Value, right: Value) -> Result<Value, Flow> {
    match (op, &left, &right) {
        (Operator::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (Operator::Add, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (Operator::Mult, Value::Str(s), Value::Int(n)) => {
            Ok(Value::Str(s.repeat(usize::try_from(*n).unwrap_or_default())))
        }
        (_, Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
        _ => match (as_float(&left), as_float(&right)) {
            (Some(a), Some(b)) => float_op(op, a, b),
            _ => raise(
                "TypeError",
                format!(
                    "unsupported operand type(s): '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ),
            ),
        },
    }
}

fn int_op(op: Operator, a: i64, b: i64) -> Result<Value, Flow> {
    let overflow = || Flow::from(Exception::new("OverflowError", "integer overflow"));
    let value = match op {
        Operator::Add => a.checked_add(b).ok_or_else(overflow)?,
        Operator::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Operator::Mult => a.checked_mul(b).ok_or_else(overflow)?,
        #[expect(clippy::cast_precision_loss, reason = "true division yields a float")]
        Operator::Div => return float_op(op, a as f64, b as f64),
        Operator::FloorDiv | Operator::Mod => {
            if b == 0 {
                return raise("ZeroDivisionError", "integer division or modulo by zero");
            }
            let quotient = a.div_euclid(b) - i64::from(b < 0 && a.rem_euclid(b) != 0);
            if op == Operator::FloorDiv {
                quotient
            } else {
                a - b * quotient
            }
        }
        _ => return raise("NotImplementedError", "operator"),
    };
    Ok(Value::Int(value))
}

fn float_op(op: Operator, a: f64, b: f64) -> Result<Value, Flow> {
    let value = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return raise("ZeroDivisionError", "division by zero");
            }
            a / b
        }
        _ => return raise("NotImplementedError", "operator"),
    };
    Ok(Value::Float(value))
}

fn compare_values(op: CmpOp, left: &Value, right: &Value) -> Result<bool, Flow> {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_float(left), as_float(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let equal = ordering.map_or_else(|| left == right, std::cmp::Ordering::is_eq);
    Ok(match op {
        CmpOp::Eq => equal,
        CmpOp::NotEq => !equal,
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let Some(ordering) = ordering else {
                return raise("TypeError", "'<' not supported between these types");
            };
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::LtE => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
        _ => return raise("NotImplementedError", "comparison"),
    })
}

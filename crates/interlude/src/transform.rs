//! Rewriting of scripts into resumable continuations.
//!
//! A script that calls `input()` at top level cannot block the engine while it
//! waits for the user. Instead every such call is rewritten into a call of the
//! suspension primitive, which the sandbox treats as a yield point: it hands
//! `(done, prompt)` plus the current top-level bindings back to the engine and
//! later evaluates to the value the user submitted.
//!
//! ```text
//! name = input("name: ")        name = __suspend__(False, "name: ")
//! print("hi", name)       =>    print("hi", name)
//! len(name)                     __display__(len(name))
//!                               __suspend__(True, None)
//! ```
//!
//! Rewrites are applied as text splices on the original source, so line numbers
//! are preserved and tracebacks still point at what the user wrote.
//!
//! Only straight-line top-level code may suspend. A call nested in a function,
//! method, class body, lambda or comprehension is rejected with a
//! [`ScopeViolation`] before anything runs.

use ruff_python_ast::{
    self as ast, Comprehension, Expr, Parameters, Stmt,
    visitor::{Visitor, walk_expr, walk_stmt},
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextSize};

use crate::{
    environment::Environment,
    error::{CompileError, ScopeConstruct, ScopeViolation, TransformError},
};

/// Name of the primitive rewritten into suspension points.
pub const INPUT_PRIMITIVE: &str = "input";
/// Suspension primitive bound by the sandbox: `__suspend__(done, prompt)`.
pub const SUSPEND_PRIMITIVE: &str = "__suspend__";
/// Display hook bound by the sandbox: shows the repr of non-`None` values.
pub const DISPLAY_PRIMITIVE: &str = "__display__";

/// A script rewritten into a single resumable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    body: String,
    parameters: Vec<String>,
    suspension_points: usize,
}

impl Continuation {
    /// Rewritten source, ending with the final `done` suspension.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Names of the environment bindings the continuation is parameterized by.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Number of rewritten input calls, not counting the final suspension.
    #[must_use]
    pub fn suspension_points(&self) -> usize {
        self.suspension_points
    }
}

/// Rewrites `script` into a continuation parameterized by the names bound in `env`.
pub fn transform(script: &str, env: &Environment) -> Result<Continuation, TransformError> {
    let body = parse(script)?;

    let mut checker = ScopeChecker::new(script);
    for stmt in &body {
        checker.visit_stmt(stmt);
    }
    if let Some(violation) = checker.violation {
        return Err(violation.into());
    }

    let mut splices = Vec::with_capacity(checker.calls.len() * 2 + 2);
    for call in &checker.calls {
        splices.push(Splice::replace(call.name_start, call.name_end, SUSPEND_PRIMITIVE));
        let text = if call.has_arguments { "False, " } else { "False, None" };
        splices.push(Splice::insert(call.open_paren + 1, text));
    }
    push_display(&body, &mut splices);

    let mut rewritten = apply(script, splices);
    if !rewritten.is_empty() && !rewritten.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten.push_str(SUSPEND_PRIMITIVE);
    rewritten.push_str("(True, None)\n");

    Ok(Continuation {
        body: rewritten,
        parameters: env.names().map(str::to_owned).collect(),
        suspension_points: checker.calls.len(),
    })
}

/// Prepares `script` for direct execution: syntax is checked and a trailing
/// bare expression is routed through the display hook. `input()` is left alone.
pub fn prepare_plain(script: &str) -> Result<String, CompileError> {
    let body = parse(script)?;
    let mut splices = Vec::with_capacity(2);
    push_display(&body, &mut splices);
    Ok(apply(script, splices))
}

fn parse(script: &str) -> Result<Vec<Stmt>, CompileError> {
    parse_module(script).map(|parsed| parsed.into_syntax().body.into_iter().collect()).map_err(|error| CompileError {
        message: error.to_string(),
        line: line_of(script, error.range().start()),
    })
}

/// Wraps the value of a trailing expression statement in the display hook.
fn push_display(body: &[Stmt], splices: &mut Vec<Splice>) {
    if let Some(Stmt::Expr(ast::StmtExpr { value, .. })) = body.last() {
        let range = value.range();
        splices.push(Splice::insert(range.start().into(), "__display__("));
        splices.push(Splice::insert(range.end().into(), ")"));
    }
}

fn line_of(source: &str, offset: TextSize) -> u32 {
    let offset = usize::from(offset).min(source.len());
    let newlines = source.as_bytes()[..offset].iter().filter(|b| **b == b'\n').count();
    u32::try_from(newlines + 1).unwrap_or(u32::MAX)
}

/// A text edit at a byte offset of the original source.
#[derive(Debug)]
struct Splice {
    start: usize,
    end: usize,
    text: &'static str,
}

impl Splice {
    fn insert(at: usize, text: &'static str) -> Self {
        Self {
            start: at,
            end: at,
            text,
        }
    }

    fn replace(start: usize, end: usize, text: &'static str) -> Self {
        Self { start, end, text }
    }
}

/// Applies non-overlapping splices. Insertions at an offset go before a
/// replacement starting at the same offset.
fn apply(source: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by_key(|splice| (splice.start, splice.end));
    let mut out = String::with_capacity(source.len() + splices.len() * 16);
    let mut cursor = 0;
    for splice in splices {
        out.push_str(&source[cursor..splice.start]);
        out.push_str(splice.text);
        cursor = splice.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// A top-level `input(...)` call, as byte offsets into the source.
#[derive(Debug)]
struct InputCall {
    name_start: usize,
    name_end: usize,
    open_paren: usize,
    has_arguments: bool,
}

/// Walks the module tracking which scope each expression is evaluated in.
///
/// Decorators, parameter defaults, class bases and the first iterable of a
/// comprehension are evaluated in the enclosing scope, so they are visited
/// before the nested scope is entered.
struct ScopeChecker<'s> {
    source: &'s str,
    scopes: Vec<ScopeConstruct>,
    calls: Vec<InputCall>,
    violation: Option<ScopeViolation>,
}

impl<'s> ScopeChecker<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            scopes: Vec::new(),
            calls: Vec::new(),
            violation: None,
        }
    }

    fn visit_defaults(&mut self, parameters: &Parameters) {
        let all = parameters
            .posonlyargs
            .iter()
            .chain(&parameters.args)
            .chain(&parameters.kwonlyargs);
        for parameter in all {
            if let Some(default) = &parameter.default {
                self.visit_expr(default);
            }
        }
    }

    fn visit_nested(&mut self, construct: ScopeConstruct, body: &[Stmt]) {
        self.scopes.push(construct);
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn visit_comprehension_scope(&mut self, generators: &[Comprehension], elements: &[&Expr]) {
        if let Some(first) = generators.first() {
            self.visit_expr(&first.iter);
        }
        self.scopes.push(ScopeConstruct::Comprehension);
        for (index, generator) in generators.iter().enumerate() {
            self.visit_expr(&generator.target);
            if index > 0 {
                self.visit_expr(&generator.iter);
            }
            for condition in &generator.ifs {
                self.visit_expr(condition);
            }
        }
        for element in elements {
            self.visit_expr(element);
        }
        self.scopes.pop();
    }

    fn record_input(&mut self, call: &ast::ExprCall) {
        if self.violation.is_some() {
            return;
        }
        let start = call.func.range().start();
        if let Some(construct) = self.scopes.last() {
            self.violation = Some(ScopeViolation {
                construct: construct.clone(),
                line: line_of(self.source, start),
            });
            return;
        }
        self.calls.push(InputCall {
            name_start: start.into(),
            name_end: call.func.range().end().into(),
            open_paren: call.arguments.range.start().into(),
            has_arguments: !call.arguments.args.is_empty() || !call.arguments.keywords.is_empty(),
        });
    }
}

impl<'a> Visitor<'a> for ScopeChecker<'_> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::FunctionDef(function) => {
                for decorator in &function.decorator_list {
                    self.visit_expr(&decorator.expression);
                }
                self.visit_defaults(&function.parameters);
                let name = function.name.id.to_string();
                let construct = if matches!(self.scopes.last(), Some(ScopeConstruct::Class(_))) {
                    ScopeConstruct::Method(name)
                } else {
                    ScopeConstruct::Function(name)
                };
                self.visit_nested(construct, &function.body);
            }
            Stmt::ClassDef(class) => {
                for decorator in &class.decorator_list {
                    self.visit_expr(&decorator.expression);
                }
                if let Some(arguments) = &class.arguments {
                    for base in arguments.args.iter() {
                        self.visit_expr(base);
                    }
                    for keyword in arguments.keywords.iter() {
                        self.visit_expr(&keyword.value);
                    }
                }
                self.visit_nested(ScopeConstruct::Class(class.name.id.to_string()), &class.body);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Lambda(lambda) => {
                if let Some(parameters) = &lambda.parameters {
                    self.visit_defaults(parameters);
                }
                self.scopes.push(ScopeConstruct::Lambda);
                self.visit_expr(&lambda.body);
                self.scopes.pop();
            }
            Expr::ListComp(comp) => self.visit_comprehension_scope(&comp.generators, &[comp.elt.as_ref()]),
            Expr::SetComp(comp) => self.visit_comprehension_scope(&comp.generators, &[comp.elt.as_ref()]),
            Expr::Generator(comp) => self.visit_comprehension_scope(&comp.generators, &[comp.elt.as_ref()]),
            Expr::DictComp(comp) => {
                let elements: Vec<&Expr> = comp.key.as_deref().into_iter().chain([comp.value.as_ref()]).collect();
                self.visit_comprehension_scope(&comp.generators, &elements);
            }
            Expr::Call(call) => {
                if let Expr::Name(name) = call.func.as_ref()
                    && name.id.as_str() == INPUT_PRIMITIVE
                {
                    self.record_input(call);
                }
                walk_expr(self, expr);
            }
            _ => walk_expr(self, expr),
        }
    }
}

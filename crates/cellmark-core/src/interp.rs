use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::ast::{parse_source, Expr};
use crate::env::{Bindings, Value};
use crate::error::{ExecError, ExecErrorKind};
use crate::sandbox::{self, OutputSink, RNG_STATE_NAME, UNSEEDED_STATE};
use crate::suite::{SuiteLoader, SuiteReport};

pub const DEFAULT_FUEL: u64 = 5_000_000;

/// Fixed default the normalizer rebinds `(use-tests ...)` arguments to when
/// no override is configured. Bare `check` paths resolve against the
/// caller's working directory until a `use-tests` form runs.
pub const DEFAULT_SUITE_DIR: &str = "tests";
const MAX_IMPORT_DEPTH: u32 = 16;
const DEFAULT_EXPORT_PATH: &str = "export.cmx";

#[cfg(test)]
static FS_LOADER: crate::suite::FsSuiteLoader = crate::suite::FsSuiteLoader;

/// Per-run execution context: suite loading, suite lookup directory,
/// module search path, the output sink, the export capability flag, and
/// the fuel budget. The Binding Environment is passed separately so the
/// caller keeps exclusive ownership of it across passes.
pub struct ExecContext<'a> {
    pub loader: &'a dyn SuiteLoader,
    pub suite_dir: PathBuf,
    pub module_roots: Vec<PathBuf>,
    /// Artifact export capability. Grading runs leave this off so user code
    /// calling `(export)` never produces files as a side effect.
    pub allow_export: bool,
    pub sink: OutputSink,
    fuel: u64,
    import_depth: u32,
}

impl<'a> ExecContext<'a> {
    pub fn new(loader: &'a dyn SuiteLoader) -> Self {
        Self {
            loader,
            suite_dir: PathBuf::from("."),
            module_roots: Vec::new(),
            allow_export: false,
            sink: OutputSink::discard(),
            fuel: DEFAULT_FUEL,
            import_depth: 0,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> ExecContext<'static> {
        ExecContext::new(&FS_LOADER)
    }

    pub fn set_fuel(&mut self, fuel: u64) {
        self.fuel = fuel;
    }

    pub fn fuel_left(&self) -> u64 {
        self.fuel
    }

    fn burn(&mut self) -> Result<(), ExecError> {
        if self.fuel == 0 {
            return Err(ExecError::new(ExecErrorKind::Budget, "fuel exhausted"));
        }
        self.fuel -= 1;
        Ok(())
    }
}

/// Load the suite at `path` and run it against `env`. The environment is an
/// explicit required parameter; the in-language `(check "path")` builtin is
/// the only place that defaults it to the enclosing run's bindings.
pub fn check(path: &Path, env: &mut Bindings, cx: &mut ExecContext) -> Result<SuiteReport, ExecError> {
    // Paths are kept as written when no suite directory is in effect, so
    // path-containment deduplication sees the same spelling the document
    // used.
    let resolved = if path.is_absolute() || cx.suite_dir.as_os_str() == "." {
        path.to_path_buf()
    } else {
        cx.suite_dir.join(path)
    };
    let suite = cx.loader.load(&[resolved])?;
    Ok(suite.run(env, cx))
}

/// Evaluate a sequence of top-level forms, yielding the last form's value.
pub fn eval_program(
    forms: &[Expr],
    env: &mut Bindings,
    cx: &mut ExecContext,
) -> Result<Value, ExecError> {
    let mut last = Value::Unit;
    for form in forms {
        last = eval_expr(form, env, cx)?;
    }
    Ok(last)
}

pub fn eval_expr(expr: &Expr, env: &mut Bindings, cx: &mut ExecContext) -> Result<Value, ExecError> {
    cx.burn()?;
    match expr {
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Ident(name) => match name.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => env
                .get(name)
                .cloned()
                .ok_or_else(|| ExecError::exec(format!("undefined name: {name}"))),
        },
        Expr::List(items) => eval_form(items, env, cx),
    }
}

fn eval_form(items: &[Expr], env: &mut Bindings, cx: &mut ExecContext) -> Result<Value, ExecError> {
    let Some(head) = items.first() else {
        return Ok(Value::Unit);
    };
    let Some(op) = head.as_ident() else {
        return Err(ExecError::exec(format!(
            "call head must be an identifier, got {head:?}"
        )));
    };
    let args = &items[1..];

    match op {
        // Special forms first: their arguments are not all evaluated.
        "set" => {
            let (name, value_expr) = binding_args(op, args)?;
            let value = eval_expr(value_expr, env, cx)?;
            env.insert(name, value);
            Ok(Value::Unit)
        }
        "if" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(arity(op, "2 or 3", args.len()));
            }
            let cond = eval_expr(&args[0], env, cx)?;
            if cond.truthy() {
                eval_expr(&args[1], env, cx)
            } else if let Some(alt) = args.get(2) {
                eval_expr(alt, env, cx)
            } else {
                Ok(Value::Unit)
            }
        }
        "do" => eval_program(args, env, cx),
        "while" => {
            let Some((cond, body)) = args.split_first() else {
                return Err(arity(op, ">= 1", args.len()));
            };
            while eval_expr(cond, env, cx)?.truthy() {
                eval_program(body, env, cx)?;
            }
            Ok(Value::Unit)
        }
        "and" => {
            for arg in args {
                if !eval_expr(arg, env, cx)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "or" => {
            for arg in args {
                if eval_expr(arg, env, cx)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "push!" => {
            let (name, value_expr) = binding_args(op, args)?;
            let value = eval_expr(value_expr, env, cx)?;
            match env.get_mut(&name) {
                Some(Value::List(items)) => {
                    items.push(value.clone());
                    Ok(value)
                }
                Some(other) => Err(ExecError::exec(format!(
                    "push! target {name} is {}, not a list",
                    other.type_name()
                ))),
                None => Err(ExecError::exec(format!("push! target not bound: {name}"))),
            }
        }
        _ => {
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval_expr(arg, env, cx)?);
            }
            eval_builtin(op, args, vals, env, cx)
        }
    }
}

fn eval_builtin(
    op: &str,
    arg_exprs: &[Expr],
    args: Vec<Value>,
    env: &mut Bindings,
    cx: &mut ExecContext,
) -> Result<Value, ExecError> {
    match op {
        "+" | "-" | "*" => arith(op, &args),
        "/" => {
            let (a, b) = two_nums(op, &args)?;
            if b == 0.0 {
                return Err(ExecError::exec("division by zero"));
            }
            Ok(Value::Num(a / b))
        }
        "=" => Ok(Value::Bool(values_equal(two(op, &args)?))),
        "!=" => Ok(Value::Bool(!values_equal(two(op, &args)?))),
        "<" | "<=" | ">" | ">=" => {
            let (a, b) = two_nums(op, &args)?;
            let out = match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            };
            Ok(Value::Bool(out))
        }
        "not" => {
            let [v] = one(op, &args)?;
            Ok(Value::Bool(!v.truthy()))
        }
        "list" => Ok(Value::List(args)),
        "len" => {
            let [v] = one(op, &args)?;
            match v {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(ExecError::exec(format!(
                    "len expects a list or string, got {}",
                    other.type_name()
                ))),
            }
        }
        "nth" => {
            let (list, idx) = two(op, &args)?;
            let Value::List(items) = list else {
                return Err(ExecError::exec("nth expects a list"));
            };
            let Value::Int(i) = idx else {
                return Err(ExecError::exec("nth expects an integer index"));
            };
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| ExecError::exec(format!("nth index out of range: {i}")))
        }
        "str" => {
            let mut out = String::new();
            for v in &args {
                out.push_str(&v.render());
            }
            Ok(Value::Str(out))
        }
        "print" => {
            let rendered: Vec<String> = args.iter().map(Value::render).collect();
            let _ = writeln!(cx.sink, "{}", rendered.join(" "));
            Ok(Value::Unit)
        }
        "seed!" => {
            let [v] = one(op, &args)?;
            let Value::Int(seed) = v else {
                return Err(ExecError::exec("seed! expects an integer"));
            };
            sandbox::seed_bindings(env, *seed as u64);
            Ok(Value::Unit)
        }
        "rand" => {
            if !args.is_empty() {
                return Err(arity(op, "0", args.len()));
            }
            let mut state = rng_state(env);
            let draw = sandbox::unit_f64(&mut state);
            env.insert(RNG_STATE_NAME, Value::Int(state as i64));
            Ok(Value::Num(draw))
        }
        "rand-int" => {
            let [v] = one(op, &args)?;
            let Value::Int(bound) = v else {
                return Err(ExecError::exec("rand-int expects an integer bound"));
            };
            if *bound <= 0 {
                return Err(ExecError::exec("rand-int bound must be positive"));
            }
            let mut state = rng_state(env);
            let draw = sandbox::next_u64(&mut state) % (*bound as u64);
            env.insert(RNG_STATE_NAME, Value::Int(state as i64));
            Ok(Value::Int(draw as i64))
        }
        "check" => {
            let [v] = one(op, &args)?;
            let Value::Str(path) = v else {
                return Err(ExecError::exec("check expects a suite path string"));
            };
            let report = check(Path::new(path), env, cx)?;
            Ok(Value::Report(report))
        }
        "use-tests" => {
            let [v] = one(op, &args)?;
            let Value::Str(dir) = v else {
                return Err(ExecError::exec("use-tests expects a directory string"));
            };
            cx.suite_dir = PathBuf::from(dir);
            Ok(Value::Unit)
        }
        "export" => {
            if args.len() > 1 {
                return Err(arity(op, "0 or 1", args.len()));
            }
            let path = match args.first() {
                None => DEFAULT_EXPORT_PATH.to_string(),
                Some(Value::Str(s)) => s.clone(),
                Some(other) => {
                    return Err(ExecError::exec(format!(
                        "export expects a path string, got {}",
                        other.type_name()
                    )));
                }
            };
            if cx.allow_export {
                write_export(&path, env)?;
            }
            Ok(Value::Unit)
        }
        "assert" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity(op, "1 or 2", args.len()));
            }
            if args[0].truthy() {
                return Ok(Value::Unit);
            }
            let message = match args.get(1) {
                Some(Value::Str(s)) => s.clone(),
                Some(other) => other.render(),
                None => format!("assertion failed: {:?}", arg_exprs[0]),
            };
            Err(ExecError::exec(message))
        }
        "import" => {
            let [v] = one(op, &args)?;
            let Value::Str(name) = v else {
                return Err(ExecError::exec("import expects a module name string"));
            };
            import_module(name, env, cx)
        }
        // Interactive-widget helper: meaningless outside a live session.
        // The normalizer drops these lines; any survivor is a no-op.
        "interact" => Ok(Value::Unit),
        other => Err(ExecError::exec(format!("unknown operation: {other}"))),
    }
}

fn import_module(name: &str, env: &mut Bindings, cx: &mut ExecContext) -> Result<Value, ExecError> {
    if cx.import_depth >= MAX_IMPORT_DEPTH {
        return Err(ExecError::exec(format!(
            "import depth exceeded at module: {name}"
        )));
    }

    let file_name = if name.ends_with(".cms") {
        name.to_string()
    } else {
        format!("{name}.cms")
    };
    let mut candidates: Vec<PathBuf> = vec![PathBuf::from(&file_name)];
    for root in &cx.module_roots {
        candidates.push(root.join(&file_name));
    }

    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        return Err(ExecError::exec(format!("module not found: {name}")));
    };

    let source = std::fs::read_to_string(path).map_err(|err| {
        ExecError::new(
            ExecErrorKind::Io,
            format!("read module {}: {err}", path.display()),
        )
    })?;
    let forms = parse_source(&source)?;

    cx.import_depth += 1;
    let out = eval_program(&forms, env, cx);
    cx.import_depth -= 1;
    out?;
    Ok(Value::Unit)
}

fn write_export(path: &str, env: &Bindings) -> Result<(), ExecError> {
    let mut out = String::new();
    for name in env.names() {
        if name.starts_with("__") || name.starts_with("check_results_") {
            continue;
        }
        let value = env.get(name).map(Value::render).unwrap_or_default();
        out.push_str(&format!("{name} {value}\n"));
    }
    std::fs::write(path, out)
        .map_err(|err| ExecError::new(ExecErrorKind::Io, format!("write export {path}: {err}")))
}

fn rng_state(env: &Bindings) -> u64 {
    match env.get(RNG_STATE_NAME) {
        Some(Value::Int(state)) => *state as u64,
        _ => UNSEEDED_STATE,
    }
}

fn binding_args<'e>(op: &str, args: &'e [Expr]) -> Result<(String, &'e Expr), ExecError> {
    if args.len() != 2 {
        return Err(arity(op, "2", args.len()));
    }
    let Some(name) = args[0].as_ident() else {
        return Err(ExecError::exec(format!(
            "{op} expects an identifier, got {:?}",
            args[0]
        )));
    };
    Ok((name.to_string(), &args[1]))
}

fn arity(op: &str, want: &str, got: usize) -> ExecError {
    ExecError::exec(format!("{op} expects {want} argument(s), got {got}"))
}

fn one<'v>(op: &str, args: &'v [Value]) -> Result<[&'v Value; 1], ExecError> {
    match args {
        [a] => Ok([a]),
        _ => Err(arity(op, "1", args.len())),
    }
}

fn two<'v>(op: &str, args: &'v [Value]) -> Result<(&'v Value, &'v Value), ExecError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(arity(op, "2", args.len())),
    }
}

fn two_nums(op: &str, args: &[Value]) -> Result<(f64, f64), ExecError> {
    let (a, b) = two(op, args)?;
    Ok((as_num(op, a)?, as_num(op, b)?))
}

fn as_num(op: &str, v: &Value) -> Result<f64, ExecError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Num(n) => Ok(*n),
        other => Err(ExecError::exec(format!(
            "{op} expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn values_equal((a, b): (&Value, &Value)) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Num(y)) | (Value::Num(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

fn arith(op: &str, args: &[Value]) -> Result<Value, ExecError> {
    if args.is_empty() {
        return Err(arity(op, ">= 1", 0));
    }
    // Unary minus.
    if op == "-" && args.len() == 1 {
        return match &args[0] {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Num(n) => Ok(Value::Num(-n)),
            other => Err(ExecError::exec(format!(
                "- expects a number, got {}",
                other.type_name()
            ))),
        };
    }

    let all_int = args.iter().all(|v| matches!(v, Value::Int(_)));
    if all_int {
        let mut acc = match &args[0] {
            Value::Int(i) => *i,
            _ => unreachable!(),
        };
        for v in &args[1..] {
            let Value::Int(i) = v else { unreachable!() };
            acc = match op {
                "+" => acc.wrapping_add(*i),
                "-" => acc.wrapping_sub(*i),
                _ => acc.wrapping_mul(*i),
            };
        }
        return Ok(Value::Int(acc));
    }

    let mut acc = as_num(op, &args[0])?;
    for v in &args[1..] {
        let n = as_num(op, v)?;
        acc = match op {
            "+" => acc + n,
            "-" => acc - n,
            _ => acc * n,
        };
    }
    Ok(Value::Num(acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str, env: &mut Bindings) -> Result<Value, ExecError> {
        let mut cx = ExecContext::for_tests();
        let forms = parse_source(src)?;
        eval_program(&forms, env, &mut cx)
    }

    #[test]
    fn arithmetic_and_bindings() {
        let mut env = Bindings::new();
        let v = run("(set x (+ 1 1)) (set y (* x 3)) (- y x)", &mut env).expect("run");
        assert_eq!(v, Value::Int(4));
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn control_flow() {
        let mut env = Bindings::new();
        let v = run(
            "(set n 0) (while (< n 5) (set n (+ n 1))) (if (= n 5) \"ok\" \"bad\")",
            &mut env,
        )
        .expect("run");
        assert_eq!(v, Value::Str("ok".to_string()));
    }

    #[test]
    fn undefined_name_is_exec_failure() {
        let mut env = Bindings::new();
        let err = run("(+ ghost 1)", &mut env).expect_err("must fail");
        assert_eq!(err.kind, ExecErrorKind::Exec);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn push_preserves_expression_value() {
        // The rewriter relies on push! yielding the appended value.
        let mut env = Bindings::new();
        env.insert("acc", Value::List(Vec::new()));
        let v = run("(set got (push! acc (+ 2 3)))", &mut env).expect("run");
        assert_eq!(v, Value::Unit);
        assert_eq!(env.get("got"), Some(&Value::Int(5)));
        assert_eq!(env.get("acc"), Some(&Value::List(vec![Value::Int(5)])));
    }

    #[test]
    fn infinite_loop_hits_fuel_budget() {
        let mut cx = ExecContext::for_tests();
        cx.set_fuel(10_000);
        let forms = parse_source("(while true (do))").expect("parse");
        let mut env = Bindings::new();
        let err = eval_program(&forms, &mut env, &mut cx).expect_err("must exhaust");
        assert_eq!(err.kind, ExecErrorKind::Budget);
    }

    #[test]
    fn print_goes_to_the_sink() {
        let mut cx = ExecContext::for_tests();
        cx.sink = OutputSink::capture();
        let forms = parse_source("(print \"hello\" 42)").expect("parse");
        let mut env = Bindings::new();
        eval_program(&forms, &mut env, &mut cx).expect("run");
        assert_eq!(cx.sink.captured(), b"hello 42\n");
    }

    #[test]
    fn seeded_rand_is_reproducible() {
        let mut a = Bindings::new();
        let va = run("(seed! 7) (rand)", &mut a).expect("run");
        let mut b = Bindings::new();
        let vb = run("(seed! 7) (rand)", &mut b).expect("run");
        assert_eq!(va, vb);
        let mut c = Bindings::new();
        let vc = run("(seed! 8) (rand)", &mut c).expect("run");
        assert_ne!(va, vc);
    }

    #[test]
    fn rand_int_respects_bound() {
        let mut env = Bindings::new();
        for _ in 0..32 {
            let Value::Int(i) = run("(rand-int 6)", &mut env).expect("run") else {
                panic!("expected int");
            };
            assert!((0..6).contains(&i), "{i}");
        }
    }

    #[test]
    fn export_is_a_noop_without_the_capability() {
        let mut cx = ExecContext::for_tests();
        assert!(!cx.allow_export);
        let forms = parse_source("(export \"/definitely/not/writable/x\")").expect("parse");
        let mut env = Bindings::new();
        eval_program(&forms, &mut env, &mut cx).expect("no-op export");
    }

    #[test]
    fn assert_failure_carries_the_message() {
        let mut env = Bindings::new();
        let err = run("(assert (= 1 2) \"one is not two\")", &mut env).expect_err("must fail");
        assert_eq!(err.message, "one is not two");
    }

    #[test]
    fn mixed_numeric_equality() {
        let mut env = Bindings::new();
        let v = run("(= 2 2.0)", &mut env).expect("run");
        assert_eq!(v, Value::Bool(true));
    }
}

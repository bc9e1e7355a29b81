//! Functions understood by the in-process engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::api::{ASSIGN_FUNCTION, GET_VARIABLE_FUNCTION, RemoteFailure, failure_ids};
use crate::sink::{ConsoleSink, SinkRef, TextSink};
use crate::value::Value;

const PAUSE_SLICE: Duration = Duration::from_millis(5);

/// Execution context for one call.
pub(crate) struct Frame<'a> {
    pub(crate) workspace: &'a mut BTreeMap<String, Value>,
    pub(crate) interrupt: &'a AtomicBool,
    pub(crate) stdout: Option<&'a SinkRef>,
    pub(crate) stderr: Option<&'a SinkRef>,
}

impl Frame<'_> {
    fn print(&self, text: &str) {
        match self.stdout {
            Some(sink) => sink.write_text(text),
            None => ConsoleSink::Stdout.write_text(text),
        }
    }

    fn print_err(&self, text: &str) {
        match self.stderr {
            Some(sink) => sink.write_text(text),
            None => ConsoleSink::Stderr.write_text(text),
        }
    }
}

/// How a call ended.
#[derive(Debug)]
pub(crate) enum Eval {
    Values(Vec<Value>),
    Failed(RemoteFailure),
    Interrupted,
    Terminate,
}

type Produced = Result<Vec<Value>, Eval>;

fn fail(identifier: &str, message: impl Into<String>) -> Eval {
    Eval::Failed(RemoteFailure::new(identifier, message))
}

fn arity(function: &str, args: &[Value], expected: usize) -> Result<(), Eval> {
    if args.len() < expected {
        return Err(fail(failure_ids::INVALID_INPUT, "Not enough input arguments."));
    }
    if args.len() > expected {
        return Err(fail(
            failure_ids::INVALID_INPUT,
            format!("Too many input arguments in call to '{function}'."),
        ));
    }
    Ok(())
}

fn numeric(function: &str, value: &Value) -> Result<f64, Eval> {
    value.as_f64().ok_or_else(|| {
        fail(
            failure_ids::INVALID_INPUT,
            format!(
                "Check for incorrect argument data type in call to function '{function}' (got {}).",
                value.type_name()
            ),
        )
    })
}

fn text<'v>(function: &str, value: &'v Value) -> Result<&'v str, Eval> {
    value.as_str().ok_or_else(|| {
        fail(
            failure_ids::INVALID_INPUT,
            format!("'{function}' expects a character vector, got {}.", value.type_name()),
        )
    })
}

/// Run `function` and shape its outputs to `nargout`.
pub(crate) fn evaluate(
    frame: &mut Frame<'_>,
    function: &str,
    nargout: usize,
    args: &[Value],
) -> Eval {
    let produced = match function {
        "sqrt" => sqrt(args),
        "plus" => arithmetic(function, args, i64::checked_add, |a, b| a + b),
        "times" => arithmetic(function, args, i64::checked_mul, |a, b| a * b),
        "deal" => deal(nargout, args),
        "disp" => disp(frame, args),
        "warning" => warning(frame, args),
        "error" => Err(raise(args)),
        "pause" => pause(frame, args),
        "whos" => whos(frame),
        "exit" | "quit" => {
            if nargout > 0 {
                Ok(Vec::new())
            } else {
                return Eval::Terminate;
            }
        }
        GET_VARIABLE_FUNCTION => get_variable(frame, args),
        ASSIGN_FUNCTION => assign_in(frame, args),
        _ => Err(fail(
            failure_ids::UNDEFINED_FUNCTION,
            format!("Undefined function '{function}' for input arguments."),
        )),
    };

    match produced {
        Ok(mut values) => {
            if nargout > values.len() {
                return fail(failure_ids::TOO_MANY_OUTPUTS, "Too many output arguments.");
            }
            values.truncate(nargout);
            Eval::Values(values)
        }
        Err(eval) => eval,
    }
}

fn sqrt(args: &[Value]) -> Produced {
    arity("sqrt", args, 1)?;
    let x = numeric("sqrt", &args[0])?;
    if x < 0.0 {
        return Err(fail(
            failure_ids::INVALID_INPUT,
            "Complex results are not supported.",
        ));
    }
    Ok(vec![Value::Double(x.sqrt())])
}

fn arithmetic(
    function: &str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Produced {
    arity(function, args, 2)?;
    if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
        if let Some(v) = int_op(*a, *b) {
            return Ok(vec![Value::Int(v)]);
        }
    }
    let a = numeric(function, &args[0])?;
    let b = numeric(function, &args[1])?;
    Ok(vec![Value::Double(float_op(a, b))])
}

fn deal(nargout: usize, args: &[Value]) -> Produced {
    match args {
        [] => Err(fail(failure_ids::INVALID_INPUT, "Not enough input arguments.")),
        [single] => Ok(vec![single.clone(); nargout.max(1)]),
        many if many.len() == nargout => Ok(many.to_vec()),
        _ => Err(fail(
            failure_ids::INVALID_INPUT,
            "The number of outputs should match the number of inputs.",
        )),
    }
}

fn disp(frame: &Frame<'_>, args: &[Value]) -> Produced {
    arity("disp", args, 1)?;
    match &args[0] {
        Value::Text(s) => frame.print(&format!("{s}\n")),
        other => frame.print(&format!("{other}\n")),
    }
    Ok(Vec::new())
}

fn warning(frame: &Frame<'_>, args: &[Value]) -> Produced {
    arity("warning", args, 1)?;
    let message = text("warning", &args[0])?;
    frame.print_err(&format!("Warning: {message}\n"));
    Ok(Vec::new())
}

fn raise(args: &[Value]) -> Eval {
    match args {
        [Value::Text(message)] => fail(failure_ids::USER_ERROR, message.clone()),
        [Value::Text(identifier), Value::Text(message)] => fail(identifier, message.clone()),
        _ => fail(
            failure_ids::INVALID_INPUT,
            "error expects a message or an identifier and a message.",
        ),
    }
}

fn pause(frame: &Frame<'_>, args: &[Value]) -> Produced {
    arity("pause", args, 1)?;
    let seconds = numeric("pause", &args[0])?;
    let Some(deadline) = Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|span| Instant::now().checked_add(span))
    else {
        return Err(fail(
            failure_ids::INVALID_INPUT,
            "pause expects a non-negative finite number of seconds.",
        ));
    };
    loop {
        if frame.interrupt.load(Ordering::SeqCst) {
            return Err(Eval::Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(Vec::new());
        }
        std::thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}

fn whos(frame: &Frame<'_>) -> Produced {
    let mut out = String::new();
    for (name, value) in frame.workspace.iter() {
        out.push_str(&format!("  {name:<16} {}\n", value.type_name()));
    }
    frame.print(&out);
    Ok(Vec::new())
}

fn get_variable(frame: &Frame<'_>, args: &[Value]) -> Produced {
    arity(GET_VARIABLE_FUNCTION, args, 1)?;
    let name = text(GET_VARIABLE_FUNCTION, &args[0])?;
    match frame.workspace.get(name) {
        Some(value) => Ok(vec![value.clone()]),
        None => Err(fail(
            failure_ids::UNDEFINED_VARIABLE,
            format!("Undefined function or variable '{name}'."),
        )),
    }
}

fn assign_in(frame: &mut Frame<'_>, args: &[Value]) -> Produced {
    arity(ASSIGN_FUNCTION, args, 3)?;
    let scope = text(ASSIGN_FUNCTION, &args[0])?;
    if scope != "base" && scope != "caller" {
        return Err(fail(
            failure_ids::INVALID_INPUT,
            "The workspace must be 'base' or 'caller'.",
        ));
    }
    let name = text(ASSIGN_FUNCTION, &args[1])?;
    frame.workspace.insert(name.to_string(), args[2].clone());
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sink::SharedBuffer;

    fn run(
        workspace: &mut BTreeMap<String, Value>,
        function: &str,
        nargout: usize,
        args: &[Value],
    ) -> Eval {
        let interrupt = AtomicBool::new(false);
        let sink: SinkRef = Arc::new(SharedBuffer::new());
        let mut frame = Frame {
            workspace,
            interrupt: &interrupt,
            stdout: Some(&sink),
            stderr: Some(&sink),
        };
        evaluate(&mut frame, function, nargout, args)
    }

    fn failure_id(eval: Eval) -> String {
        match eval {
            Eval::Failed(f) => f.identifier().to_string(),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn sqrt_returns_double() {
        let mut ws = BTreeMap::new();
        match run(&mut ws, "sqrt", 1, &[Value::Double(4.0)]) {
            Eval::Values(v) => assert_eq!(v, vec![Value::Double(2.0)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outputs_are_truncated_to_nargout() {
        let mut ws = BTreeMap::new();
        match run(&mut ws, "sqrt", 0, &[Value::Int(9)]) {
            Eval::Values(v) => assert!(v.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn too_many_outputs_is_reported() {
        let mut ws = BTreeMap::new();
        let eval = run(&mut ws, "sqrt", 2, &[Value::Int(9)]);
        assert_eq!(failure_id(eval), failure_ids::TOO_MANY_OUTPUTS);
    }

    #[test]
    fn deal_replicates_or_matches_inputs() {
        let mut ws = BTreeMap::new();
        match run(&mut ws, "deal", 3, &[Value::Int(7)]) {
            Eval::Values(v) => assert_eq!(v, vec![Value::Int(7); 3]),
            other => panic!("unexpected {other:?}"),
        }
        let eval = run(&mut ws, "deal", 3, &[Value::Int(1), Value::Int(2)]);
        assert_eq!(failure_id(eval), failure_ids::INVALID_INPUT);
    }

    #[test]
    fn pause_rejects_unrepresentable_durations() {
        let mut ws = BTreeMap::new();
        for seconds in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            let eval = run(&mut ws, "pause", 0, &[Value::Double(seconds)]);
            assert_eq!(failure_id(eval), failure_ids::INVALID_INPUT, "pause({seconds})");
        }
    }

    #[test]
    fn integer_overflow_falls_back_to_double() {
        let mut ws = BTreeMap::new();
        match run(&mut ws, "plus", 1, &[Value::Int(i64::MAX), Value::Int(1)]) {
            Eval::Values(v) => assert_eq!(v, vec![Value::Double(i64::MAX as f64 + 1.0)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn workspace_round_trip_and_missing_variable() {
        let mut ws = BTreeMap::new();
        let assigned = run(
            &mut ws,
            ASSIGN_FUNCTION,
            0,
            &[Value::from("base"), Value::from("x"), Value::Int(5)],
        );
        assert!(matches!(assigned, Eval::Values(ref v) if v.is_empty()));

        match run(&mut ws, GET_VARIABLE_FUNCTION, 1, &[Value::from("x")]) {
            Eval::Values(v) => assert_eq!(v, vec![Value::Int(5)]),
            other => panic!("unexpected {other:?}"),
        }

        let eval = run(&mut ws, GET_VARIABLE_FUNCTION, 1, &[Value::from("y")]);
        assert_eq!(failure_id(eval), failure_ids::UNDEFINED_VARIABLE);
    }

    #[test]
    fn error_uses_given_identifier() {
        let mut ws = BTreeMap::new();
        let eval = run(&mut ws, "error", 0, &[Value::from("my:id"), Value::from("boom")]);
        assert_eq!(failure_id(eval), "my:id");

        let eval = run(&mut ws, "nosuchfunction", 1, &[]);
        assert_eq!(failure_id(eval), failure_ids::UNDEFINED_FUNCTION);
    }

    #[test]
    fn pause_honours_interrupt() {
        let mut ws = BTreeMap::new();
        let interrupt = AtomicBool::new(true);
        let mut frame = Frame {
            workspace: &mut ws,
            interrupt: &interrupt,
            stdout: None,
            stderr: None,
        };
        assert!(matches!(
            evaluate(&mut frame, "pause", 0, &[Value::Double(10.0)]),
            Eval::Interrupted
        ));
    }

    #[test]
    fn disp_writes_to_stdout_sink() {
        let mut ws = BTreeMap::new();
        let interrupt = AtomicBool::new(false);
        let buf = SharedBuffer::new();
        let sink: SinkRef = Arc::new(buf.clone());
        let mut frame = Frame {
            workspace: &mut ws,
            interrupt: &interrupt,
            stdout: Some(&sink),
            stderr: None,
        };
        evaluate(&mut frame, "disp", 0, &[Value::from("hello")]);
        assert_eq!(buf.contents(), "hello\n");
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conv_core::VectorOutcome;
use conv_exec::{run_bounded, CommandSpec, ExecStatus, Interrupt};
use conv_scenario::{TestVector, ERROR_SENTINEL};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::compare::output_matches;
use crate::runner::VerifyError;
use crate::template::{expand, Placeholders};

/// Everything a vector invocation needs, shared across workers.
#[derive(Clone, Debug)]
pub struct VectorContext {
    pub invoke: Vec<String>,
    pub build_dir: PathBuf,
    pub target: PathBuf,
    pub timeout: Duration,
    pub tolerance: f64,
    pub interrupt: Interrupt,
}

/// Replay every vector, at most `workers` at a time. All vectors run even after failures;
/// outcomes come back in declaration order whatever the concurrency.
pub async fn run_vectors(ctx: Arc<VectorContext>, vectors: &[TestVector], workers: usize) -> Result<Vec<VectorOutcome>, VerifyError> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for (index, v) in vectors.iter().cloned().enumerate() {
        let ctx = ctx.clone();
        let permits = permits.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|e| VerifyError::Other(e.into()))?;
            run_one(&ctx, index, v).await
        });
    }
    let mut outcomes = Vec::with_capacity(vectors.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(o)) => outcomes.push(o),
            Ok(Err(e)) => {
                set.abort_all();
                return Err(e);
            }
            Err(e) => return Err(VerifyError::Other(anyhow::anyhow!("vector task panicked: {e}"))),
        }
    }
    outcomes.sort_by_key(|o| o.index);
    Ok(outcomes)
}

async fn run_one(ctx: &VectorContext, index: usize, v: TestVector) -> Result<VectorOutcome, VerifyError> {
    let argv = expand(
        &ctx.invoke,
        &Placeholders {
            build_dir: Some(&ctx.build_dir),
            target: Some(&ctx.target),
            function: Some(&v.function),
            inputs: &v.inputs,
        },
    );
    let mut outcome = VectorOutcome {
        index,
        function: v.function.clone(),
        inputs: v.inputs.clone(),
        expected: v.expected.clone(),
        actual: None,
        matched: false,
        error: None,
    };
    let Some(spec) = CommandSpec::from_argv(&argv) else {
        outcome.error = Some("empty invoke command".to_string());
        return Ok(outcome);
    };
    let spec = spec.cwd(&ctx.build_dir);
    let out = match run_bounded(&spec, ctx.timeout, &ctx.interrupt).await {
        Ok(out) => out,
        Err(e) => {
            outcome.error = Some(format!("{e:#}"));
            return Ok(outcome);
        }
    };
    let stdout = out.stdout_str().trim().to_string();
    match out.status {
        ExecStatus::Interrupted => return Err(VerifyError::Interrupted),
        ExecStatus::TimedOut => {
            outcome.error = Some(format!("timed out after {}s", ctx.timeout.as_secs_f64()));
        }
        ExecStatus::Exited { success, code } => {
            let signaled_error = !success || stdout == ERROR_SENTINEL;
            if v.expects_error() {
                outcome.matched = signaled_error;
                outcome.actual = Some(if signaled_error { ERROR_SENTINEL.to_string() } else { stdout });
            } else if !success {
                outcome.error = Some(format!("exit {:?}: {}", code, out.stderr_str().trim()));
                outcome.actual = Some(stdout).filter(|s| !s.is_empty());
            } else {
                outcome.matched = output_matches(&v.expected, &stdout, ctx.tolerance);
                outcome.actual = Some(stdout);
            }
        }
    }
    debug!(index, function = %v.function, matched = outcome.matched, "vector done");
    Ok(outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn vector(function: &str, inputs: Vec<serde_json::Value>, expected: serde_json::Value) -> TestVector {
        TestVector { function: function.into(), inputs, expected }
    }

    /// A shell "program" implementing add and divide, erroring on division by zero.
    const CALC: &str = r#"case "$0" in
  add) echo $(($1 + $2)) ;;
  divide) if [ "$2" -eq 0 ]; then echo "division by zero" >&2; exit 1; fi; echo $(($1 / $2)) ;;
  slow) sleep 30 ;;
  *) echo "unknown $0" >&2; exit 2 ;;
esac"#;

    fn ctx(dir: &std::path::Path, timeout: Duration) -> Arc<VectorContext> {
        Arc::new(VectorContext {
            invoke: vec!["sh".into(), "-c".into(), CALC.into(), "{function}".into(), "{inputs}".into()],
            build_dir: dir.to_path_buf(),
            target: dir.to_path_buf(),
            timeout,
            tolerance: 1e-9,
            interrupt: Interrupt::new(),
        })
    }

    fn vectors() -> Vec<TestVector> {
        vec![
            vector("add", vec![json!(2), json!(3)], json!(5)),
            vector("divide", vec![json!(10), json!(0)], json!("error")),
            vector("add", vec![json!(1), json!(1)], json!(3)),
            vector("divide", vec![json!(9), json!(3)], json!("error")),
            vector("divide", vec![json!(9), json!(3)], json!(3)),
        ]
    }

    #[tokio::test]
    async fn outcomes_are_complete_and_ordered() {
        let dir = tempdir().unwrap();
        let out = run_vectors(ctx(dir.path(), Duration::from_secs(10)), &vectors(), 4).await.unwrap();
        let matched: Vec<bool> = out.iter().map(|o| o.matched).collect();
        assert_eq!(matched, vec![true, true, false, false, true]);
        assert_eq!(out.iter().map(|o| o.index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(out[2].actual.as_deref(), Some("2"));
        assert_eq!(out[1].actual.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn sequential_and_parallel_agree() {
        let dir = tempdir().unwrap();
        let seq = run_vectors(ctx(dir.path(), Duration::from_secs(10)), &vectors(), 1).await.unwrap();
        let par = run_vectors(ctx(dir.path(), Duration::from_secs(10)), &vectors(), 8).await.unwrap();
        assert_eq!(seq, par);
    }

    #[tokio::test]
    async fn timeout_is_a_failed_vector_not_an_error() {
        let dir = tempdir().unwrap();
        let vs = vec![vector("slow", vec![], json!(1)), vector("add", vec![json!(1), json!(2)], json!(3))];
        let out = run_vectors(ctx(dir.path(), Duration::from_millis(200)), &vs, 2).await.unwrap();
        assert!(!out[0].matched);
        assert!(out[0].error.as_deref().unwrap().starts_with("timed out"));
        assert!(out[1].matched);
    }

    #[tokio::test]
    async fn interrupt_aborts_the_pool() {
        let dir = tempdir().unwrap();
        let c = ctx(dir.path(), Duration::from_secs(60));
        let trigger = c.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger();
        });
        let vs = vec![vector("slow", vec![], json!(1))];
        let res = tokio::time::timeout(Duration::from_secs(10), run_vectors(c, &vs, 1)).await.unwrap();
        assert!(matches!(res, Err(VerifyError::Interrupted)));
    }
}

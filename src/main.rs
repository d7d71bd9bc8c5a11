use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use tracing::{info, warn};

use jpeval::classpath::ClassPool;
use jpeval::dataflow::{DEFAULT_GENERALIZE_THRESHOLD, EvaluatorConfig, PartialEvaluator};
use jpeval::invocation::{BasicInvocationUnit, ExecutingInvocationUnit, InvocationUnit, ModelRegistry};
use jpeval::ir::Method;
use jpeval::report::{MethodFailure, MethodReport, Report, Timing, write_report};
use jpeval::scan::scan_inputs;
use jpeval::telemetry::init_logging;
use jpeval::value::{
    BasicValueFactory, IdentifiedValueFactory, MultiTypedValueFactory, ParticularValueFactory,
    ValueFactory,
};

/// CLI arguments for jpeval execution.
#[derive(Parser, Debug)]
#[command(
    name = "jpeval",
    about = "Partial evaluation of JVM method bodies into per-instruction abstract frames.",
    version
)]
struct Cli {
    /// Class file or directory of class files.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Only evaluate methods with this name, or whose `Owner.name` label starts with it.
    #[arg(long, value_name = "NAME")]
    method: Option<String>,
    #[arg(long, value_enum, default_value_t = Precision::Ranged)]
    precision: Precision,
    /// Run registered method models for calls with concrete arguments.
    #[arg(long)]
    execute: bool,
    #[arg(long)]
    full_code: bool,
    #[arg(long, default_value_t = DEFAULT_GENERALIZE_THRESHOLD)]
    generalize_threshold: u32,
    #[arg(long)]
    max_evaluations: Option<u32>,
    #[arg(long)]
    lenient_hierarchy: bool,
    #[arg(long)]
    approximate_same_instance: bool,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

/// Value domain precision.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Precision {
    Basic,
    Particular,
    Ranged,
    Identified,
    MultiTyped,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    validate(&cli)?;

    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = scan_inputs(&cli.input)?;
    let scan_ms = scan_started_at.elapsed().as_millis();
    let classes = Arc::new(ClassPool::new(scan.classes).context("failed to build class pool")?);
    let invocation = build_invocation_unit(&cli, Arc::clone(&classes));
    let config = EvaluatorConfig {
        generalize_threshold: cli.generalize_threshold,
        max_evaluations: cli.max_evaluations,
        full_code: cli.full_code,
        lenient_hierarchy: cli.lenient_hierarchy,
    };
    let methods = scan
        .methods
        .iter()
        .filter(|method| matches_filter(method, cli.method.as_deref()))
        .collect::<Vec<_>>();

    let evaluation_started_at = Instant::now();
    let outcomes = methods
        .par_iter()
        .map(|method| evaluate_method(method, &classes, &invocation, &config, cli.timing))
        .collect::<Vec<_>>();
    let evaluation_ms = evaluation_started_at.elapsed().as_millis();

    let mut report = Report::default();
    for outcome in outcomes {
        match outcome {
            Ok(method) => report.methods.push(method),
            Err(failure) => report.failures.push(failure),
        }
    }
    if cli.timing {
        report.timing = Some(Timing {
            scan_ms,
            evaluation_ms,
            total_ms: started_at.elapsed().as_millis(),
        });
    }

    let mut writer = output_writer(cli.output.as_deref())?;
    write_report(&report, &mut writer)?;

    if !cli.quiet {
        info!(
            classes = scan.class_count,
            methods = report.methods.len(),
            failures = report.failures.len(),
            "evaluation complete"
        );
    }
    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} evaluation_ms={} classes={} methods={}",
            started_at.elapsed().as_millis(),
            scan_ms,
            evaluation_ms,
            scan.class_count,
            methods.len()
        );
    }

    Ok(())
}

fn validate(cli: &Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    if cli.generalize_threshold == 0 {
        anyhow::bail!("--generalize-threshold must be at least 1");
    }
    if cli.max_evaluations == Some(0) {
        anyhow::bail!("--max-evaluations must be at least 1");
    }
    if cli.approximate_same_instance && !cli.execute {
        anyhow::bail!("--approximate-same-instance requires --execute");
    }
    Ok(())
}

fn matches_filter(method: &Method, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(filter) => {
            method.name == filter
                || format!("{}.{}", method.class_name, method.name).starts_with(filter)
        }
    }
}

fn build_factory(precision: Precision) -> Arc<dyn ValueFactory> {
    match precision {
        Precision::Basic => Arc::new(BasicValueFactory),
        Precision::Particular => Arc::new(ParticularValueFactory::new()),
        Precision::Ranged => Arc::new(ParticularValueFactory::with_ranges()),
        Precision::Identified => Arc::new(IdentifiedValueFactory::default()),
        Precision::MultiTyped => {
            Arc::new(MultiTypedValueFactory::new(IdentifiedValueFactory::default()))
        }
    }
}

fn build_invocation_unit(cli: &Cli, classes: Arc<ClassPool>) -> Arc<dyn InvocationUnit> {
    let basic = BasicInvocationUnit::new(build_factory(cli.precision), classes);
    if !cli.execute {
        return Arc::new(basic);
    }
    let registry = ModelRegistry::registered();
    info!(models = registry.len(), "executing registered method models");
    Arc::new(
        ExecutingInvocationUnit::new(basic, Arc::new(registry))
            .with_approximate_same_instance(cli.approximate_same_instance),
    )
}

fn evaluate_method(
    method: &Method,
    classes: &Arc<ClassPool>,
    invocation: &Arc<dyn InvocationUnit>,
    config: &EvaluatorConfig,
    timing: bool,
) -> Result<MethodReport, MethodFailure> {
    let started_at = Instant::now();
    let mut evaluator = PartialEvaluator::new(Arc::clone(classes), Arc::clone(invocation))
        .with_config(config.clone());
    match evaluator.evaluate(method) {
        Ok(analysis) => {
            let mut report = MethodReport::from_analysis(method, analysis);
            if timing {
                report.duration_ms = Some(started_at.elapsed().as_millis());
            }
            Ok(report)
        }
        Err(err) => {
            warn!(method = %method.display_name(), "evaluation failed: {err:#}");
            Err(MethodFailure {
                method: method.display_name(),
                error: format!("{err:#}"),
            })
        }
    }
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dataflow::MethodAnalysis;
use crate::ir::{ExceptionHandler, Method};
use crate::value::InstructionOffsets;

/// Top level JSON document written by the CLI.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub tool: ToolInfo,
    pub methods: Vec<MethodReport>,
    pub failures: Vec<MethodFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
}

#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for ToolInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MethodReport {
    pub method: String,
    pub traced_offsets: Vec<u32>,
    pub instructions: Vec<InstructionReport>,
    pub unused_handlers: Vec<ExceptionHandler>,
    #[serde(skip_serializing_if = "is_zero")]
    pub degraded_joins: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
}

/// Before-frame and control flow facts of one traced instruction.
#[derive(Debug, Serialize)]
pub struct InstructionReport {
    pub offset: u32,
    pub evaluation_count: u32,
    /// Bottom of the stack first.
    pub stack: Vec<String>,
    /// `null` marks a slot without a usable value.
    pub variables: Vec<Option<String>>,
    #[serde(skip_serializing_if = "InstructionOffsets::is_empty")]
    pub branch_origins: InstructionOffsets,
    #[serde(skip_serializing_if = "InstructionOffsets::is_empty")]
    pub branch_targets: InstructionOffsets,
    #[serde(skip_serializing_if = "is_false")]
    pub subroutine_invocation: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub subroutine_start: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub subroutine_return: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub exception_handler: bool,
}

#[derive(Debug, Serialize)]
pub struct MethodFailure {
    pub method: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Timing {
    pub scan_ms: u128,
    pub evaluation_ms: u128,
    pub total_ms: u128,
}

impl MethodReport {
    pub fn from_analysis(method: &Method, analysis: &MethodAnalysis) -> Self {
        let instructions = analysis
            .traced_offsets()
            .filter_map(|offset| {
                let record = analysis.record(offset)?;
                let before = record.before.as_ref()?;
                Some(InstructionReport {
                    offset,
                    evaluation_count: record.evaluation_count,
                    stack: before.stack.iter().map(ToString::to_string).collect(),
                    variables: before
                        .variables
                        .iter()
                        .map(|(_, value)| value.map(ToString::to_string))
                        .collect(),
                    branch_origins: record.branch_origins.clone(),
                    branch_targets: record.branch_targets.clone(),
                    subroutine_invocation: record.subroutine_invocation,
                    subroutine_start: record.subroutine_start,
                    subroutine_return: record.subroutine_return,
                    exception_handler: record.exception_handler,
                })
            })
            .collect();
        Self {
            method: method.display_name(),
            traced_offsets: analysis.traced_offsets().collect(),
            instructions,
            unused_handlers: analysis.unused_handlers().into_iter().cloned().collect(),
            degraded_joins: analysis.degraded_joins(),
            duration_ms: None,
        }
    }
}

/// Write `report` as pretty-printed JSON followed by a newline.
pub fn write_report(report: &Report, writer: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report).context("failed to serialize report")?;
    writer
        .write_all(b"\n")
        .context("failed to write report")?;
    Ok(())
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classpath::ClassPool;
    use crate::dataflow::PartialEvaluator;
    use crate::invocation::BasicInvocationUnit;
    use crate::test_harness::MethodBuilder;
    use crate::value::ParticularValueFactory;

    fn analyze(method: &Method) -> MethodReport {
        let classes = Arc::new(ClassPool::platform());
        let unit = BasicInvocationUnit::new(
            Arc::new(ParticularValueFactory::with_ranges()),
            Arc::clone(&classes),
        );
        let mut evaluator = PartialEvaluator::new(classes, Arc::new(unit));
        let analysis = evaluator.evaluate(method).expect("evaluate");
        MethodReport::from_analysis(method, analysis)
    }

    #[test]
    fn report_lists_traced_instructions_and_unused_handlers() {
        // 0: iconst_2; 1: ireturn; 2: astore_0 (handler for nothing traced); 3: aconst_null; 4: areturn
        let method = MethodBuilder::new("()I")
            .name("constant")
            .max_locals(1)
            .code(vec![0x05, 0xac, 0x4b, 0x01, 0xb0])
            .handler(3, 4, 2, None)
            .build();

        let report = analyze(&method);

        assert_eq!(report.method, "demo/Sample.constant()I");
        assert_eq!(report.traced_offsets, vec![0, 1]);
        assert_eq!(report.instructions[1].stack.len(), 1);
        assert_eq!(report.unused_handlers.len(), 1);
    }

    #[test]
    fn report_serializes_without_empty_fields() {
        let method = MethodBuilder::new("()V").build();
        let report = Report {
            methods: vec![analyze(&method)],
            ..Report::default()
        };
        let mut bytes = Vec::new();

        write_report(&report, &mut bytes).expect("write");

        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["tool"]["name"], "jpeval");
        let instruction = &value["methods"][0]["instructions"][0];
        assert_eq!(instruction["offset"], 0);
        assert!(instruction.get("branch_targets").is_none());
        assert!(instruction.get("exception_handler").is_none());
        assert!(value.get("timing").is_none());
    }
}

//! Partial evaluator computing abstract stack and variable frames for JVM method bodies.

pub mod classpath;
pub mod dataflow;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod invocation;
pub mod ir;
pub mod opcodes;
pub mod report;
pub mod scan;
pub mod telemetry;
pub mod value;

#[cfg(test)]
mod test_harness;

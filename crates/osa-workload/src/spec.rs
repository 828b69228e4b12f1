use std::fmt;

use osa_common::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Transfer and block size for one benchmark run, in the benchmark's own notation (`1M`, `500M`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSequence {
    pub transfer_size: String,
    pub block_size: String,
}

impl TestSequence {
    pub fn new(transfer_size: impl Into<String>, block_size: impl Into<String>) -> Self {
        Self {
            transfer_size: transfer_size.into(),
            block_size: block_size.into(),
        }
    }

    pub fn block_bytes(&self) -> Result<u64> {
        parse_size(&self.block_size)
    }
}

/// Configured axes whose cross-product yields the workload specs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IorAxes {
    pub obj_class: Vec<String>,
    pub api: Vec<String>,
    pub test_sequence: Vec<TestSequence>,
    pub flags: Vec<String>,
}

impl Default for IorAxes {
    fn default() -> Self {
        Self {
            obj_class: vec!["RP_2G1".to_string()],
            api: vec!["DFS".to_string()],
            test_sequence: vec![TestSequence::new("1M", "500M")],
            flags: vec!["-v -W -w -r -R".to_string()],
        }
    }
}

impl IorAxes {
    pub fn validate(&self) -> Result<()> {
        let empty = [
            ("obj_class", self.obj_class.is_empty()),
            ("api", self.api.is_empty()),
            ("test_sequence", self.test_sequence.is_empty()),
            ("flags", self.flags.is_empty()),
        ];
        if let Some((name, _)) = empty.iter().find(|(_, is_empty)| *is_empty) {
            return Err(HarnessError::InvalidConfig(format!(
                "ior axis {name} must have at least one entry"
            )));
        }
        for sequence in &self.test_sequence {
            sequence.block_bytes()?;
            parse_size(&sequence.transfer_size)?;
        }
        Ok(())
    }

    /// Cross-product in object class, api, sequence, flags order.
    pub fn expand(&self) -> Vec<WorkloadSpec> {
        let mut specs = Vec::with_capacity(
            self.obj_class.len() * self.api.len() * self.test_sequence.len() * self.flags.len(),
        );
        for obj_class in &self.obj_class {
            for api in &self.api {
                for (sequence_id, sequence) in self.test_sequence.iter().enumerate() {
                    for flags in &self.flags {
                        specs.push(WorkloadSpec {
                            obj_class: obj_class.clone(),
                            api: api.clone(),
                            sequence_id,
                            sequence: sequence.clone(),
                            flags: flags.clone(),
                            replicas: replica_count(obj_class),
                        });
                    }
                }
            }
        }
        specs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub obj_class: String,
    pub api: String,
    pub sequence_id: usize,
    pub sequence: TestSequence,
    pub flags: String,
    pub replicas: u32,
}

impl fmt::Display for WorkloadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/seq{}/[{}]",
            self.obj_class, self.api, self.sequence_id, self.flags
        )
    }
}

/// One job of a spec; `job` numbers the repetitions of the same spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadTask {
    pub spec: WorkloadSpec,
    pub job: usize,
}

pub fn expand_tasks(specs: &[WorkloadSpec], jobs_per_spec: usize) -> Vec<WorkloadTask> {
    specs
        .iter()
        .flat_map(|spec| {
            (0..jobs_per_spec).map(move |job| WorkloadTask {
                spec: spec.clone(),
                job,
            })
        })
        .collect()
}

/// `RP_3G1` keeps three replicas; every other class is counted as one.
fn replica_count(obj_class: &str) -> u32 {
    obj_class
        .strip_prefix("RP_")
        .map(|rest| {
            rest.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
        })
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(1)
}

pub(crate) fn parse_size(raw: &str) -> Result<u64> {
    let value = raw.trim();
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let number = digits
        .parse::<u64>()
        .map_err(|_| HarnessError::InvalidConfig(format!("invalid size: {raw:?}")))?;
    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => {
            return Err(HarnessError::InvalidConfig(format!(
                "invalid size suffix {other:?} in {raw:?}"
            )));
        }
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| HarnessError::InvalidConfig(format!("size overflows: {raw:?}")))
}

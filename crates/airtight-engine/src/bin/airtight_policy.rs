//! Applies a protection policy to a serialized host snapshot and prints the
//! resulting report.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use airtight_engine::object_model::ObjectHeap;
use airtight_engine::protection_policy::{
    HostBindings, PolicyError, PolicyRunner, ProtectedRootSet, ProtectionConfig, RootSpec,
};
use serde::Deserialize;

const USAGE: &str = "\
usage: airtight_policy apply --input <snapshot.json> [--config <config.json>] [--summary]

  --input    host snapshot with `heap`, `bindings`, `roots` and an optional `config`
  --config   protection config that replaces the snapshot's own
  --summary  print the status line instead of the JSON report";

/// Host snapshot read from `--input`.
#[derive(Debug, Deserialize)]
struct HostSnapshot {
    heap: ObjectHeap,
    bindings: HostBindings,
    roots: Vec<RootSpec>,
    #[serde(default)]
    config: ProtectionConfig,
}

#[derive(Debug, PartialEq, Eq)]
struct ApplyArgs {
    input: PathBuf,
    config: Option<PathBuf>,
    summary: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match parse_args(&args) {
        Ok(Some(apply)) => apply_policy(&apply),
        Ok(None) => Ok(USAGE.to_string()),
        Err(message) => Err(message),
    };
    match outcome {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("airtight_policy: {message}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(None)` asks for the usage text.
fn parse_args(args: &[String]) -> Result<Option<ApplyArgs>, String> {
    let mut rest = args.iter();
    match rest.next().map(String::as_str) {
        Some("apply") => {}
        Some("help" | "--help" | "-h") => return Ok(None),
        Some(other) => return Err(format!("unknown command '{other}'\n{USAGE}")),
        None => return Err(USAGE.to_string()),
    }

    let mut input = None;
    let mut config = None;
    let mut summary = false;
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--input" => input = Some(PathBuf::from(rest.next().ok_or("--input needs a path")?)),
            "--config" => {
                config = Some(PathBuf::from(rest.next().ok_or("--config needs a path")?));
            }
            "--summary" => summary = true,
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }

    let input = input.ok_or("--input <snapshot.json> is required")?;
    Ok(Some(ApplyArgs {
        input,
        config,
        summary,
    }))
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|error| format!("cannot read {}: {error}", path.display()))
}

fn policy_failure(error: PolicyError) -> String {
    format!("[{}] {error}", error.error_code())
}

fn apply_policy(args: &ApplyArgs) -> Result<String, String> {
    let HostSnapshot {
        mut heap,
        mut bindings,
        roots,
        config,
    } = serde_json::from_str(&read_file(&args.input)?)
        .map_err(|error| format!("malformed snapshot {}: {error}", args.input.display()))?;
    let config = match &args.config {
        Some(path) => ProtectionConfig::from_json(&read_file(path)?).map_err(policy_failure)?,
        None => config,
    };

    let roots = ProtectedRootSet::new(roots, &config).map_err(policy_failure)?;
    let report = PolicyRunner::new(config)
        .map_err(policy_failure)?
        .apply(&mut heap, &mut bindings, &roots)
        .map_err(policy_failure)?;

    if args.summary {
        Ok(report.summary_line())
    } else {
        serde_json::to_string_pretty(&report)
            .map_err(|error| format!("cannot encode report: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_apply_with_all_flags() {
        let parsed = parse_args(&args(&[
            "apply",
            "--summary",
            "--input",
            "host.json",
            "--config",
            "policy.json",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Some(ApplyArgs {
                input: PathBuf::from("host.json"),
                config: Some(PathBuf::from("policy.json")),
                summary: true,
            })
        );
    }

    #[test]
    fn help_and_errors() {
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), None);
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["apply"])).unwrap_err().contains("--input"));
        assert!(parse_args(&args(&["apply", "--input"])).is_err());
        assert!(parse_args(&args(&["freeze"])).unwrap_err().contains("unknown command"));
    }
}

use serde::de::DeserializeOwned;
use std::process::{Command, ExitStatus, Output};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{0} is not available on this platform")]
    Unsupported(&'static str),
}

pub fn run_command(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;
    check_output(program, output)
}

fn check_output(program: &str, output: Output) -> Result<String, CommandError> {
    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: decode_cmd_stdout(&output.stderr).trim().to_string(),
        });
    }
    Ok(decode_cmd_stdout(&output.stdout))
}

pub fn run_nvidia_smi(args: &[&str]) -> Result<String, CommandError> {
    let first = run_command("nvidia-smi", args);

    #[cfg(target_os = "windows")]
    {
        if let Err(CommandError::Spawn { .. }) = first {
            return run_command(r"C:\Windows\System32\nvidia-smi.exe", args);
        }
    }

    first
}

#[cfg(target_os = "windows")]
pub fn run_powershell(script: &str) -> Result<String, CommandError> {
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    let args = ["-NoProfile", "-NonInteractive", "-Command", wrapped_script.as_str()];
    match run_command("powershell", &args) {
        Err(CommandError::Spawn { .. }) => run_command(
            r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe",
            &args,
        ),
        other => other,
    }
}

#[cfg(not(target_os = "windows"))]
pub fn run_powershell(_script: &str) -> Result<String, CommandError> {
    Err(CommandError::Unsupported("powershell"))
}

/// Parses `ConvertTo-Json` output, which is empty for no rows and a bare object for one row.
pub fn parse_json_rows<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, serde_json::Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<serde_json::Value>(trimmed)? {
        serde_json::Value::Array(rows) => rows.into_iter().map(serde_json::from_value).collect(),
        serde_json::Value::Null => Ok(Vec::new()),
        row => Ok(vec![serde_json::from_value(row)?]),
    }
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | 'e' | 'E' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

pub fn parse_u64_loose(input: &str) -> Option<u64> {
    parse_f64_loose(input).map(|v| if v < 0.0 { 0 } else { v as u64 })
}

pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

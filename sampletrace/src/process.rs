//! Locating the profiled process by its command line.

use log::debug;
use regex::Regex;
use std::ffi::OsStr;
use sysinfo::System;
use thiserror::Error;

/// Errors that can occur during process discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no process command line matches '{pattern}'")]
    NotFound { pattern: String },
}

/// A process whose command line matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundProcess {
    pub pid: u32,
    /// Quoted arguments joined by spaces, as matched against the pattern.
    pub cmdline: String,
}

/// Find the lowest-pid process whose command line matches `cmdline`.
///
/// Processes with a non-empty executable name not containing `name_contains`
/// are skipped without looking at their arguments; an empty hint checks
/// every process.
pub fn find_process(
    cmdline: &Regex,
    name_contains: &str,
) -> Result<FoundProcess, DiscoveryError> {
    let system = System::new_all();
    let mut processes: Vec<_> = system.processes().values().collect();
    processes.sort_by_key(|process| process.pid().as_u32());

    let candidates = processes
        .into_iter()
        .map(|process| (process.pid().as_u32(), process.name(), process.cmd()));

    select_process(candidates, cmdline, name_contains).ok_or_else(|| DiscoveryError::NotFound {
        pattern: cmdline.as_str().to_string(),
    })
}

fn select_process<'a, I, S>(
    candidates: I,
    cmdline: &Regex,
    name_contains: &str,
) -> Option<FoundProcess>
where
    I: IntoIterator<Item = (u32, &'a OsStr, &'a [S])>,
    S: AsRef<OsStr> + 'a,
{
    for (pid, name, args) in candidates {
        let name = name.to_string_lossy();
        if !name.is_empty() && !name.contains(name_contains) {
            continue;
        }

        let line = quote_args(args);
        debug!("cmdline: {}", line);
        if cmdline.is_match(&line) {
            return Some(FoundProcess { pid, cmdline: line });
        }
    }
    None
}

/// Quote each argument and join with spaces.
fn quote_args<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| format!("{:?}", arg.as_ref().to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

//! Isolate meta file parser

/// Termination reason reported by isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolateStatus {
    #[default]
    Ok,
    /// `TO`: CPU or wall time limit hit
    TimeOut,
    /// `SG`: killed by the given signal
    Signal(i32),
    /// `RE`: non-zero exit
    RuntimeError,
    /// `XX`: isolate itself failed
    InternalError,
}

/// Parsed isolate meta file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsolateMeta {
    /// CPU seconds
    pub time: f64,
    pub wall_time: f64,
    /// Peak memory in KiB (cg-mem, or max-rss without cgroups)
    pub memory_kb: u64,
    pub exit_code: i32,
    pub status: IsolateStatus,
    /// Set when the cgroup OOM killer fired
    pub oom_killed: bool,
    pub message: Option<String>,
}

/// Parse the `key:value` lines of an isolate meta file
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut status = "";
    let mut signal = None;

    for (key, value) in content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
    {
        match key {
            "time" => meta.time = value.parse().unwrap_or(meta.time),
            "time-wall" => meta.wall_time = value.parse().unwrap_or(meta.wall_time),
            "cg-mem" | "max-rss" => {
                if let Ok(kb) = value.parse::<u64>() {
                    meta.memory_kb = meta.memory_kb.max(kb);
                }
            }
            "exitcode" => meta.exit_code = value.parse().unwrap_or(0),
            "exitsig" => signal = value.parse::<i32>().ok(),
            "cg-oom-killed" => meta.oom_killed = value == "1",
            "status" => status = value,
            "message" => meta.message = Some(value.to_string()),
            _ => {}
        }
    }

    meta.status = match (status, signal) {
        (_, Some(sig)) if status != "TO" => IsolateStatus::Signal(sig),
        ("TO", _) => IsolateStatus::TimeOut,
        ("SG", None) => IsolateStatus::Signal(0),
        ("XX", _) => IsolateStatus::InternalError,
        ("", _) if meta.exit_code == 0 => IsolateStatus::Ok,
        _ => IsolateStatus::RuntimeError,
    };

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_success() {
        let meta = parse_meta("time:0.015\ntime-wall:0.020\ncg-mem:1024\nmax-rss:900\nexitcode:0\n");

        assert_eq!(meta.time, 0.015);
        assert_eq!(meta.wall_time, 0.020);
        assert_eq!(meta.memory_kb, 1024);
        assert_eq!(meta.status, IsolateStatus::Ok);
        assert!(!meta.oom_killed);
    }

    #[test]
    fn test_parse_meta_timeout_keeps_priority_over_signal() {
        let meta = parse_meta("time:1.000\nstatus:TO\nexitsig:9\nmessage:Time limit exceeded\n");

        assert_eq!(meta.status, IsolateStatus::TimeOut);
        assert_eq!(meta.message.as_deref(), Some("Time limit exceeded"));
    }

    #[test]
    fn test_parse_meta_signal_and_oom() {
        let meta = parse_meta("status:SG\nexitsig:9\ncg-oom-killed:1\n");
        assert_eq!(meta.status, IsolateStatus::Signal(9));
        assert!(meta.oom_killed);
    }

    #[test]
    fn test_parse_meta_nonzero_exit_and_internal() {
        assert_eq!(
            parse_meta("status:RE\nexitcode:3\n").status,
            IsolateStatus::RuntimeError
        );
        assert_eq!(parse_meta("status:XX\n").status, IsolateStatus::InternalError);
        assert_eq!(parse_meta("").status, IsolateStatus::Ok);
    }
}

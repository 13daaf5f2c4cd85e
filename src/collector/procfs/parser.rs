//! Parsers for `/proc` filesystem files and the mount registry.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parsed data from `/proc/[pid]/stat`, up to the resident set size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub tty_nr: i32,
    pub tpgid: i32,
    pub flags: u64,
    pub minflt: u64,
    pub cminflt: u64,
    pub majflt: u64,
    pub cmajflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: i64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss: i64,
}

/// Number of whitespace-separated fields after the comm needed to reach `rss`.
const STAT_REQUIRED_FIELDS: usize = 22;

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because the comm field can contain spaces and parentheses.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    // Find the comm field boundaries (enclosed in parentheses)
    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    let remaining = &content[close_paren + 1..];
    let fields: Vec<&str> = remaining.split_whitespace().collect();

    if fields.len() < STAT_REQUIRED_FIELDS {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected {}+, got {}",
            STAT_REQUIRED_FIELDS,
            fields.len()
        )));
    }

    let parse_i64 = |idx: usize, name: &str| -> Result<i64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    let parse_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    let state = fields[0]
        .chars()
        .next()
        .ok_or_else(|| ParseError::new("missing state"))?;

    Ok(ProcStat {
        pid,
        comm,
        state,
        ppid: parse_i64(1, "ppid")? as i32,
        pgrp: parse_i64(2, "pgrp")? as i32,
        session: parse_i64(3, "session")? as i32,
        tty_nr: parse_i64(4, "tty_nr")? as i32,
        tpgid: parse_i64(5, "tpgid")? as i32,
        flags: parse_u64(6, "flags")?,
        minflt: parse_u64(7, "minflt")?,
        cminflt: parse_u64(8, "cminflt")?,
        majflt: parse_u64(9, "majflt")?,
        cmajflt: parse_u64(10, "cmajflt")?,
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
        cutime: parse_i64(13, "cutime")?,
        cstime: parse_i64(14, "cstime")?,
        priority: parse_i64(15, "priority")?,
        nice: parse_i64(16, "nice")?,
        num_threads: parse_i64(17, "num_threads")?,
        starttime: parse_u64(19, "starttime")?,
        vsize: parse_u64(20, "vsize")?,
        rss: parse_i64(21, "rss")?,
    })
}

/// Parses `/proc/uptime` content, returning the uptime in seconds.
///
/// Format: "12345.67 98765.43" (uptime, idle time).
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))
}

/// Parsed data from `/proc/meminfo`, values in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub shmem: u64,
    pub buffers: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub high_total: u64,
    pub high_free: u64,
}

/// Parses `/proc/meminfo` content.
///
/// Missing keys are left at zero; `HighTotal`/`HighFree` only exist on
/// 32-bit kernels with high memory.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut seen = false;

    let parse_kb = |value: &str| -> u64 {
        value
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "MemTotal" => &mut info.mem_total,
            "MemFree" => &mut info.mem_free,
            "Shmem" => &mut info.shmem,
            "Buffers" => &mut info.buffers,
            "SwapTotal" => &mut info.swap_total,
            "SwapFree" => &mut info.swap_free,
            "HighTotal" => &mut info.high_total,
            "HighFree" => &mut info.high_free,
            _ => continue,
        };
        *slot = parse_kb(value);
        seen = true;
    }

    if !seen {
        return Err(ParseError::new("no known keys in meminfo"));
    }
    Ok(info)
}

/// Parsed data from `/proc/loadavg`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub running: u32,
    pub total: u32,
}

/// Parses `/proc/loadavg` content.
///
/// Format: "0.15 0.10 0.05 1/150 1234"
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ParseError::new("invalid loadavg format"));
    }

    let load1 = parts[0]
        .parse()
        .map_err(|_| ParseError::new("invalid load1"))?;
    let load5 = parts[1]
        .parse()
        .map_err(|_| ParseError::new("invalid load5"))?;
    let load15 = parts[2]
        .parse()
        .map_err(|_| ParseError::new("invalid load15"))?;

    // Format: running/total
    let (running, total) = if let Some((r, t)) = parts[3].split_once('/') {
        (r.parse().unwrap_or(0), t.parse().unwrap_or(0))
    } else {
        (0, 0)
    };

    Ok(LoadAvg {
        load1,
        load5,
        load15,
        running,
        total,
    })
}

/// One entry of the mount registry (`/proc/self/mounts`, fstab format).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub options: String,
    pub dump_frequency: i32,
    pub pass_number: i32,
}

/// Parses the mount registry, preserving line order.
///
/// Lines with fewer than four fields are skipped. Missing dump/pass
/// columns default to zero, like `getmntent(3)`.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(MountEntry {
                source: unescape_mount_field(parts[0]),
                target: unescape_mount_field(parts[1]),
                fs_type: unescape_mount_field(parts[2]),
                options: unescape_mount_field(parts[3]),
                dump_frequency: parts.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
                pass_number: parts.get(5).and_then(|s| s.parse().ok()).unwrap_or(0),
            })
        })
        .collect()
}

/// Decodes the octal escapes (`\040`, `\011`, `\012`, `\134`) the kernel
/// uses for whitespace and backslashes in mount fields.
fn unescape_mount_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

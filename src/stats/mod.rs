use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 会话计数器（所有线程共享）
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_scanned: AtomicU64,
    pub groups_scanned: AtomicU64,
    pub graphs_scanned: AtomicU64,
    pub completions_requested: AtomicU64,
    pub completions_delivered: AtomicU64,
    pub completions_failed: AtomicU64,
    pub completions_cancelled: AtomicU64,
    pub retries: AtomicU64,
    /// 网络流落盘字节
    pub spilled_bytes: AtomicU64,
}

impl SessionStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatsReport {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsReport {
            bytes_scanned: load(&self.bytes_scanned),
            groups_scanned: load(&self.groups_scanned),
            graphs_scanned: load(&self.graphs_scanned),
            completions_requested: load(&self.completions_requested),
            completions_delivered: load(&self.completions_delivered),
            completions_failed: load(&self.completions_failed),
            completions_cancelled: load(&self.completions_cancelled),
            retries: load(&self.retries),
            spilled_bytes: load(&self.spilled_bytes),
            process_rss_bytes: StatsReport::read_process_rss(),
        }
    }
}

/// 某一时刻的计数快照
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsReport {
    pub bytes_scanned: u64,
    pub groups_scanned: u64,
    pub graphs_scanned: u64,
    pub completions_requested: u64,
    pub completions_delivered: u64,
    pub completions_failed: u64,
    pub completions_cancelled: u64,
    pub retries: u64,
    pub spilled_bytes: u64,
    /// 进程级 RSS（从 /proc/self/statm 读取，非 Linux 为 0）
    pub process_rss_bytes: u64,
}

impl StatsReport {
    pub fn read_process_rss() -> u64 {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| {
                // statm: size resident shared ...（单位：页）
                let parts: Vec<&str> = s.split_whitespace().collect();
                parts.get(1)?.parse::<u64>().ok()
            })
            .map(|pages| pages * 4096)
            .unwrap_or(0)
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           bgv-lazy Session Report                ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Process RSS:   {:>33} ║", human_bytes(self.process_rss_bytes))?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Scan:                                            ║")?;
        writeln!(f, "║   bytes:       {:>15}                   ║", human_bytes(self.bytes_scanned))?;
        writeln!(f, "║   groups:      {:>15}                   ║", self.groups_scanned)?;
        writeln!(f, "║   graphs:      {:>15}                   ║", self.graphs_scanned)?;
        writeln!(f, "║   spilled:     {:>15}                   ║", human_bytes(self.spilled_bytes))?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Completion:                                      ║")?;
        writeln!(f, "║   requested:   {:>15}                   ║", self.completions_requested)?;
        writeln!(f, "║   delivered:   {:>15}                   ║", self.completions_delivered)?;
        writeln!(f, "║   failed:      {:>15}                   ║", self.completions_failed)?;
        writeln!(f, "║   cancelled:   {:>15}                   ║", self.completions_cancelled)?;
        writeln!(f, "║   retries:     {:>15}                   ║", self.retries)?;
        write!(f, "╚══════════════════════════════════════════════════╝")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn report_snapshot() {
        let s = SessionStats::default();
        SessionStats::bump(&s.groups_scanned);
        SessionStats::add(&s.bytes_scanned, 100);
        let r = s.report();
        assert_eq!(r.groups_scanned, 1);
        assert_eq!(r.bytes_scanned, 100);
        let text = r.to_string();
        assert!(text.contains("Session Report"));
        assert!(text.contains("100 B"));
    }
}

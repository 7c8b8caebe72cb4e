//! Plain-text scan reports

use crate::probe::{IpFrequencyTable, ProbeResult, ScanReport, ScanSummary};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Datelike, Local, NaiveDate};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const RULE: &str = "--------------------------------------------------------------------";

/// Paths of the report files written for one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub success: PathBuf,
    pub error: PathBuf,
    pub ip: PathBuf,
}

/// Writes the success, error and IP reports of a scan into a directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Write all three reports, appending to same-day files of the same range
    pub fn write(&self, report: &ScanReport) -> Result<ReportFiles> {
        let now = Local::now();
        let stem = Self::file_stem(now.date_naive(), report.summary.port_from, report.summary.port_to);

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create report directory {:?}", self.dir))?;

        let files = ReportFiles {
            success: self.dir.join(format!("{}_success.log", stem)),
            error: self.dir.join(format!("{}_error.log", stem)),
            ip: self.dir.join(format!("{}_ip.log", stem)),
        };

        self.append_to(&files.success, |out| {
            render_results(out, &report.summary, &report.results.success, now)
        })?;
        self.append_to(&files.error, |out| {
            render_results(out, &report.summary, &report.results.error, now)
        })?;
        self.append_to(&files.ip, |out| {
            render_ips(out, &report.summary, &report.ip_frequencies, now)
        })?;

        Ok(files)
    }

    /// `log-<year>-<month>-<day>_<from>_<to>`
    pub fn file_stem(date: NaiveDate, port_from: u16, port_to: u16) -> String {
        format!(
            "log-{}-{}-{}_{}_{}",
            date.year(),
            date.month(),
            date.day(),
            port_from,
            port_to
        )
    }

    fn append_to<F>(&self, path: &Path, render: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<fs::File>) -> io::Result<()>,
    {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open report {:?}", path))?;

        let mut out = BufWriter::new(file);
        render(&mut out).with_context(|| format!("Failed to write report {:?}", path))?;
        out.flush()
            .with_context(|| format!("Failed to flush report {:?}", path))?;
        Ok(())
    }
}

fn render_header<W: Write>(
    out: &mut W,
    summary: &ScanSummary,
    count: usize,
    generated: DateTime<Local>,
) -> io::Result<()> {
    writeln!(out, "Report for proxy")?;
    writeln!(out, "Generated: {}", generated.format("%Y/%m/%d %H:%M:%S"))?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Proxy IP: {}", summary.proxy_template)?;
    writeln!(out, "Dest address: {}", summary.destination)?;
    writeln!(out, "Timeout requests: {}", summary.timeout_secs)?;
    writeln!(out, "Max async requests: {}", summary.concurrency)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Count responses: {}", count)?;
    writeln!(out, "{}", RULE)
}

/// Render a port table; bodies for successes, causes for failures
pub fn render_results<W: Write>(
    out: &mut W,
    summary: &ScanSummary,
    results: &[ProbeResult],
    generated: DateTime<Local>,
) -> io::Result<()> {
    render_header(out, summary, results.len(), generated)?;
    writeln!(out, "{:<7}| RESULT", "PORT")?;
    writeln!(out, "{}", RULE)?;

    for result in results {
        let detail = match (result.body(), result.cause()) {
            (Some(body), _) => single_line(body),
            (None, Some(cause)) => cause.to_string(),
            (None, None) => String::new(),
        };
        writeln!(out, "{:<7}| {}", result.port, detail)?;
    }

    writeln!(out, "{}", RULE)
}

/// Render the IP table, most shared IPs first
pub fn render_ips<W: Write>(
    out: &mut W,
    summary: &ScanSummary,
    table: &IpFrequencyTable,
    generated: DateTime<Local>,
) -> io::Result<()> {
    render_header(out, summary, table.len(), generated)?;
    writeln!(out, "{:<19}| RESULT", "IP")?;
    writeln!(out, "{}", RULE)?;

    for (ip, count) in table.sorted() {
        writeln!(out, "{:<19}| {}", ip, count)?;
    }

    writeln!(out, "{}", RULE)
}

fn single_line(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{AggregateState, ProbeError};
    use chrono::TimeZone;
    use std::time::Duration;

    fn summary() -> ScanSummary {
        ScanSummary {
            proxy_template: "socks5://10.0.0.1:%PORT%".to_string(),
            destination: "https://ip.nf/me.json".to_string(),
            timeout_secs: 60,
            concurrency: 100,
            port_from: 17000,
            port_to: 17002,
            parser: "ip-nf",
        }
    }

    fn generated() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 12, 30, 0).unwrap()
    }

    fn render<F: FnOnce(&mut Vec<u8>) -> io::Result<()>>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_file_stem() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(ReportWriter::file_stem(date, 17000, 17999), "log-2024-3-7_17000_17999");
    }

    #[test]
    fn test_render_results() {
        let results = vec![
            ProbeResult::success(17001, "{\"ip\":\n {\"ip\":\"1.2.3.4\"}}".to_string()),
            ProbeResult::failure(17000, ProbeError::UnexpectedStatus(407)),
        ];
        let text = render(|out| render_results(out, &summary(), &results, generated()));

        assert!(text.starts_with("Report for proxy\n"));
        assert!(text.contains("Generated: 2024/03/07 12:30:00"));
        assert!(text.contains("Proxy IP: socks5://10.0.0.1:%PORT%"));
        assert!(text.contains("Dest address: https://ip.nf/me.json"));
        assert!(text.contains("Count responses: 2"));
        assert!(text.contains("17001  | {\"ip\": {\"ip\":\"1.2.3.4\"}}\n"));
        assert!(text.contains("17000  | unexpected status code 407\n"));
    }

    #[test]
    fn test_render_ips_sorted() {
        let mut table = IpFrequencyTable::new();
        table.record("5.6.7.8".to_string());
        table.record("1.2.3.4".to_string());
        table.record("1.2.3.4".to_string());

        let text = render(|out| render_ips(out, &summary(), &table, generated()));
        let first = text.find("1.2.3.4").unwrap();
        let second = text.find("5.6.7.8").unwrap();
        assert!(first < second);
        assert!(text.contains("Count responses: 2"));
        assert!(text.contains(&format!("{:<19}| 2", "1.2.3.4")));
    }

    #[test]
    fn test_write_creates_three_files() {
        let dir = std::env::temp_dir().join(format!("proxy-egress-{}", uuid::Uuid::new_v4()));
        let report = ScanReport {
            summary: summary(),
            results: AggregateState {
                success: vec![ProbeResult::success(17001, r#"{"ip":{"ip":"1.2.3.4"}}"#.into())],
                error: vec![ProbeResult::failure(17000, ProbeError::Request("refused".into()))],
                received: 2,
            },
            ip_frequencies: IpFrequencyTable::new(),
            elapsed: Duration::from_millis(10),
        };

        let writer = ReportWriter::new(&dir);
        let files = writer.write(&report).unwrap();
        assert!(files.success.exists());
        assert!(files.error.exists());
        assert!(files.ip.exists());

        let error_text = fs::read_to_string(&files.error).unwrap();
        assert!(error_text.contains("17000  | request error: refused"));

        // Re-running the same range on the same day appends
        writer.write(&report).unwrap();
        let error_text = fs::read_to_string(&files.error).unwrap();
        assert_eq!(error_text.matches("Report for proxy").count(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }
}

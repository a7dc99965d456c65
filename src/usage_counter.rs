//! Wraps the external byte-counter tool to read cumulative tx/rx per
//! interface and reset it on overflow.

use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;

const TXRX_MAX: i64 = i64::MAX;

static TOTALRX: Lazy<Regex> = Lazy::new(|| Regex::new(r"totalrx;([0-9]+)\n").unwrap());
static TOTALRXK: Lazy<Regex> = Lazy::new(|| Regex::new(r"totalrxk;([0-9]+)\n").unwrap());
static TOTALTX: Lazy<Regex> = Lazy::new(|| Regex::new(r"totaltx;([0-9]+)\n").unwrap());
static TOTALTXK: Lazy<Regex> = Lazy::new(|| Regex::new(r"totaltxk;([0-9]+)\n").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("byte counter invocation failed")]
    CommandFailed,
    #[error("unparseable byte counter output")]
    Parse,
    #[error("byte counter overflowed, reset triggered")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub tx_kbyte: i64,
    pub rx_kbyte: i64,
}

impl Usage {
    /// Placeholders a caller reports after an overflow reset (spec §4.5,
    /// §8 "makes exactly one subsequent usage() return placeholders").
    pub fn placeholder() -> Self {
        Self {
            tx_kbyte: -1,
            rx_kbyte: -1,
        }
    }
}

/// Wraps `vnstat`-style accounting for one network interface.
pub struct UsageCounter {
    interface: String,
    exe_path: String,
}

impl UsageCounter {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_exe("vnstat", interface)
    }

    pub fn with_exe(exe_path: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            exe_path: exe_path.into(),
        }
    }

    /// Refreshes the underlying database for this interface.
    pub async fn update(&self) -> Result<(), UsageError> {
        self.run(&["-i", &self.interface, "-u"])
            .await
            .map(|_| ())
    }

    /// Reads cumulative usage; on overflow, deletes and restarts the
    /// counter and returns [`UsageError::Overflow`] so the caller reports
    /// placeholders for this call.
    pub async fn usage(&self) -> Result<Usage, UsageError> {
        let output = self.run(&["-i", &self.interface, "--dumpdb"]).await?;

        let rx_gb = capture_int(&TOTALRX, &output)?;
        let rx_kb = capture_int(&TOTALRXK, &output)?;
        let tx_gb = capture_int(&TOTALTX, &output)?;
        let tx_kb = capture_int(&TOTALTXK, &output)?;

        let usage = Usage {
            tx_kbyte: tx_gb * 1024 + tx_kb,
            rx_kbyte: rx_gb * 1024 + rx_kb,
        };

        if usage.tx_kbyte >= TXRX_MAX || usage.rx_kbyte >= TXRX_MAX {
            log::warn!(
                "byte counter overflow tx={} rx={}",
                usage.tx_kbyte,
                usage.rx_kbyte
            );
            self.delete_and_restart().await?;
            return Err(UsageError::Overflow);
        }

        Ok(usage)
    }

    /// Stops the accounting service, deletes its database, then restarts
    /// the service — in that order, so the database file is never
    /// touched while the service might still be writing to it.
    async fn delete_and_restart(&self) -> Result<(), UsageError> {
        self.service("stop").await?;
        self.run(&["-i", &self.interface, "--delete", "--force"])
            .await?;
        self.service("start").await?;
        Ok(())
    }

    async fn service(&self, action: &str) -> Result<(), UsageError> {
        let status = tokio::process::Command::new("service")
            .arg(&self.exe_path)
            .arg(action)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|_| UsageError::CommandFailed)?;
        if status.success() {
            Ok(())
        } else {
            Err(UsageError::CommandFailed)
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, UsageError> {
        let output = tokio::process::Command::new(&self.exe_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|_| UsageError::CommandFailed)?;
        if !output.status.success() {
            return Err(UsageError::CommandFailed);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn capture_int(pattern: &Regex, haystack: &str) -> Result<i64, UsageError> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| {
            log::warn!("parse error in byte counter output");
            UsageError::Parse
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_int_reads_named_field() {
        let sample = "totalrx;42\ntotalrxk;7\ntotaltx;1\ntotaltxk;512\n";
        assert_eq!(capture_int(&TOTALRX, sample).unwrap(), 42);
        assert_eq!(capture_int(&TOTALRXK, sample).unwrap(), 7);
        assert_eq!(capture_int(&TOTALTX, sample).unwrap(), 1);
        assert_eq!(capture_int(&TOTALTXK, sample).unwrap(), 512);
    }

    #[test]
    fn capture_int_missing_field_is_parse_error() {
        assert_eq!(capture_int(&TOTALRX, "nothing here\n"), Err(UsageError::Parse));
    }

    #[test]
    fn usage_combines_gigabyte_and_kilobyte_fields() {
        let rx_gb = 2i64;
        let rx_kb = 500i64;
        let usage = Usage {
            tx_kbyte: 0,
            rx_kbyte: rx_gb * 1024 + rx_kb,
        };
        assert_eq!(usage.rx_kbyte, 2548);
    }

    #[test]
    fn placeholder_reports_negative_one() {
        let usage = Usage::placeholder();
        assert_eq!(usage.tx_kbyte, -1);
        assert_eq!(usage.rx_kbyte, -1);
    }
}

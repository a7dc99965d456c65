//! Serialized, retrying, timed invocations of the external `modem_ctl`
//! helper. This is the only place in the crate that spawns a
//! child process to talk to the modem; everything above this module sees
//! typed `Result`s, never raw exit codes or text.

pub mod parse;
pub mod types;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::PdpType;
use crate::error::{HelperErrorKind, ModemCtlError};

pub use types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(70);
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(120);
const BUSY_MAX_ATTEMPTS: u32 = 10;
const BUSY_SLEEP: Duration = Duration::from_secs(10);
const AT_MAX_ATTEMPTS: u32 = 10;
const EXIT_BUSY: i32 = 60;

/// Outcome of a single child-process invocation, before any retry policy
/// has been applied.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { stdout: String, exit_code: i32 },
    TimedOut,
}

/// Abstraction over "run `modem_ctl` with these arguments", so tests can
/// substitute a scripted fake instead of mocking the typed operations
/// above it.
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, args: &[String], timeout: Duration) -> RunOutcome;
}

/// Spawns the real `modem_ctl` executable.
pub struct SystemRunner {
    exe_path: String,
}

impl SystemRunner {
    pub fn new(exe_path: impl Into<String>) -> Self {
        Self {
            exe_path: exe_path.into(),
        }
    }
}

impl ProcessRunner for SystemRunner {
    async fn run(&self, args: &[String], wait_timeout: Duration) -> RunOutcome {
        let mut cmd = tokio::process::Command::new(&self.exe_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("failed to spawn {}: {e}", self.exe_path);
                return RunOutcome::Completed {
                    stdout: String::new(),
                    exit_code: -1,
                };
            }
        };

        match timeout(wait_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => RunOutcome::Completed {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Ok(Err(e)) => {
                log::warn!("modem_ctl wait failed: {e}");
                RunOutcome::Completed {
                    stdout: String::new(),
                    exit_code: -1,
                }
            }
            Err(_) => RunOutcome::TimedOut,
        }
    }
}

/// Typed, serialized, retrying wrapper over `modem_ctl`.
///
/// The process-wide reentrant mutex described in spec §5 is realized here
/// not as a literal reentrant lock, but by composition: operations that
/// internally call other public operations (`power_cycle`) acquire the
/// lock exactly once for the whole composed operation and call private
/// `*_locked` helpers for the nested steps, so no nested acquisition ever
/// happens and no two invocations can interleave.
pub struct ModemControl<R: ProcessRunner = SystemRunner> {
    runner: Arc<R>,
    lock: Mutex<()>,
}

impl ModemControl<SystemRunner> {
    pub fn new(exe_path: impl Into<String>) -> Self {
        Self::with_runner(Arc::new(SystemRunner::new(exe_path)))
    }
}

impl<R: ProcessRunner> ModemControl<R> {
    pub fn with_runner(runner: Arc<R>) -> Self {
        Self {
            runner,
            lock: Mutex::new(()),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ModemCtlError> {
        timeout(LOCK_ACQUIRE_TIMEOUT, self.lock.lock())
            .await
            .map_err(|_| ModemCtlError::LockTimeout)
    }

    /// Run `args`, retrying exit code 60 ("busy") up to 10 times with a
    /// 10s sleep between attempts. Assumes the caller already
    /// holds the process-wide lock.
    async fn invoke_locked(
        &self,
        args: &[String],
        op_timeout: Duration,
    ) -> Result<String, ModemCtlError> {
        for attempt in 0..BUSY_MAX_ATTEMPTS {
            match self.runner.run(args, op_timeout).await {
                RunOutcome::TimedOut => return Err(ModemCtlError::Timeout),
                RunOutcome::Completed { stdout, exit_code } => {
                    if exit_code == 0 {
                        return Ok(stdout);
                    }
                    if exit_code == EXIT_BUSY {
                        if attempt + 1 == BUSY_MAX_ATTEMPTS {
                            break;
                        }
                        tokio::time::sleep(BUSY_SLEEP).await;
                        continue;
                    }
                    return Err(ModemCtlError::Helper(HelperErrorKind::from_exit_code(
                        exit_code,
                    )));
                }
            }
        }
        Err(ModemCtlError::Helper(HelperErrorKind::Generic))
    }

    async fn invoke(&self, args: &[String], op_timeout: Duration) -> Result<String, ModemCtlError> {
        let _guard = self.acquire().await?;
        self.invoke_locked(args, op_timeout).await
    }

    /// `AT(cmd, [timeoutSec])`: additionally retries transient (timeout)
    /// failures up to 10 times with randomized 0.5-1.5s backoff.
    pub async fn at(&self, cmd: &str, timeout_sec: Option<u64>) -> Result<AtResponse, ModemCtlError> {
        let op_timeout = timeout_sec.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let args = vec!["at".to_string(), cmd.to_string()];

        let mut last_err = ModemCtlError::Timeout;
        for attempt in 0..AT_MAX_ATTEMPTS {
            match self.invoke(&args, op_timeout).await {
                Ok(output) => return parse::parse_at_response(&output),
                Err(ModemCtlError::Timeout) => {
                    last_err = ModemCtlError::Timeout;
                    if attempt + 1 == AT_MAX_ATTEMPTS {
                        break;
                    }
                    let jitter_ms = rand::thread_rng().gen_range(500..=1500);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// `start(apn, authProto, user, password)` → `NetworkInfo`.
    pub async fn start(
        &self,
        apn: &str,
        auth_proto: crate::config::AuthProtocol,
        username: &str,
        password: &str,
    ) -> Result<NetworkInfo, ModemCtlError> {
        let args = vec![
            "start".to_string(),
            format!("APN={apn}"),
            format!("AuthProto={}", auth_proto_str(auth_proto)),
            format!("Username={username}"),
            format!("Password={password}"),
        ];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_start(&output)
    }

    /// `stop()`: idempotent, swallows helper failure.
    pub async fn stop(&self) -> NetworkInfo {
        let args = vec!["stop".to_string()];
        if let Err(e) = self.invoke(&args, DEFAULT_TIMEOUT).await {
            log::debug!("modem_ctl stop failed, ignored: {e}");
        }
        NetworkInfo::down()
    }

    /// `status()` → connected boolean. Exit code 1 means "not connected"
    /// and is not an error.
    pub async fn status(&self) -> Result<bool, ModemCtlError> {
        let args = vec!["status".to_string()];
        let _guard = self.acquire().await?;
        for attempt in 0..BUSY_MAX_ATTEMPTS {
            match self.runner.run(&args, DEFAULT_TIMEOUT).await {
                RunOutcome::TimedOut => return Err(ModemCtlError::Timeout),
                RunOutcome::Completed { exit_code: 0, .. } => return Ok(true),
                RunOutcome::Completed { exit_code: 1, .. } => return Ok(false),
                RunOutcome::Completed { exit_code, .. } if exit_code == EXIT_BUSY => {
                    if attempt + 1 == BUSY_MAX_ATTEMPTS {
                        break;
                    }
                    tokio::time::sleep(BUSY_SLEEP).await;
                }
                RunOutcome::Completed { exit_code, .. } => {
                    return Err(ModemCtlError::Helper(HelperErrorKind::from_exit_code(
                        exit_code,
                    )))
                }
            }
        }
        Err(ModemCtlError::Helper(HelperErrorKind::Generic))
    }

    /// `attach()` → packet service attached boolean.
    pub async fn attach(&self) -> Result<bool, ModemCtlError> {
        let args = vec!["attach".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        Ok(output.trim() == "1" || output.trim().eq_ignore_ascii_case("attached"))
    }

    /// `signal()` / `signalAdv()` → `Signal`.
    pub async fn signal(&self) -> Result<Signal, ModemCtlError> {
        let args = vec!["signal".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_signal(&output)
    }

    pub async fn signal_adv(&self) -> Result<Signal, ModemCtlError> {
        let args = vec!["signal_adv".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_signal_adv(&output)
    }

    /// `operator()` → operator name.
    pub async fn operator(&self) -> Result<String, ModemCtlError> {
        let args = vec!["operator".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_operator(&output)
    }

    /// `mInfo()` → module/location identity block.
    pub async fn m_info(&self) -> Result<ModuleInfo, ModemCtlError> {
        let args = vec!["m_info".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_m_info(&output)
    }

    /// `simStatus()` → nosim/pin/ready.
    pub async fn sim_status(&self) -> Result<SimStatus, ModemCtlError> {
        let args = vec!["sim_status".to_string()];
        let _guard = self.acquire().await?;
        for attempt in 0..BUSY_MAX_ATTEMPTS {
            match self.runner.run(&args, DEFAULT_TIMEOUT).await {
                RunOutcome::TimedOut => return Err(ModemCtlError::Timeout),
                RunOutcome::Completed { exit_code, stdout } if exit_code == 0 => {
                    return parse::parse_sim_status(&stdout)
                }
                RunOutcome::Completed { exit_code, .. } if exit_code == EXIT_BUSY => {
                    if attempt + 1 == BUSY_MAX_ATTEMPTS {
                        break;
                    }
                    tokio::time::sleep(BUSY_SLEEP).await;
                }
                RunOutcome::Completed { .. } => return Ok(SimStatus::NoSim),
            }
        }
        Err(ModemCtlError::Helper(HelperErrorKind::Generic))
    }

    /// `setPin(pin)` → ok or `PinReject`.
    pub async fn set_pin(&self, pin: &str) -> Result<(), ModemCtlError> {
        let args = vec!["set_pin".to_string(), pin.to_string()];
        self.invoke(&args, DEFAULT_TIMEOUT).await.map(|_| ())
    }

    /// `pinRetryRemain()` → remaining PIN attempts, `-1` if disabled.
    pub async fn pin_retry_remain(&self) -> Result<i32, ModemCtlError> {
        let args = vec!["pin_retry_remain".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_pin_retry_remain(&output)
    }

    /// `pdpContextList()` → configured PDP profiles.
    pub async fn pdp_context_list(&self) -> Result<Vec<PdpContextEntry>, ModemCtlError> {
        let args = vec!["pdp_context_list".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        parse::parse_pdp_context_list(&output)
    }

    /// `setPdpContext(id, apn, type)` → ok.
    pub async fn set_pdp_context(
        &self,
        id: u32,
        apn: &str,
        pdp_type: PdpType,
    ) -> Result<(), ModemCtlError> {
        let args = vec![
            "set_pdp_context".to_string(),
            id.to_string(),
            apn.to_string(),
            pdp_type_str(pdp_type).to_string(),
        ];
        self.invoke(&args, DEFAULT_TIMEOUT).await.map(|_| ())
    }

    /// `powerCycle([force], [timeoutSec])`: `powerOff` + 1s sleep +
    /// `powerOn`, all under a single lock acquisition.
    pub async fn power_cycle(&self, timeout_sec: Option<u64>) -> Result<(), ModemCtlError> {
        let op_timeout = timeout_sec.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let _guard = self.acquire().await?;
        self.invoke_locked(&["power_off".to_string()], op_timeout)
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.invoke_locked(&["power_on".to_string()], op_timeout)
            .await?;
        Ok(())
    }

    pub async fn module_ids(&self) -> Result<ModuleIds, ModemCtlError> {
        let args = vec!["module_ids".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        let mut imei = String::new();
        let mut esn = String::new();
        for line in output.lines() {
            if let Some(v) = line.strip_prefix("IMEI=") {
                imei = v.to_string();
            } else if let Some(v) = line.strip_prefix("ESN=") {
                esn = v.to_string();
            }
        }
        Ok(ModuleIds { imei, esn })
    }

    pub async fn sim_info(&self) -> Result<SimInfo, ModemCtlError> {
        let args = vec!["sim_info".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        let mut iccid = String::new();
        let mut imsi = String::new();
        for line in output.lines() {
            if let Some(v) = line.strip_prefix("ICCID=") {
                iccid = v.to_string();
            } else if let Some(v) = line.strip_prefix("IMSI=") {
                imsi = v.to_string();
            }
        }
        Ok(SimInfo { iccid, imsi })
    }

    pub async fn location(&self) -> Result<Location, ModemCtlError> {
        let args = vec!["location".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        let mut loc = Location::default();
        for line in output.lines() {
            if let Some(v) = line.strip_prefix("CellID=") {
                loc.cell_id = v.to_string();
            } else if let Some(v) = line.strip_prefix("LAC=") {
                loc.lac = v.to_string();
            } else if let Some(v) = line.strip_prefix("TAC=") {
                loc.tac = v.to_string();
            } else if let Some(v) = line.strip_prefix("BID=") {
                loc.bid = v.to_string();
            } else if let Some(v) = line.strip_prefix("NID=") {
                loc.nid = v.to_string();
            }
        }
        Ok(loc)
    }

    pub async fn cellular_firmware(&self) -> Result<Vec<String>, ModemCtlError> {
        let args = vec!["cellular_firmware".to_string()];
        let output = self.invoke(&args, DEFAULT_TIMEOUT).await?;
        Ok(output.lines().map(str::to_string).collect())
    }
}

fn pdp_type_str(t: PdpType) -> &'static str {
    match t {
        PdpType::Ipv4 => "IP",
        PdpType::Ipv6 => "IPV6",
        PdpType::Ipv4v6 => "IPV4V6",
    }
}

fn auth_proto_str(p: crate::config::AuthProtocol) -> &'static str {
    match p {
        crate::config::AuthProtocol::None => "none",
        crate::config::AuthProtocol::Pap => "pap",
        crate::config::AuthProtocol::Chap => "chap",
        crate::config::AuthProtocol::Both => "both",
    }
}

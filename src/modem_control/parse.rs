//! Anchored regular expressions over `modem_ctl` textual output. Every
//! pattern here is part of the wire contract — reject
//! unexpected output rather than guess at it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::PdpType;
use crate::error::ModemCtlError;

use super::types::{
    AtResponse, AtStatus, ModuleInfo, NetworkInfo, PdpContextEntry, Signal, SignalMode, SimStatus,
};

static START_IP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^IP=([0-9.]+)$").unwrap());
static START_NETMASK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^SubnetMask=([0-9.]+)$").unwrap());
static START_GATEWAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Gateway=([0-9.]+)$").unwrap());
static START_DNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^DNS=([0-9. ]*)$").unwrap());

static SIGNAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-zA-Z0-9/]+) (-[0-9]+) dbm\n?$").unwrap());

/// `signal_adv` carries the richer `{mode, rssiDbm, ecioDbm, csq}` tuple
/// spec §4.1 types it as; unlike `signal`'s bare `<mode> -<n> dbm` line,
/// its own contract appends the ecio/csq fields rather than reusing
/// `signal`'s pattern and dropping them.
static SIGNAL_ADV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9/]+) (-[0-9]+) dbm, ecio (-?[0-9]+) dB, csq ([0-9]+)\n?$").unwrap()
});

static M_INFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^Module=(\S+)\nWWAN_node=(\S+)\nLAC=(\S+)\nCellID=(\S+)\nICC-ID=(\S+)\nIMEI=(\S+)\nQMI_port=(\S+)",
    )
    .unwrap()
});

static OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\S ]*)\n?$").unwrap());

static SIM_PIN_STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PIN1 state:\s*'([^']*)'").unwrap());
static PIN1_RETRIES: Lazy<Regex> = Lazy::new(|| Regex::new(r"PIN1 retries:\s*'([0-9]+)'").unwrap());

static PDP_LIST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([0-9]+),([^,]+),(IP|IPV4V6|IPV6)$").unwrap());

/// Parse the four-line body of `modem_ctl start` (spec §8 fixture 1).
pub fn parse_start(output: &str) -> Result<NetworkInfo, ModemCtlError> {
    let ip = START_IP
        .captures(output)
        .ok_or(ModemCtlError::Parse)?
        .get(1)
        .unwrap()
        .as_str()
        .to_string();
    let netmask = START_NETMASK
        .captures(output)
        .ok_or(ModemCtlError::Parse)?
        .get(1)
        .unwrap()
        .as_str()
        .to_string();
    let gateway = START_GATEWAY
        .captures(output)
        .ok_or(ModemCtlError::Parse)?
        .get(1)
        .unwrap()
        .as_str()
        .to_string();
    let dns_field = START_DNS
        .captures(output)
        .ok_or(ModemCtlError::Parse)?
        .get(1)
        .unwrap()
        .as_str();
    let dns = dns_field
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(NetworkInfo {
        status: super::types::LinkStatus::Up,
        ip,
        netmask,
        gateway,
        dns,
    })
}

/// Parse `modem_ctl signal` output (spec §8 fixture 2). An out-of-range
/// marker (`n/a ...`) yields a zeroed `Signal` rather than a parse
/// failure. `signal` never carries ecio/csq; callers that need those use
/// [`parse_signal_adv`].
pub fn parse_signal(output: &str) -> Result<Signal, ModemCtlError> {
    let caps = SIGNAL.captures(output.trim_end_matches('\n'))
        .or_else(|| SIGNAL.captures(output))
        .ok_or(ModemCtlError::Parse)?;
    let mode_str = caps.get(1).unwrap().as_str();
    let rssi: i32 = caps
        .get(2)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ModemCtlError::Parse)?;

    if mode_str.eq_ignore_ascii_case("n/a") {
        return Ok(Signal::default());
    }

    Ok(Signal {
        mode: SignalMode::parse(&mode_str.to_ascii_lowercase()),
        rssi_dbm: rssi,
        ecio_dbm: 0,
        csq: 0,
    })
}

/// Parse `modem_ctl signal_adv` output: the same leading
/// `<mode> -<n> dbm` as `signal`, plus `, ecio -<m> dB, csq <k>` carrying
/// the fields `signal` doesn't report. An out-of-range marker (`n/a ...`)
/// yields a zeroed `Signal`, same as `signal`.
pub fn parse_signal_adv(output: &str) -> Result<Signal, ModemCtlError> {
    let caps = SIGNAL_ADV
        .captures(output.trim_end_matches('\n'))
        .or_else(|| SIGNAL_ADV.captures(output))
        .ok_or(ModemCtlError::Parse)?;
    let mode_str = caps.get(1).unwrap().as_str();
    let rssi: i32 = caps
        .get(2)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ModemCtlError::Parse)?;
    let ecio: i32 = caps
        .get(3)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ModemCtlError::Parse)?;
    let csq: i32 = caps
        .get(4)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ModemCtlError::Parse)?;

    if mode_str.eq_ignore_ascii_case("n/a") {
        return Ok(Signal::default());
    }

    Ok(Signal {
        mode: SignalMode::parse(&mode_str.to_ascii_lowercase()),
        rssi_dbm: rssi,
        ecio_dbm: ecio,
        csq,
    })
}

/// Parse the `m_info` block (spec §8 fixture 3).
pub fn parse_m_info(output: &str) -> Result<ModuleInfo, ModemCtlError> {
    let caps = M_INFO.captures(output).ok_or(ModemCtlError::Parse)?;
    Ok(ModuleInfo {
        module: caps[1].to_string(),
        wwan_node: caps[2].to_string(),
        lac: caps[3].to_string(),
        cell_id: caps[4].to_string(),
        icc_id: caps[5].to_string(),
        imei: caps[6].to_string(),
        qmi_port: caps[7].to_string(),
    })
}

/// Parse `modem_ctl operator` output: the whole line, trimmed of the
/// trailing newline, is the operator name (which may be empty).
pub fn parse_operator(output: &str) -> Result<String, ModemCtlError> {
    let caps = OPERATOR.captures(output).ok_or(ModemCtlError::Parse)?;
    Ok(caps[1].to_string())
}

/// Parse `modem_ctl sim_status` (spec §8 fixture 4). A non-zero exit from
/// the helper (no text contract at all) is mapped to `NoSim` by the
/// caller before this function ever runs.
pub fn parse_sim_status(output: &str) -> Result<SimStatus, ModemCtlError> {
    let trimmed = output.trim();
    if trimmed.contains("+CPIN: READY") {
        Ok(SimStatus::Ready)
    } else if trimmed.contains("+CPIN: SIM PIN") {
        Ok(SimStatus::Pin)
    } else {
        Err(ModemCtlError::Parse)
    }
}

/// Parse the PIN-retry block (spec §8 fixture 5). `state: 'disabled'`
/// means retries tracking is not applicable: `-1`.
pub fn parse_pin_retry_remain(output: &str) -> Result<i32, ModemCtlError> {
    let state = SIM_PIN_STATE
        .captures(output)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    if state == "disabled" {
        return Ok(-1);
    }
    let caps = PIN1_RETRIES.captures(output).ok_or(ModemCtlError::Parse)?;
    caps[1].parse().map_err(|_| ModemCtlError::Parse)
}

/// Parse an `at` response tail (spec §8 fixture 6): the body is whatever
/// text precedes the final `OK`/`ERROR`/`+CME ERROR: ...` line.
pub fn parse_at_response(output: &str) -> Result<AtResponse, ModemCtlError> {
    let trimmed = output.trim_end_matches('\n');
    if let Some(rest) = trimmed.strip_suffix("OK") {
        let info = rest.trim_end_matches('\n').to_string();
        return Ok(AtResponse {
            status: AtStatus::Ok,
            info,
        });
    }
    if trimmed == "ERROR" {
        return Ok(AtResponse {
            status: AtStatus::Err,
            info: String::new(),
        });
    }
    if let Some(rest) = trimmed.strip_prefix("+CME ERROR: ") {
        return Ok(AtResponse {
            status: AtStatus::CmeErr,
            info: rest.to_string(),
        });
    }
    Err(ModemCtlError::Parse)
}

/// Parse `modem_ctl pdp_context_list` (spec §8 fixture 7): one
/// `id,apn,TYPE` per line.
pub fn parse_pdp_context_list(output: &str) -> Result<Vec<PdpContextEntry>, ModemCtlError> {
    let mut entries = Vec::new();
    for caps in PDP_LIST_LINE.captures_iter(output) {
        let id: u32 = caps[1].parse().map_err(|_| ModemCtlError::Parse)?;
        let apn = caps[2].to_string();
        let pdp_type = match &caps[3] {
            "IP" => PdpType::Ipv4,
            "IPV4V6" => PdpType::Ipv4v6,
            "IPV6" => PdpType::Ipv6,
            _ => return Err(ModemCtlError::Parse),
        };
        entries.push(PdpContextEntry { id, pdp_type, apn });
    }
    if entries.is_empty() && !output.trim().is_empty() {
        return Err(ModemCtlError::Parse);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_fixture() {
        let fixture = "IP=111.70.154.149\nSubnetMask=255.255.255.252\nGateway=111.70.154.150\nDNS=168.95.1.1 168.95.192.1\n";
        let info = parse_start(fixture).unwrap();
        assert_eq!(info.ip, "111.70.154.149");
        assert_eq!(info.netmask, "255.255.255.252");
        assert_eq!(info.gateway, "111.70.154.150");
        assert_eq!(info.dns, vec!["168.95.1.1", "168.95.192.1"]);
    }

    #[test]
    fn start_missing_line_is_parse_error() {
        let fixture = "IP=111.70.154.149\nSubnetMask=255.255.255.252\nGateway=111.70.154.150\n";
        assert!(matches!(parse_start(fixture), Err(ModemCtlError::Parse)));
    }

    #[test]
    fn signal_fixture() {
        let sig = parse_signal("umts -41 dbm\n").unwrap();
        assert_eq!(sig.mode, SignalMode::Umts);
        assert_eq!(sig.rssi_dbm, -41);
    }

    #[test]
    fn signal_out_of_range_is_zeroed_not_failed() {
        let sig = parse_signal("n/a -999 dbm\n").unwrap();
        assert_eq!(sig, Signal::default());
    }

    #[test]
    fn signal_adv_fixture_carries_ecio_and_csq() {
        let sig = parse_signal_adv("umts -41 dbm, ecio -7 dB, csq 20\n").unwrap();
        assert_eq!(sig.mode, SignalMode::Umts);
        assert_eq!(sig.rssi_dbm, -41);
        assert_eq!(sig.ecio_dbm, -7);
        assert_eq!(sig.csq, 20);
    }

    #[test]
    fn signal_adv_out_of_range_is_zeroed_not_failed() {
        let sig = parse_signal_adv("n/a -999 dbm, ecio -999 dB, csq 0\n").unwrap();
        assert_eq!(sig, Signal::default());
    }

    #[test]
    fn signal_adv_missing_csq_is_parse_error() {
        assert!(matches!(
            parse_signal_adv("umts -41 dbm\n"),
            Err(ModemCtlError::Parse)
        ));
    }

    #[test]
    fn m_info_fixture() {
        let fixture = "Module=MC7304\nWWAN_node=wwan0\nLAC=2817\nCellID=01073AEE\nICC-ID=1234567890123456\nIMEI=0123456789012345\nQMI_port=/dev/cdc-wdm0\n";
        let info = parse_m_info(fixture).unwrap();
        assert_eq!(info.module, "MC7304");
        assert_eq!(info.wwan_node, "wwan0");
        assert_eq!(info.lac, "2817");
        assert_eq!(info.cell_id, "01073AEE");
        assert_eq!(info.icc_id, "1234567890123456");
        assert_eq!(info.imei, "0123456789012345");
        assert_eq!(info.qmi_port, "/dev/cdc-wdm0");
    }

    #[test]
    fn sim_status_ready() {
        assert_eq!(parse_sim_status("+CPIN: READY\n").unwrap(), SimStatus::Ready);
    }

    #[test]
    fn sim_status_pin() {
        assert_eq!(parse_sim_status("+CPIN: SIM PIN\n").unwrap(), SimStatus::Pin);
    }

    #[test]
    fn pin_retry_remain_enabled() {
        let fixture = "PIN1 state: 'enabled-verified'\nPIN1 retries: '3'\nPUK1 retries: '10'\n";
        assert_eq!(parse_pin_retry_remain(fixture).unwrap(), 3);
    }

    #[test]
    fn pin_retry_remain_disabled() {
        let fixture = "PIN1 state: 'disabled'\n";
        assert_eq!(parse_pin_retry_remain(fixture).unwrap(), -1);
    }

    #[test]
    fn at_ok_tail() {
        let r = parse_at_response("OK\n").unwrap();
        assert_eq!(r.status, AtStatus::Ok);
        assert_eq!(r.info, "");
    }

    #[test]
    fn at_ok_with_body() {
        let r = parse_at_response("+CFUN: 1\nOK\n").unwrap();
        assert_eq!(r.status, AtStatus::Ok);
        assert_eq!(r.info, "+CFUN: 1");
    }

    #[test]
    fn at_cme_error() {
        let r = parse_at_response("+CME ERROR: Unknown error\n").unwrap();
        assert_eq!(r.status, AtStatus::CmeErr);
        assert_eq!(r.info, "Unknown error");
    }

    #[test]
    fn at_bare_error() {
        let r = parse_at_response("ERROR\n").unwrap();
        assert_eq!(r.status, AtStatus::Err);
        assert_eq!(r.info, "");
    }

    #[test]
    fn at_unrecognized_tail_is_parse_error() {
        assert!(matches!(
            parse_at_response("garbage\n"),
            Err(ModemCtlError::Parse)
        ));
    }

    #[test]
    fn pdp_context_list_fixture() {
        let fixture = "1,internet,IP\n2,TPC,IPV4V6\n";
        let entries = parse_pdp_context_list(fixture).unwrap();
        assert_eq!(
            entries,
            vec![
                PdpContextEntry {
                    id: 1,
                    pdp_type: PdpType::Ipv4,
                    apn: "internet".into(),
                },
                PdpContextEntry {
                    id: 2,
                    pdp_type: PdpType::Ipv4v6,
                    apn: "TPC".into(),
                },
            ]
        );
    }
}

use crate::report::ConnectionRecord;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tracing::debug;

/// Remote addresses that never name a real peer.
const NULL_PEERS: &[&str] = &["0.0.0.0", "::", "::1", "127.0.0.1"];

/// pid → process name lookup. A miss means the process has gone away.
pub trait ProcessTable {
    fn process_name(&self, pid: u32) -> Option<String>;
}

impl ProcessTable for System {
    fn process_name(&self, pid: u32) -> Option<String> {
        self.process(Pid::from(pid as usize))
            .map(|p| p.name().to_string())
    }
}

/// Connection table entry before peer filtering and process enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConnection {
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: Option<String>,
    pub remote_port: u16,
    pub state: String,
    pub creation_time: Option<String>,
    pub owning_process_id: Option<u32>,
}

pub fn is_null_peer(remote: Option<&str>) -> bool {
    match remote.map(str::trim) {
        None | Some("") => true,
        Some(addr) => NULL_PEERS.contains(&addr),
    }
}

/// Reads the live connection table, then refreshes the process list so
/// owners that started during the read still resolve.
pub fn snapshot(system: &mut System) -> Vec<ConnectionRecord> {
    let raw = read_connection_table();
    system.refresh_processes();
    enrich(raw, &*system)
}

/// Drops null/loopback peers and attaches process names. Lookup misses leave
/// `process_name` empty instead of failing the snapshot.
pub fn enrich(raw: Vec<RawConnection>, processes: &impl ProcessTable) -> Vec<ConnectionRecord> {
    raw.into_iter()
        .filter_map(|conn| {
            let remote_address = conn
                .remote_address
                .filter(|addr| !is_null_peer(Some(addr)))?;
            let process_name = conn.owning_process_id.and_then(|pid| {
                let name = processes.process_name(pid);
                if name.is_none() {
                    debug!(pid, "owning process exited before lookup");
                }
                name
            });
            Some(ConnectionRecord {
                local_address: conn.local_address,
                local_port: conn.local_port,
                remote_address,
                remote_port: conn.remote_port,
                state: conn.state,
                creation_time: conn.creation_time,
                owning_process_id: conn.owning_process_id,
                process_name,
            })
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn read_connection_table() -> Vec<RawConnection> {
    use std::fs;

    let owners = linux_socket_owners();
    let mut out = Vec::new();
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match fs::read_to_string(path) {
            Ok(text) => out.extend(parse_proc_net_tcp(&text, &owners)),
            Err(err) => debug!(path, error = %err, "connection table unavailable"),
        }
    }
    out
}

#[cfg(target_os = "windows")]
fn read_connection_table() -> Vec<RawConnection> {
    use super::{decode_cmd_stdout, run_powershell};
    use tracing::warn;

    let script = "Get-NetTCPConnection | Select-Object LocalAddress,LocalPort,RemoteAddress,RemotePort,\
        @{n='State';e={$_.State.ToString()}},\
        @{n='CreationTime';e={if ($_.CreationTime) { $_.CreationTime.ToString('yyyy-MM-dd HH:mm:ss') }}},\
        OwningProcess | ConvertTo-Json -Compress";
    let Some(output) = run_powershell(script) else {
        warn!("powershell unavailable, connection table skipped");
        return Vec::new();
    };
    if !output.status.success() {
        warn!(status = %output.status, "Get-NetTCPConnection failed");
        return Vec::new();
    }
    match parse_net_tcp_json(&decode_cmd_stdout(&output.stdout)) {
        Ok(conns) => conns,
        Err(err) => {
            warn!(error = %err, "unexpected Get-NetTCPConnection output");
            Vec::new()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn read_connection_table() -> Vec<RawConnection> {
    tracing::warn!("connection enumeration is not supported on this platform");
    Vec::new()
}

/// Maps socket inodes to the pid holding them by walking `/proc/<pid>/fd`.
#[cfg(target_os = "linux")]
fn linux_socket_owners() -> HashMap<u64, u32> {
    use std::fs;

    let mut owners = HashMap::new();
    let Ok(procs) = fs::read_dir("/proc") else {
        return owners;
    };
    for entry in procs.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Other users' fd tables are unreadable without privileges.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            if let Some(inode) = socket_inode(&target.to_string_lossy()) {
                owners.entry(inode).or_insert(pid);
            }
        }
    }
    owners
}

fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Parses `/proc/net/tcp` or `/proc/net/tcp6` contents.
pub fn parse_proc_net_tcp(
    text: &str,
    owners: &HashMap<u64, u32>,
) -> Vec<RawConnection> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[0] == "sl" {
                return None;
            }
            let (local_address, local_port) = decode_proc_endpoint(fields[1])?;
            let (remote_address, remote_port) = decode_proc_endpoint(fields[2])?;
            let state = proc_tcp_state(fields[3]);
            let inode: u64 = fields[9].parse().ok()?;
            let owning_process_id = if inode == 0 {
                None
            } else {
                owners.get(&inode).copied()
            };
            Some(RawConnection {
                local_address,
                local_port,
                remote_address: Some(remote_address),
                remote_port,
                state: state.to_string(),
                creation_time: None,
                owning_process_id,
            })
        })
        .collect()
}

/// Decodes `ADDR:PORT` where ADDR is the kernel's hex dump of the address in
/// 32-bit host-order words.
fn decode_proc_endpoint(field: &str) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    if !addr_hex.is_ascii() {
        return None;
    }
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let addr = match addr_hex.len() {
        8 => {
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_le_bytes()))
        }
        32 => {
            let mut bytes = [0_u8; 16];
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr_hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            let v6 = Ipv6Addr::from(bytes);
            match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            }
        }
        _ => return None,
    };

    Some((addr.to_string(), port))
}

fn proc_tcp_state(hex: &str) -> &'static str {
    match hex {
        "01" => "Established",
        "02" => "SynSent",
        "03" => "SynReceived",
        "04" => "FinWait1",
        "05" => "FinWait2",
        "06" => "TimeWait",
        "07" => "Closed",
        "08" => "CloseWait",
        "09" => "LastAck",
        "0A" => "Listen",
        "0B" => "Closing",
        _ => "Unknown",
    }
}

#[cfg(any(target_os = "windows", test))]
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsConnection {
    local_address: String,
    local_port: u16,
    remote_address: Option<String>,
    remote_port: u16,
    state: Option<String>,
    creation_time: Option<String>,
    owning_process: Option<u32>,
}

/// Parses `Get-NetTCPConnection | ConvertTo-Json` output (one object or an array).
#[cfg(any(target_os = "windows", test))]
pub fn parse_net_tcp_json(text: &str) -> Result<Vec<RawConnection>, serde_json::Error> {
    let rows: Vec<PsConnection> = super::json_rows(text)?;
    Ok(rows
        .into_iter()
        .map(|row| RawConnection {
            local_address: row.local_address,
            local_port: row.local_port,
            remote_address: row.remote_address,
            remote_port: row.remote_port,
            state: row.state.unwrap_or_else(|| "Unknown".to_string()),
            creation_time: row.creation_time,
            owning_process_id: row.owning_process,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProcesses(HashMap<u32, &'static str>);

    impl ProcessTable for FakeProcesses {
        fn process_name(&self, pid: u32) -> Option<String> {
            self.0.get(&pid).map(|n| n.to_string())
        }
    }

    fn raw(remote: Option<&str>, pid: Option<u32>) -> RawConnection {
        RawConnection {
            local_address: "10.0.2.15".to_string(),
            local_port: 50000,
            remote_address: remote.map(str::to_string),
            remote_port: 443,
            state: "Established".to_string(),
            creation_time: None,
            owning_process_id: pid,
        }
    }

    const PROC_NET_TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1111 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:C350 08080808:01BB 01 00000000:00000000 02:000AFA1A 00000000  1000        0 2222 2 0000000000000000 20 4 30 10 -1
   2: 0F02000A:C352 0200000A:0016 01 00000000:00000000 02:000AFA1A 00000000  1000        0 3333 2 0000000000000000 20 4 30 10 -1
   3: 0100007F:1F90 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 4444 1 0000000000000000 20 4 30 10 -1
   4: 0F02000A:C354 04040808:0050 06 00000000:00000000 03:00001770 00000000     0        0 0 3 0000000000000000
";

    const PROC_NET_TCP6: &str = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:0016 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 5555 1 0000000000000000 100 0 0 10 0
   1: 0000000000000000FFFF00000F02000A:C351 0000000000000000FFFF00000200000A:0CEA 01 00000000:00000000 00:00000000 00000000  1000        0 6666 1 0000000000000000 20 4 30 10 -1
   2: 00000000000000000000000001000000:1F90 00000000000000000000000001000000:D432 01 00000000:00000000 00:00000000 00000000  1000        0 7777 1 0000000000000000 20 4 30 10 -1
   3: 00000000000000000000000001000000:C355 60480120000060480000000088880000:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 8888 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn decodes_ipv4_table() {
        let owners = HashMap::from([(2222_u64, 42_u32), (3333, 43)]);
        let rows = parse_proc_net_tcp(PROC_NET_TCP, &owners);
        assert_eq!(rows.len(), 5);

        assert_eq!(rows[0].state, "Listen");
        assert_eq!(rows[0].remote_address.as_deref(), Some("0.0.0.0"));

        assert_eq!(rows[1].local_address, "10.0.2.15");
        assert_eq!(rows[1].local_port, 50000);
        assert_eq!(rows[1].remote_address.as_deref(), Some("8.8.8.8"));
        assert_eq!(rows[1].remote_port, 443);
        assert_eq!(rows[1].owning_process_id, Some(42));

        assert_eq!(rows[2].remote_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(rows[2].remote_port, 22);
        assert_eq!(rows[3].remote_address.as_deref(), Some("127.0.0.1"));

        assert_eq!(rows[4].state, "TimeWait");
        assert_eq!(rows[4].owning_process_id, None);
    }

    #[test]
    fn decodes_ipv6_table() {
        let rows = parse_proc_net_tcp(PROC_NET_TCP6, &HashMap::new());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].remote_address.as_deref(), Some("::"));
        assert_eq!(rows[1].local_address, "10.0.2.15");
        assert_eq!(rows[1].remote_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(rows[1].remote_port, 3306);
        assert_eq!(rows[2].remote_address.as_deref(), Some("::1"));
        assert_eq!(rows[3].remote_address.as_deref(), Some("2001:4860:4860::8888"));
    }

    #[test]
    fn snapshot_excludes_null_and_loopback_peers() {
        let mut table = parse_proc_net_tcp(PROC_NET_TCP, &HashMap::new());
        table.extend(parse_proc_net_tcp(PROC_NET_TCP6, &HashMap::new()));
        table.push(raw(None, None));
        table.push(raw(Some(""), None));

        let records = enrich(table, &FakeProcesses(HashMap::new()));
        let peers: Vec<&str> = records.iter().map(|r| r.remote_address.as_str()).collect();
        assert_eq!(
            peers,
            vec!["8.8.8.8", "10.0.0.2", "8.8.4.4", "10.0.0.2", "2001:4860:4860::8888"]
        );
        for record in &records {
            assert!(!is_null_peer(Some(&record.remote_address)));
        }
    }

    #[test]
    fn vanished_process_degrades_to_empty_name() {
        let processes = FakeProcesses(HashMap::from([(42, "curl")]));
        let records = enrich(
            vec![
                raw(Some("8.8.8.8"), Some(42)),
                raw(Some("1.1.1.1"), Some(77)),
                raw(Some("9.9.9.9"), None),
            ],
            &processes,
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].process_name.as_deref(), Some("curl"));
        assert_eq!(records[1].owning_process_id, Some(77));
        assert_eq!(records[1].process_name, None);
        assert_eq!(records[2].process_name, None);
    }

    #[test]
    fn parses_powershell_array_and_single_object() {
        let many = r#"[{"LocalAddress":"10.1.1.5","LocalPort":51000,"RemoteAddress":"52.1.2.3","RemotePort":443,"State":"Established","CreationTime":"2024-03-09 07:05:02","OwningProcess":4120},
                       {"LocalAddress":"0.0.0.0","LocalPort":135,"RemoteAddress":"0.0.0.0","RemotePort":0,"State":"Listen","CreationTime":null,"OwningProcess":900}]"#;
        let rows = parse_net_tcp_json(many).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].creation_time.as_deref(), Some("2024-03-09 07:05:02"));
        assert_eq!(rows[0].owning_process_id, Some(4120));
        assert_eq!(rows[1].state, "Listen");

        let one = r#"{"LocalAddress":"10.1.1.5","LocalPort":51001,"RemoteAddress":"10.2.0.1","RemotePort":445,"State":"Established","OwningProcess":4}"#;
        let rows = parse_net_tcp_json(one).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remote_port, 445);
        assert_eq!(rows[0].creation_time, None);

        assert!(parse_net_tcp_json("").unwrap().is_empty());
    }

    #[test]
    fn socket_links() {
        assert_eq!(socket_inode("socket:[12345]"), Some(12345));
        assert_eq!(socket_inode("pipe:[12345]"), None);
        assert_eq!(socket_inode("/dev/null"), None);
    }

    #[test]
    fn live_snapshot_has_no_null_peers() {
        let mut system = System::new();
        for record in snapshot(&mut system) {
            assert!(!NULL_PEERS.contains(&record.remote_address.as_str()));
        }
    }
}

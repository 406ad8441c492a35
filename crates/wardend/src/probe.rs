//! Device transport: reachability probe and control sink.
//!
//! Both are synchronous and bounded by a caller-supplied timeout. The probe
//! only checks that a TCP connection can be opened; it never speaks the
//! device protocol.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// One bounded reachability check
pub trait DeviceProbe: Send + Sync {
    fn probe(&self, address: &str, timeout: Duration) -> Result<(), String>;
}

/// Delivers a control value to the device
pub trait ControlSink: Send + Sync {
    fn send(&self, address: &str, control_id: &str, value: f64, timeout: Duration) -> Result<(), String>;
}

/// TCP connect probe
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

impl DeviceProbe for TcpProbe {
    fn probe(&self, address: &str, timeout: Duration) -> Result<(), String> {
        connect(address, timeout).map(|_| ())
    }
}

/// Line-oriented TCP sink: `<control_id> <value>\n`
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpLineSink;

impl ControlSink for TcpLineSink {
    fn send(&self, address: &str, control_id: &str, value: f64, timeout: Duration) -> Result<(), String> {
        let mut stream = connect(address, timeout)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| format!("set write timeout: {}", e))?;
        stream
            .write_all(format!("{} {}\n", control_id, value).as_bytes())
            .map_err(|e| format!("write to {}: {}", address, e))?;
        stream.flush().map_err(|e| format!("flush to {}: {}", address, e))
    }
}

/// Resolve and connect, sharing one deadline across every step
fn connect(address: &str, timeout: Duration) -> Result<TcpStream, String> {
    let deadline = Instant::now() + timeout;
    let addrs = resolve(address, timeout)?;
    connect_any(&addrs, address, deadline)
}

fn resolve(address: &str, timeout: Duration) -> Result<Vec<SocketAddr>, String> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }

    // The system resolver has no timeout of its own; a stalled lookup is
    // abandoned to its thread
    let (tx, rx) = mpsc::channel();
    let owned = address.to_string();
    std::thread::spawn(move || {
        let result = owned
            .to_socket_addrs()
            .map(|addrs| addrs.collect::<Vec<_>>());
        let _ = tx.send(result);
    });

    let addrs = match rx.recv_timeout(timeout) {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => return Err(format!("cannot resolve {}: {}", address, e)),
        Err(RecvTimeoutError::Timeout) => {
            return Err(format!("resolving {} timed out after {:?}", address, timeout))
        }
        Err(RecvTimeoutError::Disconnected) => return Err(format!("cannot resolve {}", address)),
    };
    if addrs.is_empty() {
        return Err(format!("{} resolved to no addresses", address));
    }
    Ok(addrs)
}

fn connect_any(addrs: &[SocketAddr], address: &str, deadline: Instant) -> Result<TcpStream, String> {
    let mut errors = Vec::new();
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            errors.push(format!("{}: timed out", addr));
            break;
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => errors.push(format!("{}: {}", addr, e)),
        }
    }
    if errors.is_empty() {
        return Err(format!("{} resolved to no addresses", address));
    }
    Err(errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(TcpProbe.probe(&addr, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_probe_reports_refused() {
        // Bind then drop to obtain a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = TcpProbe.probe(&addr, Duration::from_millis(500)).unwrap_err();
        assert!(err.contains("127.0.0.1"));
    }

    #[test]
    fn test_many_addresses_share_one_deadline() {
        // Documentation ranges; connects either hang or fail fast
        let addrs: Vec<SocketAddr> = ["192.0.2.1:9", "198.51.100.1:9", "203.0.113.1:9"]
            .iter()
            .map(|a| a.parse().unwrap())
            .collect();
        let budget = Duration::from_millis(300);
        let started = Instant::now();
        let err = connect_any(&addrs, "device.test:9", started + budget).unwrap_err();
        assert!(started.elapsed() < budget + Duration::from_millis(250), "{}", err);
    }

    #[test]
    fn test_expired_deadline_skips_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let err = connect_any(&[addr], "device", Instant::now()).unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[test]
    fn test_hostname_resolves_within_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let addrs = resolve(&format!("localhost:{}", port), Duration::from_secs(5)).unwrap();
        assert!(addrs.iter().all(|a| a.port() == port));
        assert!(resolve("127.0.0.1:80", Duration::ZERO).is_ok());
    }

    #[test]
    fn test_line_sink_writes_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let reader = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = String::new();
            conn.read_to_string(&mut buf).unwrap();
            buf
        });

        TcpLineSink
            .send(&addr, "master_gain", -6.5, Duration::from_secs(1))
            .unwrap();
        assert_eq!(reader.join().unwrap(), "master_gain -6.5\n");
    }
}

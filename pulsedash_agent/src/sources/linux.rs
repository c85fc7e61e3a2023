//! Linux-only readings that sysinfo does not expose: the "Active" memory
//! counter, NIC driver and link speed, and the kernel's raw interface
//! counters. Off Linux every reader returns `None`.

#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

/// `Active:` from /proc/meminfo, in bytes.
pub fn meminfo_active() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let text = fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo_active(&text)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Kernel module bound to the interface's device (`/sys/class/net/<if>/device/driver`).
pub fn iface_driver(name: &str) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let path = Path::new("/sys/class/net").join(name).join("device/driver");
        let link = fs::read_link(path).ok()?;
        link.file_name().map(|s| s.to_string_lossy().into_owned())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
        None
    }
}

/// Negotiated link speed in Mbit/s; virtual and down links report nothing.
pub fn iface_speed_mbps(name: &str) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let path = Path::new("/sys/class/net").join(name).join("speed");
        let text = fs::read_to_string(path).ok()?;
        parse_speed(&text)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
        None
    }
}

/// Cumulative `(rx_bytes, tx_bytes)` from `/sys/class/net/<if>/statistics`.
pub fn iface_counters(name: &str) -> Option<(u64, u64)> {
    #[cfg(target_os = "linux")]
    {
        let base = Path::new("/sys/class/net").join(name).join("statistics");
        let rx = fs::read_to_string(base.join("rx_bytes")).ok()?;
        let tx = fs::read_to_string(base.join("tx_bytes")).ok()?;
        Some((rx.trim().parse().ok()?, tx.trim().parse().ok()?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
        None
    }
}

pub fn parse_meminfo_active(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix("Active:")?;
        let mut it = rest.split_whitespace();
        let value: u64 = it.next()?.parse().ok()?;
        let scale = match it.next() {
            Some("kB") | Some("KB") => 1024,
            None => 1,
            Some(_) => return None,
        };
        value.checked_mul(scale)
    })
}

pub fn parse_speed(text: &str) -> Option<u64> {
    let v: i64 = text.trim().parse().ok()?;
    u64::try_from(v).ok().filter(|s| *s > 0)
}

//! Network interface queries

use std::ffi::CStr;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use linkbridge_core::prelude::*;
use linkbridge_core::MacAddr;

/// Reads interface facts from sysfs and the kernel address list
#[derive(Debug, Clone)]
pub struct NetInterfaces {
    sysfs_net: PathBuf,
}

impl Default for NetInterfaces {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl NetInterfaces {
    pub fn new(sysfs_net: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net: sysfs_net.into(),
        }
    }

    /// Hardware address of `if_name`
    pub fn mac_address(&self, if_name: &str) -> Result<MacAddr> {
        read_mac(&self.sysfs_net.join(if_name).join("address"))
    }

    /// First IPv4 address assigned to `if_name`
    pub fn ipv4_address(&self, if_name: &str) -> Result<Option<Ipv4Addr>> {
        ipv4_address(if_name)
    }
}

fn read_mac(path: &Path) -> Result<MacAddr> {
    let text = std::fs::read_to_string(path)?;
    text.trim().parse()
}

fn ipv4_address(if_name: &str) -> Result<Option<Ipv4Addr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success `head` points to a list owned by libc that is
    // released with freeifaddrs below.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut found = None;
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a non-null node of the list returned above.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }
        // SAFETY: both pointers were checked for null and stay valid until
        // freeifaddrs.
        let (name, family) = unsafe {
            (
                CStr::from_ptr(entry.ifa_name),
                i32::from((*entry.ifa_addr).sa_family),
            )
        };
        if name.to_bytes() != if_name.as_bytes() || family != libc::AF_INET {
            continue;
        }
        // SAFETY: AF_INET entries carry a sockaddr_in.
        let addr = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        found = Some(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)));
        break;
    }

    // SAFETY: `head` came from a successful getifaddrs call.
    unsafe { libc::freeifaddrs(head) };
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let if_dir = dir.path().join("wlan0");
        std::fs::create_dir_all(&if_dir).unwrap();
        std::fs::write(if_dir.join("address"), "02:1a:2b:3c:4d:5e\n").unwrap();

        let interfaces = NetInterfaces::new(dir.path());
        let mac = interfaces.mac_address("wlan0").unwrap();
        assert_eq!(mac.octets(), [0x02, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        assert!(interfaces.mac_address("eth9").is_err());
    }

    #[test]
    fn test_loopback_has_ipv4() {
        let ip = NetInterfaces::default().ipv4_address("lo").unwrap();
        assert_eq!(ip, Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_unknown_interface_has_no_address() {
        let ip = NetInterfaces::default()
            .ipv4_address("no-such-if0")
            .unwrap();
        assert_eq!(ip, None);
    }
}

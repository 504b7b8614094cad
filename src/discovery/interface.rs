//! Interface/address selection for the multicast exchange (spec §4.C).
//!
//! Grounded on the teacher crate's `notifier.rs`/`bus/discovery/router.rs`
//! pattern of a thin `#[cfg(target_os = "linux")]` primitive module behind
//! a portable wrapper: `if_nametoindex` is only meaningful on unix, so the
//! ifindex lookup gets the same treatment the teacher gives `inotify`.

use std::io;
use std::net::IpAddr;

/// Picks the local address the OS would use to reach the outside world,
/// used as the "local host's primary address" fallback from spec §4.C
/// when no explicit interface name is configured.
pub fn primary_local_addr() -> io::Result<IpAddr> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect(("255.255.255.255", 1))?;
    Ok(probe.local_addr()?.ip())
}

/// Resolves `name` to an OS interface index for `IPV6_JOIN_GROUP`. Returns
/// `Ok(0)` ("any interface") when no name was given.
pub fn resolve_ifindex(name: Option<&str>) -> io::Result<u32> {
    match name {
        None => Ok(0),
        Some(name) => platform::if_nametoindex(name),
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;

    pub fn if_nametoindex(name: &str) -> io::Result<u32> {
        let cname = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
        let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if index == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such network interface: {name}"),
            ));
        }
        Ok(index)
    }
}

#[cfg(not(unix))]
mod platform {
    use std::io;

    pub fn if_nametoindex(_name: &str) -> io::Result<u32> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "named interface selection is not supported on this platform",
        ))
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Translation between interface indexes, which is what the kernel reports,
//! and interface names, which is what the filters and the accelerator want.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::sync::Mutex;

use slog::{debug, o, Logger};

pub trait IfResolver {
    fn name(&self, ifindex: u32) -> Option<String>;
    fn index(&self, name: &str) -> Option<u32>;

    /// Forget anything cached.
    fn flush(&self) {}

    /// The interface's name, or a placeholder for one that has gone away.
    fn display_name(&self, ifindex: u32) -> String {
        self.name(ifindex).unwrap_or_else(|| format!("if{ifindex}"))
    }
}

/// Looks names up in the kernel, remembering each answer until flushed.
pub struct SystemIfNames {
    log: Logger,
    cache: Mutex<BTreeMap<u32, String>>,
}

impl SystemIfNames {
    pub fn new(log: &Logger) -> Self {
        SystemIfNames {
            log: log.new(o!("unit" => "ifname")),
            cache: Mutex::new(BTreeMap::new()),
        }
    }
}

fn kernel_name(ifindex: u32) -> Option<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    // SAFETY: buf holds IF_NAMESIZE bytes, as if_indextoname requires.
    let p = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr()) };
    if p.is_null() {
        return None;
    }
    // SAFETY: on success buf holds a NUL-terminated name.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

fn kernel_index(name: &str) -> Option<u32> {
    let name = CString::new(name).ok()?;
    // SAFETY: name is a valid NUL-terminated string.
    match unsafe { libc::if_nametoindex(name.as_ptr()) } {
        0 => None,
        idx => Some(idx),
    }
}

impl IfResolver for SystemIfNames {
    fn name(&self, ifindex: u32) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(name) = cache.get(&ifindex) {
            return Some(name.clone());
        }
        let name = kernel_name(ifindex)?;
        debug!(self.log, "resolved interface";
            "ifindex" => ifindex, "name" => &name);
        cache.insert(ifindex, name.clone());
        Some(name)
    }

    fn index(&self, name: &str) -> Option<u32> {
        let mut cache = self.cache.lock().unwrap();
        if let Some((idx, _)) = cache.iter().find(|(_, n)| *n == name) {
            return Some(*idx);
        }
        let idx = kernel_index(name)?;
        cache.insert(idx, name.to_string());
        Some(idx)
    }

    fn flush(&self) {
        let mut cache = self.cache.lock().unwrap();
        debug!(self.log, "flushing interface cache"; "entries" => cache.len());
        cache.clear();
    }
}

/// A fixed set of interfaces, for tests.
#[cfg(test)]
pub struct StaticIfNames {
    names: BTreeMap<u32, String>,
}

#[cfg(test)]
impl StaticIfNames {
    pub fn new(ifs: &[(u32, &str)]) -> Self {
        StaticIfNames {
            names: ifs.iter().map(|(i, n)| (*i, n.to_string())).collect(),
        }
    }
}

#[cfg(test)]
impl IfResolver for StaticIfNames {
    fn name(&self, ifindex: u32) -> Option<String> {
        self.names.get(&ifindex).cloned()
    }

    fn index(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(i, _)| *i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::logging::test_logger;

    #[test]
    fn test_loopback() {
        let names = SystemIfNames::new(&test_logger());
        let idx = names.index("lo").expect("no loopback interface");
        assert_eq!(names.name(idx).as_deref(), Some("lo"));

        // served from the cache, then from the kernel again after a flush
        assert_eq!(names.index("lo"), Some(idx));
        names.flush();
        assert_eq!(names.name(idx).as_deref(), Some("lo"));
    }

    #[test]
    fn test_unknown() {
        let names = SystemIfNames::new(&test_logger());
        assert_eq!(names.index("no-such-if0"), None);
        assert_eq!(names.index("bad\0name"), None);
        assert_eq!(names.name(u32::MAX), None);
        assert_eq!(names.display_name(u32::MAX), format!("if{}", u32::MAX));
    }
}

use std::process::{Command, Output};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::addr::InterfaceAddress;

/// Run `sudo -n <args>` and return the raw output.
pub(crate) fn sudo(args: &[&str]) -> Result<Output> {
    Command::new("sudo")
        .arg("-n")
        .args(args)
        .output()
        .with_context(|| format!("spawn sudo {}", args.join(" ")))
}

/// Run `sudo -n <args>`, failing with stderr if the command exits non-zero.
pub(crate) fn sudo_checked(args: &[&str]) -> Result<Output> {
    let output = sudo(args)?;
    if !output.status.success() {
        bail!(
            "`{}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// A Linux network namespace managed via `ip netns`.
///
/// Creates the namespace on construction, initializes loopback, and
/// deletes the namespace on drop. Deletion is idempotent: an already
/// removed namespace is not an error.
#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    deleted: bool,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        // cleanup any stale namespace with the same name
        let _ = sudo(&["ip", "netns", "del", name]);

        sudo_checked(&["ip", "netns", "add", name])
            .with_context(|| format!("create netns '{name}'"))?;
        debug!(ns = name, "created network namespace");

        // loopback is best effort
        let _ = sudo(&["ip", "netns", "exec", name, "ip", "link", "set", "lo", "up"]);

        Ok(Self {
            name: name.to_string(),
            deleted: false,
        })
    }

    /// Run a command inside this namespace, returning raw output.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full = vec!["ip", "netns", "exec", &self.name, cmd];
        full.extend_from_slice(args);
        sudo(&full).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Run a command inside this namespace, failing if it exits non-zero.
    pub fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full = vec!["ip", "netns", "exec", &self.name, cmd];
        full.extend_from_slice(args);
        sudo_checked(&full).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Create a veth pair with `local_dev` in this namespace and `peer_dev`
    /// in `peer`. Both ends are brought up; addresses are only configured on
    /// the kernel devices when given.
    pub fn add_veth_link(
        &self,
        peer: &Namespace,
        local_dev: &str,
        peer_dev: &str,
        local_addr: Option<&InterfaceAddress>,
        peer_addr: Option<&InterfaceAddress>,
    ) -> Result<()> {
        // stale leftovers in the host namespace
        let _ = sudo(&["ip", "link", "del", local_dev]);

        sudo_checked(&[
            "ip", "link", "add", local_dev, "type", "veth", "peer", "name", peer_dev,
        ])
        .context("create veth pair")?;
        debug!(local = local_dev, peer = peer_dev, "created veth pair");

        sudo_checked(&["ip", "link", "set", local_dev, "netns", &self.name])
            .context("move local veth")?;
        sudo_checked(&["ip", "link", "set", peer_dev, "netns", &peer.name])
            .context("move peer veth")?;

        self.configure_device(local_dev, local_addr)?;
        peer.configure_device(peer_dev, peer_addr)?;
        Ok(())
    }

    fn configure_device(&self, dev: &str, addr: Option<&InterfaceAddress>) -> Result<()> {
        if let Some(addr) = addr {
            let cidr = addr.to_string();
            self.exec_checked("ip", &["addr", "add", &cidr, "dev", dev])
                .with_context(|| format!("assign {cidr} to {dev}"))?;
        }
        self.exec_checked("ip", &["link", "set", dev, "up"])
            .with_context(|| format!("bring {dev} up"))?;
        Ok(())
    }

    /// Whether `dev` currently exists inside this namespace.
    pub fn has_device(&self, dev: &str) -> bool {
        self.exec("ip", &["link", "show", "dev", dev])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Delete the namespace. Calling this more than once, or after the
    /// namespace vanished by other means, is a no-op.
    pub fn delete(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;
        match sudo(&["ip", "netns", "del", &self.name]) {
            Ok(o) if o.status.success() => debug!(ns = %self.name, "deleted network namespace"),
            Ok(_) | Err(_) => debug!(ns = %self.name, "network namespace already gone"),
        }
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.delete();
    }
}

/// Whether a namespace called `name` is currently known to `ip netns`.
pub fn namespace_exists(name: &str) -> bool {
    let Ok(out) = sudo(&["ip", "netns", "list"]) else {
        return false;
    };
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .any(|n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_privileges, unique_name};

    #[test]
    fn create_namespace_and_delete_twice() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let name = unique_name("hsa");
        let mut ns = Namespace::new(&name).expect("create ns");
        let out = ns.exec("ip", &["link"]).expect("exec ip link");
        assert!(String::from_utf8_lossy(&out.stdout).contains("lo"));

        ns.delete();
        ns.delete();
        assert!(!namespace_exists(&name));
    }

    #[test]
    fn veth_link_devices_exist() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let a = Namespace::new(&unique_name("hsla")).expect("create ns a");
        let b = Namespace::new(&unique_name("hslb")).expect("create ns b");
        let dev_a = unique_name("va");
        let dev_b = unique_name("vb");
        a.add_veth_link(&b, &dev_a, &dev_b, None, None)
            .expect("create veth link");
        assert!(a.has_device(&dev_a));
        assert!(b.has_device(&dev_b));
        assert!(!a.has_device(&dev_b));
    }
}

//! Typed commands for an instance's CLI channel.
//!
//! Commands are assembled from words rather than shell-templated strings;
//! each word is passed as a separate argument to the CLI client, so
//! addresses and interface names never go through a shell.

use std::fmt;

use hst_netns::NetInterface;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliCommand {
    words: Vec<String>,
}

impl CliCommand {
    /// Start from a verb phrase; whitespace splits it into words.
    pub fn new(verb: &str) -> Self {
        Self {
            words: verb.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn arg(mut self, word: impl fmt::Display) -> Self {
        let word = word.to_string();
        self.words.extend(word.split_whitespace().map(str::to_string));
        self
    }

    /// Append `key value`.
    pub fn kv(self, key: &str, value: impl fmt::Display) -> Self {
        self.arg(key).arg(value)
    }

    pub fn flag_if(self, cond: bool, word: &str) -> Self {
        if cond {
            self.arg(word)
        } else {
            self
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl fmt::Display for CliCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.words.join(" "))
    }
}

impl From<&str> for CliCommand {
    fn from(s: &str) -> Self {
        CliCommand::new(s)
    }
}

impl From<String> for CliCommand {
    fn from(s: String) -> Self {
        CliCommand::new(&s)
    }
}

/// Transport scheme in a session-layer URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Udp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        })
    }
}

/// `proto://addr/port` for `iface`. IPv6 addresses are not bracketed.
pub fn session_uri(proto: Proto, iface: &NetInterface, port: u16) -> String {
    format!("{}://{}/{}", proto, iface.address().addr, port)
}

/// Name the stack gives an af_packet interface attached to `device`.
pub fn host_interface_name(device: &str) -> String {
    format!("host-{device}")
}

/// `create host-interface name <dev>`
pub fn create_host_interface(device: &str) -> CliCommand {
    CliCommand::new("create host-interface").kv("name", device)
}

/// `set interface state <if> up`
pub fn interface_up(ifname: &str) -> CliCommand {
    CliCommand::new("set interface state").arg(ifname).arg("up")
}

/// `set interface ip address <if> <cidr>`
pub fn interface_address(ifname: &str, cidr: &str) -> CliCommand {
    CliCommand::new("set interface ip address").arg(ifname).arg(cidr)
}

/// `set interface promiscuous on <if>`
pub fn interface_promiscuous(ifname: &str) -> CliCommand {
    CliCommand::new("set interface promiscuous on").arg(ifname)
}

/// `show interface <if>`
pub fn show_interface(ifname: &str) -> CliCommand {
    CliCommand::new("show interface").arg(ifname)
}

/// Network delay simulator parameters for `set nsim`.
#[derive(Debug, Clone, PartialEq)]
pub struct NsimConfig {
    pub delay_ms: f64,
    pub bandwidth_gbit: u32,
    pub packet_size: u32,
    /// Drop one packet in every `packets_per_drop`; `None` disables loss.
    pub packets_per_drop: Option<u32>,
    pub poll_main_thread: bool,
}

impl Default for NsimConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0.01,
            bandwidth_gbit: 40,
            packet_size: 1400,
            packets_per_drop: Some(1000),
            poll_main_thread: true,
        }
    }
}

impl NsimConfig {
    pub fn command(&self) -> CliCommand {
        let mut cmd = CliCommand::new("set nsim")
            .flag_if(self.poll_main_thread, "poll-main-thread")
            .arg("delay")
            .arg(self.delay_ms)
            .arg("ms")
            .arg("bandwidth")
            .arg(self.bandwidth_gbit)
            .arg("gbit")
            .kv("packet-size", self.packet_size);
        if let Some(n) = self.packets_per_drop {
            cmd = cmd.kv("packets-per-drop", n);
        }
        cmd
    }
}

/// `nsim output-feature enable-disable <if>`
pub fn nsim_output_feature(ifname: &str) -> CliCommand {
    CliCommand::new("nsim output-feature enable-disable").arg(ifname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_split_and_joined() {
        let cmd = CliCommand::new("test echo client")
            .kv("nclients", 100)
            .kv("bytes", 1)
            .arg("verbose")
            .kv("uri", "tcp://10.10.0.1/10000");
        assert_eq!(
            cmd.to_string(),
            "test echo client nclients 100 bytes 1 verbose uri tcp://10.10.0.1/10000"
        );
        assert_eq!(cmd.words().len(), 10);
    }

    #[test]
    fn conversions_from_strings() {
        let a: CliCommand = "show   version".into();
        let b: CliCommand = String::from("show version").into();
        assert_eq!(a, b);
        assert_eq!(a.words(), &["show", "version"]);
    }

    #[test]
    fn nsim_default_matches_loss_profile() {
        assert_eq!(
            NsimConfig::default().command().to_string(),
            "set nsim poll-main-thread delay 0.01 ms bandwidth 40 gbit packet-size 1400 packets-per-drop 1000"
        );
        let lossless = NsimConfig {
            packets_per_drop: None,
            poll_main_thread: false,
            ..NsimConfig::default()
        };
        assert!(!lossless.command().to_string().contains("drop"));
    }

    #[test]
    fn host_interface_helpers() {
        assert_eq!(host_interface_name("srv1a2"), "host-srv1a2");
        assert_eq!(
            create_host_interface("srv1a2").to_string(),
            "create host-interface name srv1a2"
        );
        assert_eq!(
            nsim_output_feature("host-srv1a2").to_string(),
            "nsim output-feature enable-disable host-srv1a2"
        );
    }
}

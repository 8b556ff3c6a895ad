//! Builtin echo client/server tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use hst_harness::command::{host_interface_name, nsim_output_feature, session_uri};
use hst_harness::{cases, CliCommand, HarnessResult, NsimConfig, Proto, Registry, VethsSuite};
use regex::Regex;

pub fn register(veth: &mut Registry<VethsSuite>, veth6: &mut Registry<VethsSuite>) {
    let group = hst_harness::group!();
    veth.register_tests(
        &group,
        cases![
            echo_builtin,
            echo_builtin_bandwidth,
            echo_builtin_echo_bytes,
            echo_builtin_roundtrip
        ],
    );
    veth.register_solo_tests(&group, cases![tcp_with_loss]);
    veth6.register_tests(&group, cases![tcp_with_loss6]);
}

/// Start the server side listening on `proto` and return its URI.
async fn start_echo_server(s: &VethsSuite, proto: Proto) -> HarnessResult<String> {
    let uri = session_uri(proto, s.server()?, s.port1);
    s.server_vpp()?
        .vppctl(CliCommand::new("test echo server").kv("uri", &uri))
        .await?;
    Ok(uri)
}

/// First capture of `pattern` in `output`, as a float.
fn capture_f64(output: &str, pattern: &str) -> Option<f64> {
    let re = Regex::new(pattern).ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

fn echo_builtin(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let uri = start_echo_server(s, Proto::Tcp).await?;
        let o = s
            .client_vpp()?
            .vppctl(
                CliCommand::new("test echo client")
                    .kv("nclients", 100)
                    .kv("bytes", 1)
                    .arg("verbose")
                    .kv("syn-timeout", 100)
                    .kv("test-timeout", 100)
                    .kv("uri", &uri),
            )
            .await?;
        s.hst.log(&o);
        s.hst.assert_not_contains(&o, "failed:");
        Ok(())
    }
    .boxed()
}

fn echo_builtin_bandwidth(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let uri = start_echo_server(s, Proto::Tcp).await?;
        let o = s
            .client_vpp()?
            .vppctl(
                CliCommand::new("test echo client")
                    .kv("nclients", 4)
                    .kv("bytes", "8m")
                    .kv("throughput", "16m")
                    .kv("uri", &uri),
            )
            .await?;
        s.hst.log(&o);
        s.hst.assert_contains(&o, "Test started");
        s.hst.assert_contains(&o, "Test finished");
        // 8m at 16m/s should take two seconds.
        match capture_f64(&o, r"gbytes\) in (\d+\.\d+) seconds") {
            Some(seconds) => {
                s.hst.assert_equal_within_threshold(seconds, 2.0, 0.1);
            }
            None => {
                s.hst.assert_empty("invalid echo test client output");
            }
        }
        Ok(())
    }
    .boxed()
}

fn echo_builtin_roundtrip(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let uri = start_echo_server(s, Proto::Tcp).await?;
        let o = s
            .client_vpp()?
            .vppctl(
                CliCommand::new("test echo client")
                    .kv("bytes", "8m")
                    .kv("uri", &uri),
            )
            .await?;
        s.hst.log(&o);
        s.hst.assert_contains(&o, "Test started");
        s.hst.assert_contains(&o, "Test finished");
        match capture_f64(&o, r"(\.\d+)ms roundtrip") {
            Some(ms) => {
                s.hst.assert_equal_within_threshold(ms, 0.5, 0.5);
            }
            None => {
                s.hst.assert_empty("invalid echo test client output");
            }
        }
        Ok(())
    }
    .boxed()
}

fn echo_builtin_echo_bytes(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let uri = start_echo_server(s, Proto::Udp).await?;
        let o = s
            .client_vpp()?
            .vppctl(
                CliCommand::new("test echo client")
                    .arg("echo-bytes")
                    .arg("verbose")
                    .kv("uri", &uri),
            )
            .await?;
        s.hst.log(&o);
        s.hst
            .assert_not_contains(&o, "test echo clients: failed: timeout with 1 sessions");
        Ok(())
    }
    .boxed()
}

/// Echo over a lossy client link.
async fn echo_with_loss(s: &mut VethsSuite) -> HarnessResult<()> {
    let uri = start_echo_server(s, Proto::Tcp).await?;
    let client_if = host_interface_name(s.client()?.name());
    let vpp = s.client_vpp()?;
    vpp.vppctl(NsimConfig::default().command()).await?;
    vpp.vppctl(nsim_output_feature(&client_if)).await?;
    let o = vpp
        .vppctl(
            CliCommand::new("test echo client")
                .kv("uri", &uri)
                .arg("verbose")
                .arg("echo-bytes")
                .kv("bytes", "50m"),
        )
        .await?;
    s.hst.log(&o);
    s.hst.assert_not_equal(o.len(), 0);
    s.hst.assert_not_contains(&o, "failed");
    Ok(())
}

fn tcp_with_loss(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    echo_with_loss(s).boxed()
}

fn tcp_with_loss6(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    echo_with_loss(s).boxed()
}

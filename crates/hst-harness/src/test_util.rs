//! Helpers for exercising the harness without a real VPP build or
//! namespace privileges.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;

pub use hst_netns::test_util::check_privileges;

static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Install a `tracing` subscriber for tests; later calls are no-ops.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Shell-script stand-ins for `vpp` and `vppctl` in a scratch directory.
///
/// The fake `vpp` reads `cli-listen` from its `-c` config, creates that
/// path and idles until signalled. The fake `vppctl` echoes its command,
/// answers `show interface <if>` with a one-row table and blocks forever
/// on `hang`.
pub struct FakeVpp {
    dir: PathBuf,
}

const FAKE_VPP: &str = r#"#!/bin/sh
conf="$2"
sock=$(sed -n 's/^ *cli-listen \(.*\)$/\1/p' "$conf")
trap 'rm -f "$sock"; exit 0' TERM INT
touch "$sock"
while true; do sleep 0.05; done
"#;

const FAILING_VPP: &str = "#!/bin/sh\necho 'vpp: cannot open config' >&2\nexit 1\n";

fn fake_vppctl(index: u32) -> String {
    format!(
        r#"#!/bin/sh
shift 2
case "$*" in
  "show interface "*) printf '              Name   Idx   State\n%s   {index}   up\n' "$3" ;;
  hang*) exec sleep 3600 ;;
  *) echo "$*" ;;
esac
"#
    )
}

impl FakeVpp {
    /// Interface index reported by [`FakeVpp::install`].
    pub const BOUND_INDEX: u32 = 1;

    pub fn install() -> io::Result<Self> {
        Self::write(FAKE_VPP, &fake_vppctl(Self::BOUND_INDEX))
    }

    /// Like [`FakeVpp::install`] but binds report `index`.
    pub fn install_with_index(index: u32) -> io::Result<Self> {
        Self::write(FAKE_VPP, &fake_vppctl(index))
    }

    /// A `vpp` that exits immediately with an error.
    pub fn install_failing() -> io::Result<Self> {
        Self::write(FAILING_VPP, &fake_vppctl(Self::BOUND_INDEX))
    }

    fn write(vpp: &str, vppctl: &str) -> io::Result<Self> {
        let seq = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("hst-fake-{}-{}", std::process::id(), seq));
        std::fs::create_dir_all(&dir)?;
        write_script(&dir.join("vpp"), vpp)?;
        write_script(&dir.join("vppctl"), vppctl)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vpp_bin(&self) -> String {
        self.dir.join("vpp").display().to_string()
    }

    pub fn vppctl_bin(&self) -> String {
        self.dir.join("vppctl").display().to_string()
    }
}

impl Drop for FakeVpp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn write_script(path: &Path, body: &str) -> io::Result<()> {
    std::fs::write(path, body)?;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Drops every IPv4 XFRM policy on the node. A worker that used to be the
/// gateway can hold stale IPsec state that would otherwise swallow overlay
/// traffic.
pub async fn flush_policies() -> Result<()> {
    let output = Command::new("ip")
        .args(["-4", "xfrm", "policy", "flush"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: "ip -4 xfrm policy flush".into(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    debug!("flushed xfrm policies");
    Ok(())
}

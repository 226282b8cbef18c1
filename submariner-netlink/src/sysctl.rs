use crate::Result;

/// Loose-mode reverse path filtering, required on the gateway's overlay
/// device because return traffic arrives asymmetrically.
pub async fn set_loose_rp_filter(iface: &str) -> Result<()> {
    let path = format!("/proc/sys/net/ipv4/conf/{iface}/rp_filter");
    tokio::fs::write(&path, b"2").await?;
    Ok(())
}

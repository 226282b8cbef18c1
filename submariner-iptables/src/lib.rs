use std::net::Ipv4Addr;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use thiserror::Error;

pub const NAT_TABLE: &str = "nat";
pub const FILTER_TABLE: &str = "filter";

pub const SM_POSTROUTING_CHAIN: &str = "SUBMARINER-POSTROUTING";
pub const SM_FORWARD_CHAIN: &str = "SUBMARINER-FORWARD";

/// Packets carrying this mark were classified as global-egress traffic.
pub const GLOBALNET_MARK: &str = "0xC0000/0xC0000";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("iptables {args:?} failed: {stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },
}

/// Runs a single iptables invocation. The seam exists so tests can record
/// argv vectors and inject failures without a kernel.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<Output>;
}

/// Invokes the `iptables` binary.
#[derive(Default)]
pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, args: &[String]) -> Result<Output> {
        Ok(Command::new("iptables").args(args).output().await?)
    }
}

pub struct Iptables<E = ShellExecutor> {
    executor: E,
}

impl Default for Iptables<ShellExecutor> {
    fn default() -> Self {
        Self::new(ShellExecutor)
    }
}

impl<E: Executor> Iptables<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Creates the submariner-owned chains and wires them into the canonical
    /// POSTROUTING/FORWARD chains. Safe to call repeatedly.
    pub async fn ensure_chains(&self) -> Result<()> {
        self.ensure_chain(NAT_TABLE, SM_POSTROUTING_CHAIN).await?;
        self.ensure_jump(NAT_TABLE, "POSTROUTING", SM_POSTROUTING_CHAIN)
            .await?;

        self.ensure_chain(FILTER_TABLE, SM_FORWARD_CHAIN).await?;
        self.ensure_jump(FILTER_TABLE, "FORWARD", SM_FORWARD_CHAIN)
            .await?;

        Ok(())
    }

    /// Exempts traffic towards a remote cluster CIDR from the default
    /// masquerade and permits forwarding it in both directions.
    pub async fn add_inter_cluster_bypass(&self, remote_cidr: &str) -> Result<()> {
        for (table, chain, spec) in bypass_rule_specs(remote_cidr) {
            self.ensure_rule(table, chain, &spec).await?;
        }
        Ok(())
    }

    pub async fn remove_inter_cluster_bypass(&self, remote_cidr: &str) -> Result<()> {
        for (table, chain, spec) in bypass_rule_specs(remote_cidr) {
            self.delete_rule(table, chain, &spec).await?;
        }
        Ok(())
    }

    /// Source-NATs marked traffic from a local subnet to the allocated
    /// global IP (or dashed range of IPs).
    pub async fn add_cluster_egress_rule(
        &self,
        src_cidr: &str,
        snat_target: &str,
        mark: &str,
    ) -> Result<()> {
        self.ensure_rule(
            NAT_TABLE,
            SM_POSTROUTING_CHAIN,
            &egress_rule_spec(src_cidr, snat_target, mark),
        )
        .await
    }

    pub async fn remove_cluster_egress_rule(
        &self,
        src_cidr: &str,
        snat_target: &str,
        mark: &str,
    ) -> Result<()> {
        self.delete_rule(
            NAT_TABLE,
            SM_POSTROUTING_CHAIN,
            &egress_rule_spec(src_cidr, snat_target, mark),
        )
        .await
    }

    async fn ensure_chain(&self, table: &str, chain: &str) -> Result<()> {
        let args = to_args(&["-t", table, "-N", chain]);
        let output = self.run_with_retry(&args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains("Chain already exists") {
            debug!("chain {} already exists in table {}", chain, table);
            return Ok(());
        }

        Err(Error::CommandFailed { args, stderr })
    }

    async fn ensure_jump(&self, table: &str, from: &str, to: &str) -> Result<()> {
        let check = to_args(&["-t", table, "-C", from, "-j", to]);
        if self.run_with_retry(&check).await?.status.success() {
            return Ok(());
        }

        let insert = to_args(&["-t", table, "-I", from, "-j", to]);
        self.expect_success(&insert).await
    }

    /// `-C` probe followed by `-A`, so repeated installs are no-ops.
    async fn ensure_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        let mut check = to_args(&["-t", table, "-C", chain]);
        check.extend_from_slice(spec);
        if self.run_with_retry(&check).await?.status.success() {
            return Ok(());
        }

        let mut append = to_args(&["-t", table, "-A", chain]);
        append.extend_from_slice(spec);
        self.expect_success(&append).await
    }

    /// Removal of an already-absent rule is accepted.
    async fn delete_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        let mut check = to_args(&["-t", table, "-C", chain]);
        check.extend_from_slice(spec);
        if !self.run_with_retry(&check).await?.status.success() {
            debug!("rule {:?} not present in {}/{}", spec, table, chain);
            return Ok(());
        }

        let mut delete = to_args(&["-t", table, "-D", chain]);
        delete.extend_from_slice(spec);
        self.expect_success(&delete).await
    }

    async fn expect_success(&self, args: &[String]) -> Result<()> {
        let output = self.run_with_retry(args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::CommandFailed {
            args: args.to_vec(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// One bounded retry on executor failure; the final error surfaces to
    /// the caller.
    async fn run_with_retry(&self, args: &[String]) -> Result<Output> {
        match self.executor.run(args).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("iptables {:?} failed, retrying: {}", args, e);
                self.executor.run(args).await
            }
        }
    }
}

/// SNAT target for an ordered allocation: the address itself for a single
/// IP, the `first-last` dashed form for more.
pub fn snat_target(ips: &[Ipv4Addr]) -> String {
    if ips.len() == 1 {
        ips[0].to_string()
    } else {
        format!("{}-{}", ips[0], ips[ips.len() - 1])
    }
}

fn egress_rule_spec(src_cidr: &str, snat_target: &str, mark: &str) -> Vec<String> {
    to_args(&[
        "-m",
        "mark",
        "--mark",
        mark,
        "-s",
        src_cidr,
        "-j",
        "SNAT",
        "--to-source",
        snat_target,
    ])
}

fn bypass_rule_specs(remote_cidr: &str) -> [(&'static str, &'static str, Vec<String>); 3] {
    [
        (
            NAT_TABLE,
            SM_POSTROUTING_CHAIN,
            to_args(&["-d", remote_cidr, "-j", "ACCEPT"]),
        ),
        (
            FILTER_TABLE,
            SM_FORWARD_CHAIN,
            to_args(&["-d", remote_cidr, "-j", "ACCEPT"]),
        ),
        (
            FILTER_TABLE,
            SM_FORWARD_CHAIN,
            to_args(&["-s", remote_cidr, "-j", "ACCEPT"]),
        ),
    ]
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod test {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    use super::*;

    /// Records every invocation; `-C` probes fail unless the probed rule was
    /// previously appended, which is enough to model kernel rule state.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        installed: Mutex<Vec<Vec<String>>>,
        chain_exists_stderr: bool,
    }

    impl RecordingExecutor {
        fn output(code: i32, stderr: &str) -> Output {
            Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, args: &[String]) -> Result<Output> {
            self.calls.lock().unwrap().push(args.to_vec());

            let op = args.iter().position(|a| {
                matches!(a.as_str(), "-C" | "-A" | "-D" | "-I" | "-N")
            });
            let Some(op) = op else {
                return Ok(Self::output(0, ""));
            };

            let rule: Vec<String> = args[op + 1..].to_vec();
            match args[op].as_str() {
                "-C" => {
                    if self.installed.lock().unwrap().contains(&rule) {
                        Ok(Self::output(0, ""))
                    } else {
                        Ok(Self::output(1, "iptables: Bad rule"))
                    }
                }
                "-A" | "-I" => {
                    self.installed.lock().unwrap().push(rule);
                    Ok(Self::output(0, ""))
                }
                "-D" => {
                    self.installed.lock().unwrap().retain(|r| *r != rule);
                    Ok(Self::output(0, ""))
                }
                "-N" => {
                    if self.chain_exists_stderr {
                        Ok(Self::output(1, "iptables: Chain already exists."))
                    } else {
                        Ok(Self::output(0, ""))
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn test_snat_target_forms() {
        let single = vec![Ipv4Addr::new(169, 254, 0, 0)];
        assert_eq!(snat_target(&single), "169.254.0.0");

        let range = vec![
            Ipv4Addr::new(169, 254, 0, 0),
            Ipv4Addr::new(169, 254, 0, 1),
        ];
        assert_eq!(snat_target(&range), "169.254.0.0-169.254.0.1");
    }

    #[tokio::test]
    async fn test_egress_rule_argv() {
        let iptables = Iptables::new(RecordingExecutor::default());
        iptables
            .add_cluster_egress_rule("10.42.0.0/16", "169.254.0.0-169.254.0.1", GLOBALNET_MARK)
            .await
            .expect("add rule");

        let calls = iptables.executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            to_args(&[
                "-t",
                "nat",
                "-A",
                "SUBMARINER-POSTROUTING",
                "-m",
                "mark",
                "--mark",
                "0xC0000/0xC0000",
                "-s",
                "10.42.0.0/16",
                "-j",
                "SNAT",
                "--to-source",
                "169.254.0.0-169.254.0.1",
            ])
        );
    }

    #[tokio::test]
    async fn test_egress_rule_install_is_idempotent() {
        let iptables = Iptables::new(RecordingExecutor::default());
        iptables
            .add_cluster_egress_rule("10.42.0.0/16", "169.254.0.1", GLOBALNET_MARK)
            .await
            .expect("first install");
        iptables
            .add_cluster_egress_rule("10.42.0.0/16", "169.254.0.1", GLOBALNET_MARK)
            .await
            .expect("second install");

        let appends = iptables
            .executor
            .calls()
            .iter()
            .filter(|c| c.contains(&"-A".to_string()))
            .count();
        assert_eq!(appends, 1);
    }

    #[tokio::test]
    async fn test_ensure_chains_tolerates_existing_chain() {
        let executor = RecordingExecutor {
            chain_exists_stderr: true,
            ..Default::default()
        };
        let iptables = Iptables::new(executor);
        iptables.ensure_chains().await.expect("chains ensured");
    }

    #[tokio::test]
    async fn test_delete_missing_rule_is_accepted() {
        let iptables = Iptables::new(RecordingExecutor::default());
        iptables
            .remove_cluster_egress_rule("10.42.0.0/16", "169.254.0.1", GLOBALNET_MARK)
            .await
            .expect("delete of absent rule accepted");

        let deletes = iptables
            .executor
            .calls()
            .iter()
            .filter(|c| c.contains(&"-D".to_string()))
            .count();
        assert_eq!(deletes, 0);
    }

    #[tokio::test]
    async fn test_bypass_covers_nat_and_filter() {
        let iptables = Iptables::new(RecordingExecutor::default());
        iptables
            .add_inter_cluster_bypass("10.43.0.0/16")
            .await
            .expect("bypass installed");

        let installed = iptables.executor.installed.lock().unwrap().clone();
        assert_eq!(
            installed,
            vec![
                to_args(&["SUBMARINER-POSTROUTING", "-d", "10.43.0.0/16", "-j", "ACCEPT"]),
                to_args(&["SUBMARINER-FORWARD", "-d", "10.43.0.0/16", "-j", "ACCEPT"]),
                to_args(&["SUBMARINER-FORWARD", "-s", "10.43.0.0/16", "-j", "ACCEPT"]),
            ]
        );
    }
}


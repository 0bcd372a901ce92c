use crate::error::Result;
use crate::ssh::{Options, SshClient};
use std::net::IpAddr;

/// The lifecycle surface every provider adapter exposes to the orchestration layer.
///
/// Implementations are thin: they forward to the provider and report its answer. No transition
/// checks happen here, the provider decides whether e.g. suspending a powered-off VM is legal.
#[async_trait::async_trait]
pub trait VirtualMachine: Send {
    /// Display name of the VM, empty when it cannot be determined.
    async fn name(&mut self) -> String;
    /// Creates new VM(s) from the adapter's templates. Does not wait for them to come up.
    async fn provision(&mut self) -> Result<()>;
    async fn ips(&mut self) -> Result<Vec<IpAddr>>;
    async fn destroy(&mut self) -> Result<()>;
    /// Provider status string, verbatim.
    async fn state(&mut self) -> Result<String>;
    async fn suspend(&mut self) -> Result<()>;
    async fn resume(&mut self) -> Result<()>;
    async fn halt(&mut self) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    async fn ssh(&mut self, options: Options) -> Result<SshClient>;
}

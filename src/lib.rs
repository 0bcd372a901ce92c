//! Drives iland cloud VMs through the provider-agnostic [`VirtualMachine`] interface.
//!
//! ```no_run
//! use iland_vm::{Config, VirtualMachine, Vm};
//!
//! # async fn demo() -> iland_vm::Result<()> {
//! let mut vm: Vm = Vm::new(Config::from_env()?, "vm-5bd5b9c4");
//! vm.start().await?;
//! println!("{} is {}", vm.name().await, vm.state().await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod error;
mod provider;
pub mod ssh;
mod vm;

#[cfg(test)]
mod test_utils;

pub use client::{ApiClient, IlandClient};
pub use config::Config;
pub use error::{Error, Result};
pub use provider::VirtualMachine;
pub use ssh::{Credentials, Options, SshClient};
pub use vm::{Details, Template, Vm, Vnic};

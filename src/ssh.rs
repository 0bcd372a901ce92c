//! SSH hand-off: address discovery through [`VirtualMachine::ips`] and a small russh based
//! session handle bound to one of the discovered addresses.

use crate::provider::VirtualMachine;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use russh_sftp::client::SftpSession;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

pub const SSH_PORT: u16 = 22;
const RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Sessions with no traffic for this long are dropped by russh.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);
/// Extended data type code for stderr in SSH_MSG_CHANNEL_EXTENDED_DATA.
const STDERR: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ssh: {0}")]
    Ssh(#[from] russh::Error),

    #[error("ssh key: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("sftp: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("ssh authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("neither a password nor a private key was provided")]
    NoAuthMethod,

    #[error("ssh session is not connected")]
    NotConnected,

    #[error("timed out waiting for ssh: {last}")]
    Timeout { last: String },
}

/// Login data for the VM. The private key is the key text itself (OpenSSH or PEM), not a path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpPreference {
    #[default]
    Any,
    V4,
    V6,
}

impl IpPreference {
    fn accepts(self, ip: &IpAddr) -> bool {
        match self {
            IpPreference::Any => true,
            IpPreference::V4 => ip.is_ipv4(),
            IpPreference::V6 => ip.is_ipv6(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub ip_preference: IpPreference,
    pub keep_alive: Option<Duration>,
}

/// Addresses of `vm` usable for SSH, in the order the provider reported them.
pub async fn vm_ips<V>(vm: &mut V, options: &Options) -> crate::Result<Vec<IpAddr>>
where
    V: VirtualMachine + ?Sized,
{
    let ips: Vec<IpAddr> = vm
        .ips()
        .await?
        .into_iter()
        .filter(|ip| options.ip_preference.accepts(ip))
        .collect();
    if ips.is_empty() {
        return Err(crate::Error::NoIp);
    }
    Ok(ips)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

enum Auth {
    Key(KeyPair),
    Password(String),
}

struct ServerKeyLogger;

#[async_trait]
impl client::Handler for ServerKeyLogger {
    type Error = russh::Error;

    // Freshly provisioned VMs have unknown host keys, so every key is accepted.
    async fn check_server_key(&mut self, public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!("Accepting {} host key", public_key.name());
        Ok(true)
    }
}

pub struct SshClient {
    credentials: Credentials,
    ip: IpAddr,
    port: u16,
    options: Options,
    session: Option<Handle<ServerKeyLogger>>,
}

impl fmt::Debug for SshClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshClient")
            .field("user", &self.credentials.user)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("options", &self.options)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl SshClient {
    pub fn new(credentials: Credentials, ip: IpAddr, port: u16, options: Options) -> Self {
        Self {
            credentials,
            ip,
            port,
            options,
            session: None,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn auth(&self) -> Result<Auth, Error> {
        match (&self.credentials.private_key, &self.credentials.password) {
            (Some(key), _) => Ok(Auth::Key(russh_keys::decode_secret_key(key, None)?)),
            (None, Some(password)) => Ok(Auth::Password(password.clone())),
            (None, None) => Err(Error::NoAuthMethod),
        }
    }

    /// Opens the session. A private key takes precedence over a password.
    pub async fn connect(&mut self) -> Result<(), Error> {
        let auth = self.auth()?;
        self.connect_with(auth).await
    }

    async fn connect_with(&mut self, auth: Auth) -> Result<(), Error> {
        let config = client::Config {
            keepalive_interval: self.options.keep_alive,
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            ..Default::default()
        };
        debug!("Connecting to {}:{}", self.ip, self.port);
        let mut session =
            client::connect(Arc::new(config), (self.ip, self.port), ServerKeyLogger).await?;
        let user = self.credentials.user.clone();
        let authenticated = match auth {
            Auth::Key(key_pair) => {
                session
                    .authenticate_publickey(user.clone(), Arc::new(key_pair))
                    .await?
            }
            Auth::Password(password) => session.authenticate_password(user.clone(), password).await?,
        };
        if !authenticated {
            return Err(Error::AuthFailed { user });
        }
        self.session = Some(session);
        Ok(())
    }

    /// Keeps trying to connect until it succeeds or `timeout` elapses. Useful right after a VM
    /// was powered on and sshd is not up yet. Each attempt is bounded by the remaining time, so a
    /// host that accepts TCP but never speaks SSH cannot stall the caller.
    pub async fn wait_for_ssh(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            // Bad credentials will not get better by retrying.
            let auth = self.auth()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let last = match tokio::time::timeout(remaining, self.connect_with(auth)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e @ Error::AuthFailed { .. })) => return Err(e),
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handshake did not complete".to_string(),
            };
            if Instant::now() + RETRY_INTERVAL >= deadline {
                debug!("Giving up on {}: {last}", self.ip);
                return Err(Error::Timeout { last });
            }
            debug!("SSH to {} not ready yet: {last}", self.ip);
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn session(&mut self) -> Result<&mut Handle<ServerKeyLogger>, Error> {
        self.session.as_mut().ok_or(Error::NotConnected)
    }

    /// Runs `command` and collects its output until the channel closes.
    pub async fn run(&mut self, command: &str) -> Result<Output, Error> {
        let mut channel = self.session()?.channel_open_session().await?;
        channel.exec(true, command).await?;
        let mut output = Output::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR => {
                    output.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }
        Ok(output)
    }

    async fn sftp(&mut self) -> Result<SftpSession, Error> {
        let channel = self.session()?.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }

    /// Writes `contents` to `remote_path`, replacing an existing file. Permissions are left to
    /// the remote umask.
    pub async fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), Error> {
        let sftp = self.sftp().await?;
        let mut file = sftp.create(remote_path).await?;
        file.write_all(contents).await?;
        file.shutdown().await?;
        Ok(())
    }

    pub async fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, Error> {
        let sftp = self.sftp().await?;
        let mut file = sftp.open(remote_path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    pub async fn disconnect(&mut self) -> Result<(), Error> {
        if let Some(session) = self.session.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await?;
        }
        Ok(())
    }
}

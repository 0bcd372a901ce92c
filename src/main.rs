use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use dotenvy::dotenv;
use iland_vm::{Config, Credentials, Options, Template, VirtualMachine, Vm};
use std::fs::read_to_string;
use std::io::Write;
use tracing::info;

/// Small front end to poke a single iland VM from the shell.
#[derive(Debug, Parser)]
#[command(name = "iland-vm")]
#[command(about = "Manage an iland cloud VM", long_about = None)]
struct Cli {
    /// UUID of the VM to operate on
    #[arg(long)]
    uuid: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Name,
    State,
    Ips,
    Start,
    Halt,
    Suspend,
    Resume,
    Destroy,
    /// Clone new VMs into this VM's vApp
    #[command(arg_required_else_help = true)]
    Provision {
        /// JSON file holding an array of templates
        #[arg(long)]
        templates: String,
    },
    /// Run a command on the VM over SSH
    #[command(arg_required_else_help = true)]
    Ssh { command: String },
}

fn ssh_credentials() -> Result<Credentials> {
    let private_key = match std::env::var("SSH_KEY_PATH") {
        Ok(path) => Some(read_to_string(&path).wrap_err_with(|| format!("reading {path}"))?),
        Err(_) => None,
    };
    Ok(Credentials {
        user: std::env::var("SSH_USER").wrap_err("SSH_USER not set")?,
        password: std::env::var("SSH_PASSWORD").ok(),
        private_key,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenv().ok();
    tracing_subscriber::fmt::init();
    let args = Cli::parse();
    let mut vm: Vm = Vm::new(Config::from_env()?, args.uuid);
    match args.command {
        Commands::Name => println!("{}", vm.name().await),
        Commands::State => println!("{}", vm.state().await?),
        Commands::Ips => {
            for ip in vm.ips().await? {
                println!("{ip}");
            }
        }
        Commands::Start => vm.start().await?,
        Commands::Halt => vm.halt().await?,
        Commands::Suspend => vm.suspend().await?,
        Commands::Resume => vm.resume().await?,
        Commands::Destroy => vm.destroy().await?,
        Commands::Provision { templates } => {
            let templates: Vec<Template> = serde_json::from_str(
                &read_to_string(&templates).wrap_err_with(|| format!("reading {templates}"))?,
            )
            .wrap_err("invalid template file")?;
            info!("Provisioning {} VM(s)", templates.len());
            vm.templates = templates;
            vm.provision().await?;
        }
        Commands::Ssh { command } => {
            vm.credentials = ssh_credentials()?;
            let mut client = vm.ssh(Options::default()).await?;
            info!("Connecting to {}", client.ip());
            client.connect().await?;
            let output = client.run(&command).await?;
            client.disconnect().await?;
            std::io::stdout().write_all(&output.stdout)?;
            std::io::stderr().write_all(&output.stderr)?;
            if let Some(status) = output.exit_status.filter(|s| *s != 0) {
                std::process::exit(status as i32);
            }
        }
    }
    Ok(())
}

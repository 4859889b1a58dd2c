//! CLI definition for `tfill`.

use crate::{
    forks::{ForkChain, ForkRules, HeaderShape},
    pipeline::FillPipeline,
    t8n::evm::EvmTool,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use cli_table::{Cell, Style, Table};
use color_eyre::{eyre::eyre, owo_colors::OwoColorize, Result};
use itertools::Itertools;
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};
use tracing::Level;

/// The CLI options for `tfill`.
#[derive(Parser, Debug, Clone)]
pub(crate) struct Cli {
    /// Verbosity level (0-2)
    #[arg(long, short, action = ArgAction::Count)]
    pub v: u8,
    /// The subcommand to run.
    #[clap(subcommand)]
    pub subcommand: CliSubcommand,
}

impl Cli {
    /// Parses the CLI arguments and runs the application.
    pub(crate) async fn run(self) -> Result<()> {
        let chain = Arc::new(ForkChain::mainnet()?);
        match self.subcommand {
            CliSubcommand::Fill(cfg) => {
                let tool = EvmTool::new(cfg.evm_bin.clone(), Duration::from_secs(cfg.timeout));
                FillPipeline::new(&cfg, chain, Arc::new(tool))
                    .setup()
                    .await?
                    .run()
                    .await?
                    .teardown()
                    .await?
            }
            CliSubcommand::Forks => print_forks(&chain)?,
        }
        Ok(())
    }

    /// Initializes the tracing subscriber
    ///
    /// # Arguments
    /// * `verbosity_level` - The verbosity level (0-2)
    ///
    /// # Returns
    /// * `Result<()>` - Ok if successful, Err otherwise.
    pub(crate) fn init_tracing_subscriber(self) -> Result<Self> {
        color_eyre::install()?;

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(match self.v {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            })
            .finish();

        tracing::subscriber::set_global_default(subscriber).map_err(|e| eyre!(e))?;

        Ok(self)
    }
}

/// Prints the forks and transition forks of the chain.
fn print_forks(chain: &ForkChain) -> Result<()> {
    let rows = chain
        .iter()
        .map(|fork| {
            let mut name = fork.name().green().to_string();
            if fork.is_ignored() {
                name = format!("{name} (ignored)");
            } else if !fork.is_deployed() {
                name = format!("{name} (not deployed)");
            }
            vec![
                name.cell(),
                fork.tx_types(0, 0).iter().join(", ").cell(),
                fork.precompiles(0, 0).len().cell(),
                header_fields(fork.header_shape(0, 0)).magenta().to_string().cell(),
                fork.engine_payload_version(0, 0)
                    .map_or("-".to_string(), |v| format!("V{v}"))
                    .cell(),
            ]
        })
        .collect::<Vec<_>>();
    let table = rows
        .table()
        .title(vec![
            "Fork".cell(),
            "Tx types".cell(),
            "Precompiles".cell(),
            "Header fields".cell(),
            "newPayload".cell(),
        ])
        .bold(true);
    cli_table::print_stdout(table)?;

    let rows = chain
        .transitions()
        .iter()
        .map(|t| {
            vec![
                t.name().cyan().to_string().cell(),
                t.from().name().cell(),
                t.to().name().cell(),
                t.activation().cell(),
            ]
        })
        .collect::<Vec<_>>();
    let table = rows
        .table()
        .title(vec![
            "Transition".cell(),
            "From".cell(),
            "To".cell(),
            "Activation".cell(),
        ])
        .bold(true);
    cli_table::print_stdout(table)?;
    Ok(())
}

/// The optional header fields a fork requires, by their fixture names.
fn header_fields(shape: HeaderShape) -> String {
    let fields = [
        (shape.base_fee, "baseFeePerGas"),
        (shape.prev_randao, "mixHash"),
        (shape.withdrawals, "withdrawalsRoot"),
        (shape.excess_blob_gas, "excessBlobGas"),
        (shape.blob_gas_used, "blobGasUsed"),
        (shape.beacon_root, "parentBeaconBlockRoot"),
    ];
    let fields = fields
        .into_iter()
        .filter_map(|(required, field)| required.then_some(field))
        .join(", ");
    if fields.is_empty() {
        "-".to_string()
    } else {
        fields
    }
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliSubcommand {
    /// Lists the known forks and transition forks.
    Forks,
    /// Fills fixtures from a directory of scenario files.
    Fill(FillConfig),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct FillConfig {
    /// The directory holding the scenario filler files.
    #[clap(long, default_value = "./fillers")]
    pub(crate) fillers: PathBuf,
    /// The filler modules to fill (glob pattern supported)
    #[clap(short, long)]
    pub(crate) test: Option<String>,
    /// Fill for a single fork or transition fork.
    #[clap(long, conflicts_with_all = ["from", "until"])]
    pub(crate) fork: Option<String>,
    /// The first fork to fill for (default = the first fork).
    #[clap(long)]
    pub(crate) from: Option<String>,
    /// The last fork to fill for (default = the latest deployed fork).
    #[clap(long)]
    pub(crate) until: Option<String>,
    /// EIPs to enable for scenarios that declare no variants (delineated by commas)
    #[clap(long, value_delimiter = ',')]
    pub(crate) eips: Vec<u64>,
    /// The directory to write fixtures to.
    #[clap(short, long, default_value = "./fixtures")]
    pub(crate) output: PathBuf,
    /// Write every module directly into the output directory.
    #[clap(long)]
    pub(crate) flat_output: bool,
    /// Also emit engine API payloads for forks that support them.
    #[clap(long)]
    pub(crate) enable_hive: bool,
    /// The `evm` binary to use as transition tool.
    #[clap(long, env = "EVM_BIN", default_value = "evm")]
    pub(crate) evm_bin: PathBuf,
    /// Collect execution traces from the transition tool.
    #[clap(long)]
    pub(crate) traces: bool,
    /// Dump the input and output of every tool invocation into this directory.
    #[clap(long)]
    pub(crate) t8n_dump_dir: Option<PathBuf>,
    /// The chain ID passed to the transition tool.
    #[clap(long, default_value = "1")]
    pub(crate) chain_id: u64,
    /// The number of active workers, at least one (default = 4).
    #[clap(long, default_value = "4")]
    pub(crate) workers: NonZeroUsize,
    /// Seconds a single tool invocation may take.
    #[clap(long, default_value = "120")]
    pub(crate) timeout: u64,
}

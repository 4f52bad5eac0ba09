pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod kv;
pub mod prefs;
pub mod render;
pub mod rollover;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args);
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting daybook"
    );
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.daybookrc.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;
    cfg.apply_overrides([(
        "data.location".to_string(),
        data_dir.display().to_string(),
    )]);

    let storage = datastore::DataStore::open(&data_dir)
        .with_context(|| format!("failed to open datastore at {}", data_dir.display()))?;

    let calendar = datetime::Calendar::resolve(cfg.get("timezone").as_deref());
    let now = Utc::now();
    let mut store = store::TaskStore::open(storage, calendar, now)?;

    let mut renderer = render::Renderer::new(&cfg, store.theme(), calendar)?;
    let command = cli.command.unwrap_or_else(cli::Command::default_list);

    commands::dispatch(&mut store, &cfg, &mut renderer, command, now)?;

    info!("done");
    Ok(())
}

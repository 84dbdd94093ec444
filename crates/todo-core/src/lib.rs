pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod datetime;
pub mod gateway;
pub mod notify;
pub mod render;
pub mod repository;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<i32> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting todo CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.todorc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let repository =
    repository::TaskRepository::lazy(
      &data_dir,
      &cfg.database_name()
    );
  let renderer =
    render::Renderer::new(&cfg)?;
  let backend =
    notify::TerminalBackend::from_config(
      &cfg
    )?;
  let notifier = notify::Notifier::new(
    backend,
    cfg.notification_icon()
  );
  let mut controller =
    controller::TaskController::new(
      repository, renderer, notifier
    );

  let command =
    cli.command.unwrap_or(
      cli::Command::List {
        html: false,
        pending: false,
        finished: false
      }
    );

  let mut out = std::io::stdout().lock();
  let code = commands::dispatch(
    &mut controller,
    command,
    &mut out
  );
  controller.shutdown();

  let code = code?;
  info!(code, "done");
  Ok(code)
}

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use artipilot::cli::{Cli, Commands, ConfigCommands, RunArgs, SpecArgs};
use artipilot::commands::{self, BuildTarget, TransferRequest};
use artipilot::config::Config;
use artipilot::server::Server;
use artipilot::transfer::{OperationKind, SummaryReport};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::init() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let log = artipilot::logging::init(cli.verbose, &config.logs_dir());
    let code = match run(cli, config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    };
    if let Some(path) = &log.log_path {
        eprintln!("Debug log: {}", path.display());
    }
    code
}

fn finish(report: &SummaryReport, quiet: bool) -> Result<ExitCode> {
    artipilot::util::print_summary(report, quiet)?;
    Ok(if report.status == "success" { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

struct Job<'a> {
    kind: OperationKind,
    pattern: Option<&'a str>,
    target: Option<&'a str>,
    spec: &'a SpecArgs,
    run: &'a RunArgs,
}

fn transfer(config: &Config, cli: &Cli, job: Job<'_>, tune: impl FnOnce(&mut TransferRequest) -> Result<()>) -> Result<ExitCode> {
    let entries = commands::collect_entries(job.kind, job.pattern, job.target, job.spec)?;
    let repo = commands::connect(config, &cli.server)?;
    let options = commands::transfer_options(config, job.run);
    let quiet = options.quiet;
    let mut req = TransferRequest::new(job.kind, entries, options);
    tune(&mut req)?;
    let report = commands::handle_transfer(config, repo, req)?;
    finish(&report, quiet)
}

fn run(cli: Cli, mut config: Config) -> Result<ExitCode> {
    let config = &mut config;
    match &cli.command {
        Commands::Upload { pattern, target, spec, run, symlinks, build_name, build_number, module } => {
            let job = Job { kind: OperationKind::Upload, pattern: pattern.as_deref(), target: target.as_deref(), spec, run };
            transfer(config, &cli, job, |req| {
                req.preserve_symlinks = symlinks.unwrap_or(false);
                if let (Some(name), Some(number)) = (build_name, build_number) {
                    req.build = Some(BuildTarget { name: name.clone(), number: number.clone(), module: module.clone() });
                }
                Ok(())
            })
        }
        Commands::Download { pattern, target, spec, run, validate_symlinks } => {
            let job = Job { kind: OperationKind::Download, pattern: pattern.as_deref(), target: target.as_deref(), spec, run };
            transfer(config, &cli, job, |req| {
                req.options.validate_symlinks = validate_symlinks.unwrap_or(false);
                Ok(())
            })
        }
        Commands::Copy { pattern, target, spec, run } => {
            let job = Job { kind: OperationKind::Copy, pattern: pattern.as_deref(), target: target.as_deref(), spec, run };
            transfer(config, &cli, job, |_| Ok(()))
        }
        Commands::Move { pattern, target, spec, run } => {
            let job = Job { kind: OperationKind::Move, pattern: pattern.as_deref(), target: target.as_deref(), spec, run };
            transfer(config, &cli, job, |_| Ok(()))
        }
        Commands::Delete { pattern, spec, run } => {
            let job = Job { kind: OperationKind::Delete, pattern: pattern.as_deref(), target: None, spec, run };
            transfer(config, &cli, job, |req| {
                req.confirm_delete = true;
                Ok(())
            })
        }
        Commands::SetProps { args, spec, run } => {
            let (pattern, props) = commands::split_value_args(args, spec.spec.is_some())?;
            let job = Job { kind: OperationKind::SetProps, pattern: pattern.as_deref(), target: None, spec, run };
            transfer(config, &cli, job, |req| {
                req.options.props = artipilot::parse::parse_props(&props)?;
                if req.options.props.is_empty() {
                    return Err(anyhow::anyhow!("no properties given"));
                }
                req.options.recursive_props = spec.recursive.unwrap_or(true);
                Ok(())
            })
        }
        Commands::DeleteProps { args, spec, run } => {
            let (pattern, keys) = commands::split_value_args(args, spec.spec.is_some())?;
            let job = Job { kind: OperationKind::DeleteProps, pattern: pattern.as_deref(), target: None, spec, run };
            transfer(config, &cli, job, |req| {
                req.options.prop_keys = artipilot::parse::parse_prop_keys(&keys);
                if req.options.prop_keys.is_empty() {
                    return Err(anyhow::anyhow!("no property keys given"));
                }
                req.options.recursive_props = spec.recursive.unwrap_or(true);
                Ok(())
            })
        }
        Commands::Search { pattern, spec } => {
            let entries = commands::collect_entries(OperationKind::Search, pattern.as_deref(), None, spec)?;
            let repo = commands::connect(config, &cli.server)?;
            let items = commands::handle_search(repo.as_ref(), &entries)?;
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::BuildPublish { name, number } => {
            let repo = commands::connect(config, &cli.server)?;
            commands::handle_build_publish(config, repo.as_ref(), name, number)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            match action {
                ConfigCommands::Add { alias, url, make_default } => {
                    let server = Server {
                        url: url.clone(),
                        user: cli.server.user.clone(),
                        password: cli.server.password.clone(),
                        access_token: cli.server.access_token.clone(),
                        ..Default::default()
                    };
                    commands::handle_config_add(config, alias.clone(), server, *make_default)?
                }
                ConfigCommands::Remove { alias } => commands::handle_config_remove(config, alias.clone())?,
                ConfigCommands::List {} => commands::handle_config_list(config)?,
                ConfigCommands::Use { alias } => commands::handle_config_use(config, alias.clone())?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::buildinfo::{BuildArtifact, BuildDrafts};
use crate::cli::{RunArgs, ServerArgs, SpecArgs};
use crate::config::Config;
use crate::error::TransferError;
use crate::repo::{RemoteIndex, Repository, ServerDetails};
use crate::resolve::{MatchedItem, SourceSide, TargetSide, resolve_entry, target};
use crate::server::{Server, ServerCollection};
use crate::spec::{FileSpecEntry, RawEntry, read_spec_file};
use crate::transfer::{
    FailureRecord, OperationKind, SummaryReport, TransferOperation, TransferOptions,
    TransferOrchestrator, TransferSummary,
};

/// Build an uploaded batch is recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTarget {
    pub name: String,
    pub number: String,
    /// Module id inside the build; the build name when not given.
    pub module: Option<String>,
}

/// Everything one transfer command needs, already validated.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub kind: OperationKind,
    pub entries: Vec<FileSpecEntry>,
    pub options: TransferOptions,
    /// Upload links as links instead of following them.
    pub preserve_symlinks: bool,
    pub build: Option<BuildTarget>,
    /// Ask on stdin before deleting.
    pub confirm_delete: bool,
}

impl TransferRequest {
    pub fn new(kind: OperationKind, entries: Vec<FileSpecEntry>, options: TransferOptions) -> Self {
        TransferRequest {
            kind,
            entries,
            options,
            preserve_symlinks: false,
            build: None,
            confirm_delete: false,
        }
    }
}

/// Resolved operations in entry order, plus entries that failed to resolve.
#[derive(Debug, Default)]
pub struct Plan {
    pub operations: Vec<TransferOperation>,
    pub failures: Vec<FailureRecord>,
}

/// Connection details from `--url`, `--server` or the configured default.
/// Credential flags override what the alias stores.
pub fn server_details(config: &Config, args: &ServerArgs) -> Result<ServerDetails> {
    let mut details = match &args.server_url {
        Some(url) => ServerDetails { url: url.clone(), ..Default::default() },
        None => {
            let alias = args.server_alias.clone().or_else(|| config.default_server.clone()).ok_or_else(|| {
                anyhow::anyhow!("no server given; use --url, --server or `ap config use <alias>`")
            })?;
            let mut collection = ServerCollection::read_from_storage(&config.server_file_path)?;
            let server = collection
                .get_mut(&alias)
                .ok_or_else(|| anyhow::anyhow!("server alias '{}' not found", alias))?;
            server.set_last_used_now();
            let details = server.details();
            if let Err(e) = collection.save_to_storage(&config.server_file_path) {
                tracing::debug!("[config] cannot record last use of '{}': {:#}", alias, e);
            }
            details
        }
    };
    if args.user.is_some() {
        details.user = args.user.clone();
    }
    if args.password.is_some() {
        details.password = args.password.clone();
    }
    if args.access_token.is_some() {
        details.access_token = args.access_token.clone();
    }
    Ok(details)
}

pub fn connect(config: &Config, args: &ServerArgs) -> Result<Arc<dyn Repository>> {
    let details = server_details(config, args)?;
    crate::repo::connect(&details)
}

/// Entries from `--spec`, or a single entry from the positional arguments.
pub fn collect_entries(
    kind: OperationKind,
    pattern: Option<&str>,
    target: Option<&str>,
    spec: &SpecArgs,
) -> Result<Vec<FileSpecEntry>> {
    let overrides = spec.overrides();
    if let Some(path) = &spec.spec {
        if pattern.is_some() {
            return Err(anyhow::anyhow!("a pattern argument cannot be combined with --spec"));
        }
        let mut overrides = overrides;
        overrides.target = target.map(str::to_string);
        return read_spec_file(path, kind, &overrides);
    }
    let pattern = pattern
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} needs a pattern or --spec", kind.name()))?;
    let raw = RawEntry {
        pattern: pattern.to_string(),
        target: target.map(str::to_string),
        ..Default::default()
    }
    .overlay(&overrides);
    Ok(vec![raw.into_entry(kind)?])
}

/// Split `[pattern] <value>` of set-props / delete-props; the pattern is
/// absent when entries come from `--spec`.
pub fn split_value_args(args: &[String], with_spec: bool) -> Result<(Option<String>, String)> {
    match (args, with_spec) {
        ([value], true) => Ok((None, value.clone())),
        ([pattern, value], false) => Ok((Some(pattern.clone()), value.clone())),
        (_, true) => Err(anyhow::anyhow!("with --spec only the properties argument is expected")),
        (_, false) => Err(anyhow::anyhow!("expected a pattern followed by the properties")),
    }
}

pub fn transfer_options(config: &Config, run: &RunArgs) -> TransferOptions {
    TransferOptions {
        threads: run.threads.or(config.threads),
        retries: run.retries.unwrap_or(config.retries),
        dry_run: run.dry_run.unwrap_or(false),
        quiet: run.quiet.unwrap_or(false),
        ..Default::default()
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// A literal `repo/dir/` delete with no other selectors removes the folder
/// itself rather than each item under it.
fn folder_delete_target(entry: &FileSpecEntry) -> Option<String> {
    let collapsible = !entry.regexp
        && entry.pattern.ends_with('/')
        && !has_wildcards(&entry.pattern)
        && entry.exclude_patterns.is_empty()
        && entry.build.is_none()
        && entry.props.is_empty()
        && entry.sort_by.is_empty()
        && entry.limit.is_none()
        && entry.offset == 0;
    collapsible.then(|| entry.pattern.trim_matches('/').to_string())
}

/// Drop items that live under a matched directory; deleting, moving or
/// copying the directory takes them along already.
fn absorb_descendants(items: Vec<MatchedItem>) -> Vec<MatchedItem> {
    let dirs: HashSet<String> = items
        .iter()
        .filter(|i| i.is_dir)
        .map(|i| i.source_path.trim_end_matches('/').to_string())
        .collect();
    items
        .into_iter()
        .filter(|i| {
            let path = i.source_path.trim_end_matches('/');
            !path.match_indices('/').any(|(idx, _)| dirs.contains(&path[..idx]))
        })
        .collect()
}

fn entry_failure(kind: OperationKind, entry: &FileSpecEntry, error: TransferError) -> FailureRecord {
    FailureRecord {
        kind,
        source: entry.pattern.clone(),
        target: entry.target.clone().unwrap_or_default(),
        error,
    }
}

fn entry_operations(
    repo: &dyn Repository,
    kind: OperationKind,
    entry: &FileSpecEntry,
    items: Vec<MatchedItem>,
    summary: &TransferSummary,
    failures: &mut Vec<FailureRecord>,
) -> Vec<TransferOperation> {
    if kind == OperationKind::Delete
        && !items.is_empty()
        && let Some(folder) = folder_delete_target(entry)
    {
        let mut item = MatchedItem::file(&folder, folder.rsplit('/').next().unwrap_or(&folder));
        item.is_dir = true;
        tracing::debug!("[delete] '{}' collapses to a single folder delete", entry.pattern);
        return vec![TransferOperation::new(kind, item, String::new())];
    }
    let whole_dirs = matches!(kind, OperationKind::Delete | OperationKind::Move | OperationKind::Copy);
    let items = if whole_dirs && entry.include_dirs { absorb_descendants(items) } else { items };

    let side = kind.target_side();
    let template = entry.target.as_deref().unwrap_or("");
    let mut known_dirs: HashMap<String, bool> = HashMap::new();
    let mut existing_dir = |path: &str| {
        if let Some(&hit) = known_dirs.get(path) {
            return hit;
        }
        let hit = match side {
            Some(TargetSide::Remote) => repo.is_folder(path).unwrap_or_else(|e| {
                tracing::debug!("[plan] cannot tell whether {} is a folder: {}", path, e);
                false
            }),
            _ => Path::new(path).is_dir(),
        };
        known_dirs.insert(path.to_string(), hit);
        hit
    };

    let mut ops = Vec::with_capacity(items.len());
    for mut item in items {
        let target = if side.is_some() {
            match target::compose(&item, template, entry.flat, &mut existing_dir) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("{} {} failed: {}", kind.name(), item.source_path, e);
                    summary.record_failure();
                    failures.push(FailureRecord {
                        kind,
                        source: item.source_path.clone(),
                        target: template.to_string(),
                        error: e,
                    });
                    continue;
                }
            }
        } else {
            String::new()
        };
        if kind == OperationKind::Upload {
            for (k, v) in &entry.props {
                item.properties.entry(k.clone()).or_default().push(v.clone());
            }
        }
        ops.push(TransferOperation::new(kind, item, target));
    }
    ops
}

/// Resolve every entry in order. An entry that fails to resolve counts as one
/// failure and the remaining entries still run; an authentication failure
/// stops planning.
pub fn plan_operations(repo: &dyn Repository, req: &TransferRequest, summary: &TransferSummary) -> Plan {
    let side = if req.kind.source_is_local() { SourceSide::Local } else { SourceSide::Remote };
    let mut plan = Plan::default();
    for entry in &req.entries {
        let items = match resolve_entry(entry, side, repo, req.preserve_symlinks) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("cannot resolve '{}': {}", entry.pattern, e);
                summary.record_failure();
                let fatal = e.is_fatal();
                plan.failures.push(entry_failure(req.kind, entry, e));
                if fatal {
                    summary.mark_fatal();
                    break;
                }
                continue;
            }
        };
        if items.is_empty() {
            tracing::info!("'{}' matched nothing", entry.pattern);
        }
        let ops = entry_operations(repo, req.kind, entry, items, summary, &mut plan.failures);
        plan.operations.extend(ops);
    }
    tracing::debug!("[plan] {} operation(s) from {} entr(ies)", plan.operations.len(), req.entries.len());
    plan
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    std::io::stderr().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).context("cannot read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Resolve, run and account for one transfer command.
pub fn handle_transfer(config: &Config, repo: Arc<dyn Repository>, req: TransferRequest) -> Result<SummaryReport> {
    let summary = Arc::new(TransferSummary::new());
    let plan = plan_operations(repo.as_ref(), &req, &summary);

    if req.kind == OperationKind::Delete
        && req.confirm_delete
        && !req.options.dry_run
        && !req.options.quiet
        && !plan.operations.is_empty()
        && !confirm(&format!("Delete {} item(s)?", plan.operations.len()))?
    {
        eprintln!("Delete cancelled");
        write_failures(config, &plan.failures);
        return Ok(summary.report());
    }
    execute_plan(config, repo, req, plan, summary)
}

fn write_failures(config: &Config, failures: &[FailureRecord]) {
    if let Some(path) = crate::util::write_failures_jsonl(&config.logs_dir(), failures) {
        tracing::info!("failure details written to {}", path.display());
    }
}

/// Run a resolved plan and record the uploads of a build, if any.
pub fn execute_plan(
    config: &Config,
    repo: Arc<dyn Repository>,
    req: TransferRequest,
    mut plan: Plan,
    summary: Arc<TransferSummary>,
) -> Result<SummaryReport> {
    let mut options = req.options;
    let drafts = BuildDrafts::new(config.builds_dir());
    let mut draft = None;
    if let Some(build) = &req.build {
        let info = drafts.load_or_create(&build.name, &build.number)?;
        options.props.push(("build.name".into(), build.name.clone()));
        options.props.push(("build.number".into(), build.number.clone()));
        options.props.push(("build.timestamp".into(), info.timestamp_millis()));
        draft = Some(info);
    }
    let dry_run = options.dry_run;

    let report = if summary.is_fatal() {
        for _ in &plan.operations {
            summary.record_not_attempted();
        }
        Default::default()
    } else {
        TransferOrchestrator::new(repo, options).run(plan.operations, &summary)
    };
    tracing::debug!("[transfer] {} moved", indicatif::HumanBytes(report.bytes));

    plan.failures.extend(report.failures);
    write_failures(config, &plan.failures);

    if let (Some(build), Some(mut info)) = (&req.build, draft)
        && !dry_run
        && !report.uploaded.is_empty()
    {
        let artifacts = report
            .uploaded
            .into_iter()
            .map(|u| BuildArtifact {
                name: u.target.rsplit('/').next().unwrap_or(&u.target).to_string(),
                path: u.target,
                sha256: u.sha256,
                size: u.size,
            })
            .collect();
        info.add_artifacts(build.module.as_deref().unwrap_or(&build.name), artifacts);
        let path = drafts.save(&info)?;
        tracing::info!("build {}/{} recorded in {}", build.name, build.number, path.display());
    }
    Ok(summary.report())
}

/// Matched items of every entry, in entry order.
pub fn handle_search(repo: &dyn Repository, entries: &[FileSpecEntry]) -> Result<Vec<MatchedItem>> {
    let mut out = Vec::new();
    for entry in entries {
        let items = resolve_entry(entry, SourceSide::Remote, repo, false)
            .with_context(|| format!("cannot search '{}'", entry.pattern))?;
        out.extend(items);
    }
    Ok(out)
}

/// Send a collected build to the server and drop the local draft.
pub fn handle_build_publish(config: &Config, repo: &dyn Repository, name: &str, number: &str) -> Result<()> {
    let drafts = BuildDrafts::new(config.builds_dir());
    let info = drafts
        .load(name, number)?
        .ok_or_else(|| anyhow::anyhow!("no collected build {}/{}; upload with --build-name first", name, number))?;
    repo.publish_build(&info).with_context(|| format!("cannot publish build {}/{}", name, number))?;
    drafts.remove(name, number)?;
    println!("Published build {}/{}", name, number);
    Ok(())
}

pub fn handle_config_add(config: &mut Config, alias: String, server: Server, make_default: bool) -> Result<()> {
    let mut collection = ServerCollection::read_from_storage(&config.server_file_path)?;
    let replaced = collection.get(&alias).is_some();
    collection.insert(&alias, Server { id: None, alias: Some(alias.clone()), ..server });
    collection.save_to_storage(&config.server_file_path)?;
    if make_default || config.default_server.is_none() {
        config.default_server = Some(alias.clone());
        config.save()?;
    }
    println!("{} server '{}'", if replaced { "Updated" } else { "Added" }, alias);
    Ok(())
}

pub fn handle_config_remove(config: &mut Config, alias: String) -> Result<()> {
    let mut collection = ServerCollection::read_from_storage(&config.server_file_path)?;
    if collection.get(&alias).is_none() {
        return Err(anyhow::anyhow!("server alias '{}' not found", alias));
    }
    collection.remove(&alias);
    collection.save_to_storage(&config.server_file_path)?;
    if config.default_server.as_deref() == Some(alias.as_str()) {
        config.default_server = None;
        config.save()?;
    }
    println!("Removed server '{}'", alias);
    Ok(())
}

pub fn handle_config_list(config: &Config) -> Result<()> {
    let collection = ServerCollection::read_from_storage(&config.server_file_path)?;
    collection.show_table(config.default_server.as_deref())
}

pub fn handle_config_use(config: &mut Config, alias: String) -> Result<()> {
    let collection = ServerCollection::read_from_storage(&config.server_file_path)?;
    if collection.get(&alias).is_none() {
        return Err(anyhow::anyhow!("server alias '{}' not found", alias));
    }
    config.default_server = Some(alias.clone());
    config.save()?;
    println!("Default server is now '{}'", alias);
    Ok(())
}

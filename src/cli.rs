use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::spec::RawEntry;

#[derive(Parser)]
#[clap(name = "ap", author, version, about, long_about = None)]
pub struct Cli {
    #[clap(short, long, global = true, help = "Debug logging on stderr and in a log file under the config dir")]
    pub verbose: bool,
    #[clap(flatten)]
    pub server: ServerArgs,
    #[clap(subcommand)]
    pub command: Commands,
}

/// Which server to talk to. Explicit `--url` wins over `--server` and the
/// configured default.
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    #[clap(long = "server", global = true, help = "Server alias from `ap config ls`")]
    pub server_alias: Option<String>,
    #[clap(long = "url", global = true, help = "Server URL (http(s):// or a local directory)")]
    pub server_url: Option<String>,
    #[clap(long = "user", global = true)]
    pub user: Option<String>,
    #[clap(long = "password", global = true)]
    pub password: Option<String>,
    #[clap(long = "access-token", global = true)]
    pub access_token: Option<String>,
}

/// Entry flags shared by every pattern-driven command. Values given here
/// override the ones in a `--spec` document.
#[derive(Args, Debug, Clone, Default)]
pub struct SpecArgs {
    #[clap(long, help = "Read entries from a file spec document")]
    pub spec: Option<PathBuf>,
    #[clap(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub recursive: Option<bool>,
    #[clap(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub flat: Option<bool>,
    #[clap(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub regexp: Option<bool>,
    #[clap(long = "include-dirs", num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub include_dirs: Option<bool>,
    #[clap(long = "exclude-patterns", help = "Patterns to leave out, separated by ';'")]
    pub exclude_patterns: Option<String>,
    #[clap(long, help = "Only artifacts of build <name>[/<number>]; no number means latest")]
    pub build: Option<String>,
    #[clap(long, help = "Properties as k=v;k2=v2 (attached on upload, a filter elsewhere)")]
    pub props: Option<String>,
    #[clap(long = "sort-by", help = "Comma separated sort keys: name, path, created, size, depth")]
    pub sort_by: Option<String>,
    #[clap(long = "sort-order", help = "asc or desc")]
    pub sort_order: Option<String>,
    #[clap(long)]
    pub limit: Option<usize>,
    #[clap(long)]
    pub offset: Option<usize>,
    #[clap(long = "archive-entries", help = "Match entries inside archives")]
    pub archive_entries: Option<String>,
}

impl SpecArgs {
    /// The flags as a partial entry; unset flags stay `None`.
    pub fn overrides(&self) -> RawEntry {
        RawEntry {
            exclude_patterns: self.exclude_patterns.as_deref().map(crate::parse::split_patterns),
            recursive: self.recursive,
            flat: self.flat,
            regexp: self.regexp,
            include_dirs: self.include_dirs,
            props: self.props.clone(),
            build: self.build.clone(),
            sort_by: self.sort_by.as_deref().map(|s| {
                s.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string).collect()
            }),
            sort_order: self.sort_order.clone(),
            limit: self.limit,
            offset: self.offset,
            archive_entries: self.archive_entries.clone(),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[clap(long = "dry-run", num_args = 0..=1, default_missing_value = "true", require_equals = true, help = "Plan and log operations without performing them")]
    pub dry_run: Option<bool>,
    #[clap(short, long, num_args = 0..=1, default_missing_value = "true", require_equals = true, help = "No progress bar and no confirmation prompts")]
    pub quiet: Option<bool>,
    #[clap(long, help = "Number of concurrent workers (default: chosen from the workload)")]
    pub threads: Option<usize>,
    #[clap(long, help = "Attempts per operation on transient errors (default 3)")]
    pub retries: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Upload local files to the repository", display_order = 1)]
    Upload {
        #[clap(help = "Local path pattern")]
        pattern: Option<String>,
        #[clap(help = "Target repo/path; a trailing '/' marks a folder")]
        target: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
        #[clap(long, num_args = 0..=1, default_missing_value = "true", require_equals = true, help = "Upload symlinks as links instead of following them")]
        symlinks: Option<bool>,
        #[clap(long = "build-name", requires = "build_number", help = "Record uploads under this build")]
        build_name: Option<String>,
        #[clap(long = "build-number", requires = "build_name")]
        build_number: Option<String>,
        #[clap(long, requires = "build_name", help = "Build module id (default: the build name)")]
        module: Option<String>,
    },
    #[clap(about = "Download artifacts to the local disk", display_order = 2)]
    Download {
        #[clap(help = "Repository path pattern")]
        pattern: Option<String>,
        #[clap(help = "Local target; a trailing '/' marks a directory")]
        target: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
        #[clap(long = "validate-symlinks", num_args = 0..=1, default_missing_value = "true", require_equals = true, help = "Refuse links whose destination is missing or changed")]
        validate_symlinks: Option<bool>,
    },
    #[clap(about = "Copy artifacts inside the repository", alias = "cp", display_order = 3)]
    Copy {
        pattern: Option<String>,
        target: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
    },
    #[clap(about = "Move artifacts inside the repository", alias = "mv", display_order = 4)]
    Move {
        pattern: Option<String>,
        target: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
    },
    #[clap(about = "Delete artifacts", alias = "rm", display_order = 5)]
    Delete {
        pattern: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
    },
    #[clap(about = "Set properties on matched artifacts", name = "set-props", display_order = 6)]
    SetProps {
        #[clap(num_args = 1..=2, required = true, value_names = ["PATTERN", "PROPS"], help = "[pattern] k=v;k2=v2 (pattern omitted with --spec)")]
        args: Vec<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
    },
    #[clap(about = "Remove properties from matched artifacts", name = "delete-props", display_order = 7)]
    DeleteProps {
        #[clap(num_args = 1..=2, required = true, value_names = ["PATTERN", "KEYS"], help = "[pattern] k1,k2 (pattern omitted with --spec)")]
        args: Vec<String>,
        #[clap(flatten)]
        spec: SpecArgs,
        #[clap(flatten)]
        run: RunArgs,
    },
    #[clap(about = "List matching artifacts as JSON", display_order = 8)]
    Search {
        pattern: Option<String>,
        #[clap(flatten)]
        spec: SpecArgs,
    },
    #[clap(about = "Publish a collected build to the server", name = "build-publish", display_order = 9)]
    BuildPublish { name: String, number: String },
    #[clap(about = "Manage server aliases", display_order = 10)]
    Config {
        #[clap(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    #[clap(about = "Add or replace a server alias (credentials from --user/--password/--access-token)", name = "add")]
    Add {
        alias: String,
        url: String,
        #[clap(long = "default", help = "Also make it the default server")]
        make_default: bool,
    },
    #[clap(about = "Remove a server alias", name = "rm")]
    Remove { alias: String },
    #[clap(about = "List server aliases", name = "ls")]
    List {},
    #[clap(about = "Set the default server alias", name = "use")]
    Use { alias: String },
}

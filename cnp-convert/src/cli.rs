use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "cnp-convert")]
#[command(about = "Convert firewall rules into CiliumNetworkPolicy documents and validate policies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Convert a JSON rule file into a CiliumNetworkPolicy.
    Convert(ConvertArgs),
    /// Validate one or more policy documents.
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// JSON file holding a rule array or an object with a `rules` array.
    pub input: PathBuf,
    /// Write the policy here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Policy name (and name prefix with --grouped).
    #[arg(long, default_value = "generated-policy")]
    pub name: String,
    #[arg(long, default_value = "default")]
    pub namespace: String,
    /// Emit one policy per protected workload instead of failing on mixed selectors.
    #[arg(long)]
    pub grouped: bool,
    #[arg(long, value_enum, default_value_t = PolicyFormat::Yaml)]
    pub format: PolicyFormat,
    /// Validate the generated policies and fail if any is invalid.
    #[arg(long)]
    pub check: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Policy files (YAML or JSON; YAML streams are split per document).
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Lint configuration (TOML: label_case, disabled).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the embedded cilium.io/v2 schema profile.
    #[arg(long)]
    pub schema_file: Option<PathBuf>,
    /// Fail when any document has warnings.
    #[arg(long)]
    pub strict: bool,
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyFormat {
    Yaml,
    Json,
}

//! FVS CLI - Command-line interface for FVS Flux
//!
//! Commands:
//! - partition: Partition interval batches into stomatal/nonstomatal fluxes
//! - validate: Validate interval batch schema
//! - schema: Print input/output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fvs_flux::aggregate::ResultAggregator;
use fvs_flux::schema::{BatchAdapter, IntervalBatch, SCHEMA_VERSION};
use fvs_flux::types::BatchReport;
use fvs_flux::{FvsProcessor, PipelineConfig, FVS_VERSION, PRODUCER_NAME};

/// FVS - Flux-variance-similarity partitioning of eddy-covariance fluxes
#[derive(Parser)]
#[command(name = "fvs")]
#[command(version = FVS_VERSION)]
#[command(about = "Partition water vapor and CO2 fluxes into stomatal and nonstomatal components", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition interval batches
    Partition {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Constant water use efficiency (kg CO2 / kg H2O); overrides the config file
        #[arg(long, allow_hyphen_values = true)]
        wue: Option<f64>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Validate interval batch schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one interval per line)
    Ndjson,
    /// JSON array of intervals
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one analysis record per line)
    Ndjson,
    /// Batch report as JSON
    Json,
    /// Pretty-printed batch report
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (fvs.interval_batch.v1)
    Input,
    /// Output schema (batch report)
    Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FvsCliError> {
    match cli.command {
        Commands::Partition {
            input,
            output,
            config,
            wue,
            input_format,
            output_format,
        } => cmd_partition(
            &input,
            &output,
            config.as_deref(),
            wue,
            input_format,
            output_format,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_partition(
    input: &Path,
    output: &Path,
    config_path: Option<&Path>,
    wue: Option<f64>,
    input_format: InputFormat,
    output_format: OutputFormat,
) -> Result<(), FvsCliError> {
    let config = load_config(config_path, wue)?;
    let processor = FvsProcessor::new(config)?;

    let input_data = read_input(input)?;
    let batches = parse_batches(&input_data, &input_format)?;
    if batches.is_empty() {
        return Err(FvsCliError::NoIntervals);
    }
    let samples = BatchAdapter::to_sample_batches(batches)?;

    let report = processor.process_batch(&samples);
    info!(
        run_id = %report.run_id,
        accepted = report.accepted,
        rejected = report.rejected,
        "partition finished"
    );

    let output_data = format_output(&report, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), FvsCliError> {
    let input_data = read_input(input)?;
    let batches = parse_batches(&input_data, &input_format)?;

    let results = BatchAdapter::validate_batches(&batches);
    let report = ValidationReport {
        total_intervals: batches.len(),
        valid_intervals: batches.len() - results.len(),
        invalid_intervals: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                label: r.label.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total intervals:   {}", report.total_intervals);
        println!("Valid intervals:   {}", report.valid_intervals);
        println!("Invalid intervals: {}", report.invalid_intervals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Interval {} (index {}): {}",
                    err.label.as_deref().unwrap_or("unlabelled"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_intervals > 0 {
        Err(FvsCliError::ValidationFailed(report.invalid_intervals))
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), FvsCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&input_json_schema())?);
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One object per averaging interval:");
                println!();
                println!("- schema_version: \"{}\" (optional)", SCHEMA_VERSION);
                println!("- label: caller identifier (optional)");
                println!("- start, end: site-local timestamps, e.g. 2024-06-01T12:00:00");
                println!("- columns: equal-length arrays in SI units");
                println!("  - u, v, w: wind components (m/s)");
                println!("  - c: CO2 density (kg/m^3), q: water vapor density (kg/m^3)");
                println!("  - T: air temperature (K), P: air pressure (Pa)");
                println!("- flags: [{{ name, values, good_value }}] (optional)");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&output_json_schema())?);
            } else {
                println!("Output Schema: {} {} batch report", PRODUCER_NAME, FVS_VERSION);
                println!();
                println!("- run_id, producer, version, computed_at_utc");
                println!("- accepted, rejected: interval counts");
                println!("- records: one per interval, in input order:");
                println!("  - label, start, end");
                println!("  - outcome: {{ status: accepted, good_run }} or {{ status: rejected, reason }}");
                println!("  - statistics: means, variances, covariances, ustar, obukhov_length");
                println!("  - wue: {{ wue, model }}");
                println!("  - partition: {{ method, wqt, wqe, wcp, wcr, candidates, ... }}");
                println!("  - fluxes: {{ fq, fqt, fqe, le, let_, lee, fc, fcp, fcr, *_mol, h }}");
                println!("  - warnings");
            }
        }
    }
    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, FvsCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_batches(data: &str, format: &InputFormat) -> Result<Vec<IntervalBatch>, FvsCliError> {
    let batches = match format {
        InputFormat::Ndjson => BatchAdapter::parse_ndjson(data)?,
        InputFormat::Json => BatchAdapter::parse_array(data)?,
    };
    Ok(batches)
}

/// Load the pipeline configuration; `wue` replaces any WUE source in the file
fn load_config(path: Option<&Path>, wue: Option<f64>) -> Result<PipelineConfig, FvsCliError> {
    let Some(path) = path else {
        return match wue {
            Some(w) => Ok(PipelineConfig::with_constant_wue(w)),
            None => Err(FvsCliError::NoWue),
        };
    };

    let text = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        let mut table: toml::Table =
            toml::from_str(&text).map_err(|e| FvsCliError::Config(e.to_string()))?;
        if let Some(w) = wue {
            let mut source = toml::Table::new();
            source.insert("prescribed".to_string(), toml::Value::Float(w));
            table.insert("wue".to_string(), toml::Value::Table(source));
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| FvsCliError::Config(e.to_string()))
    } else {
        let mut value: serde_json::Value = serde_json::from_str(&text)?;
        if let (Some(w), Some(obj)) = (wue, value.as_object_mut()) {
            obj.insert("wue".to_string(), serde_json::json!({ "prescribed": w }));
        }
        serde_json::from_value(value).map_err(|e| FvsCliError::Config(e.to_string()))
    }
}

fn format_output(report: &BatchReport, format: &OutputFormat) -> Result<String, FvsCliError> {
    let data = match format {
        OutputFormat::Ndjson => ResultAggregator::encode_ndjson(&report.records)? + "\n",
        OutputFormat::Json => ResultAggregator::encode_report(report, false)?,
        OutputFormat::JsonPretty => ResultAggregator::encode_report(report, true)?,
    };
    Ok(data)
}

fn input_json_schema() -> serde_json::Value {
    let column = serde_json::json!({ "type": "array", "items": { "type": "number" } });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "One eddy-covariance averaging interval in SI units",
        "type": "object",
        "required": ["start", "end", "columns"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "label": { "type": "string" },
            "start": { "type": "string", "format": "date-time" },
            "end": { "type": "string", "format": "date-time" },
            "columns": {
                "type": "object",
                "required": ["u", "v", "w", "c", "q", "T", "P"],
                "properties": {
                    "u": column, "v": column, "w": column,
                    "c": column, "q": column, "T": column, "P": column
                }
            },
            "flags": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "values", "good_value"],
                    "properties": {
                        "name": { "type": "string" },
                        "values": column,
                        "good_value": { "type": "number" }
                    }
                }
            }
        }
    })
}

fn output_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "fvs batch report",
        "type": "object",
        "required": ["run_id", "producer", "version", "computed_at_utc", "accepted", "rejected", "records"],
        "properties": {
            "run_id": { "type": "string", "format": "uuid" },
            "producer": { "type": "string" },
            "version": { "type": "string" },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "accepted": { "type": "integer" },
            "rejected": { "type": "integer" },
            "records": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["start", "end", "outcome", "warnings"],
                    "properties": {
                        "label": { "type": "string" },
                        "start": { "type": "string" },
                        "end": { "type": "string" },
                        "outcome": { "type": "object" },
                        "statistics": { "type": ["object", "null"] },
                        "wue": { "type": ["object", "null"] },
                        "partition": { "type": ["object", "null"] },
                        "fluxes": { "type": ["object", "null"] },
                        "warnings": { "type": "array" }
                    }
                }
            }
        }
    })
}

// Error handling

#[derive(Debug)]
enum FvsCliError {
    Io(io::Error),
    Compute(fvs_flux::ComputeError),
    Json(serde_json::Error),
    InvalidConfig(fvs_flux::ConfigError),
    Config(String),
    NoWue,
    NoIntervals,
    ValidationFailed(usize),
}

impl std::fmt::Display for FvsCliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FvsCliError::Io(e) => write!(f, "IO error: {}", e),
            FvsCliError::Compute(e) => write!(f, "{}", e),
            FvsCliError::Json(e) => write!(f, "JSON error: {}", e),
            FvsCliError::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
            FvsCliError::Config(msg) => write!(f, "Cannot read configuration: {}", msg),
            FvsCliError::NoWue => write!(f, "No water use efficiency source given"),
            FvsCliError::NoIntervals => write!(f, "No intervals found in input"),
            FvsCliError::ValidationFailed(count) => {
                write!(f, "{} intervals failed validation", count)
            }
        }
    }
}

impl From<io::Error> for FvsCliError {
    fn from(e: io::Error) -> Self {
        FvsCliError::Io(e)
    }
}

impl From<fvs_flux::ComputeError> for FvsCliError {
    fn from(e: fvs_flux::ComputeError) -> Self {
        FvsCliError::Compute(e)
    }
}

impl From<serde_json::Error> for FvsCliError {
    fn from(e: serde_json::Error) -> Self {
        FvsCliError::Json(e)
    }
}

impl From<fvs_flux::ConfigError> for FvsCliError {
    fn from(e: fvs_flux::ConfigError) -> Self {
        FvsCliError::InvalidConfig(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FvsCliError> for CliError {
    fn from(e: FvsCliError) -> Self {
        let message = e.to_string();
        let (code, hint) = match e {
            FvsCliError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
            FvsCliError::Compute(_) => (
                "PARSE_ERROR",
                "Ensure input matches the fvs.interval_batch.v1 schema",
            ),
            FvsCliError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
            FvsCliError::InvalidConfig(_) => ("CONFIG_INVALID", "Fix the configuration values"),
            FvsCliError::Config(_) => ("CONFIG_ERROR", "Check the configuration file syntax"),
            FvsCliError::NoWue => (
                "NO_WUE",
                "Pass --wue or a config file with a [wue] section",
            ),
            FvsCliError::NoIntervals => ("NO_INTERVALS", "Ensure input file is not empty"),
            FvsCliError::ValidationFailed(_) => {
                ("VALIDATION_FAILED", "Fix validation errors and retry")
            }
        };
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_intervals: usize,
    valid_intervals: usize,
    invalid_intervals: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    label: Option<String>,
    error: String,
}
